use std::fmt::Debug;
use std::time::Duration;

use crc32fast::Hasher;
use serde::Deserialize;

/// Wait applied to tree locks unless overridden; `lock_timeout_ms = 0` disables it.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Static configuration describing how a SeaORM model stores its nested sets.
#[derive(Clone, Debug)]
pub struct NestedSetConfig {
    entity_name: String,
    table_name: String,
    advisory_lock_strategy: AdvisoryLockStrategy,
    lock_timeout: Option<Duration>,
}

impl NestedSetConfig {
    /// Create a new configuration using the logical entity and node table names.
    pub fn new(entity_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let table_name = table_name.into();

        let default_lock = AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(
            &entity_name,
            &table_name,
        ));

        Self {
            entity_name,
            table_name,
            advisory_lock_strategy: default_lock,
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
        }
    }

    /// Merge options produced by [`NestedSetOptions`].
    pub(crate) fn apply_options(mut self, options: NestedSetOptions) -> Self {
        if let Some(table_name) = options.table_name {
            self.table_name = table_name;
        }
        if let Some(namespace) = options.lock_namespace {
            self.advisory_lock_strategy =
                AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::new(namespace));
        }
        if options.advisory_locks == Some(false) {
            self.advisory_lock_strategy = AdvisoryLockStrategy::Disabled;
        }
        match options.lock_timeout_ms {
            Some(0) => self.lock_timeout = None,
            Some(millis) => self.lock_timeout = Some(Duration::from_millis(millis)),
            None => {}
        }
        self
    }

    /// Human-readable Rust struct name for the node entity.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Table backing the node entity.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Advisory lock strategy (PostgreSQL only).
    pub fn advisory_lock_strategy(&self) -> &AdvisoryLockStrategy {
        &self.advisory_lock_strategy
    }

    /// Upper bound on waiting for a tree lock before reporting a conflict.
    /// `None` only when explicitly disabled.
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }
}

/// Builder-style options consumed by the derive macro.
///
/// Also deserializable, so deployments can override lock behaviour from their
/// own configuration files.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NestedSetOptions {
    table_name: Option<String>,
    lock_namespace: Option<String>,
    advisory_locks: Option<bool>,
    lock_timeout_ms: Option<u64>,
}

impl NestedSetOptions {
    pub fn table_name(mut self, value: impl Into<String>) -> Self {
        self.table_name = Some(value.into());
        self
    }

    pub fn lock_namespace(mut self, value: impl Into<String>) -> Self {
        self.lock_namespace = Some(value.into());
        self
    }

    pub fn advisory_locks(mut self, enabled: bool) -> Self {
        self.advisory_locks = Some(enabled);
        self
    }

    pub fn lock_timeout_ms(mut self, millis: u64) -> Self {
        self.lock_timeout_ms = Some(millis);
        self
    }

    pub fn apply(self, base: NestedSetConfig) -> NestedSetConfig {
        base.apply_options(self)
    }
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Key guarding one tree: the namespace scoped to a structure and root.
    pub fn for_root(&self, structure_id: &impl Debug, root: &impl Debug) -> String {
        format!("{}::{structure_id:?}::{root:?}", self.0)
    }

    fn derived_from(entity: &str, table: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        hasher.update(b"/");
        hasher.update(table.as_bytes());
        let crc = hasher.finalize();
        Self(format!("nested-set::{entity}::{table}::{crc:x}"))
    }
}

/// Configuration describing how to acquire advisory locks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lock_key_is_derived_from_names() {
        let config = NestedSetConfig::new("StructureElement", "structureelements");
        let key = config
            .advisory_lock_strategy()
            .key()
            .expect("namespaced by default");
        assert!(key
            .as_str()
            .starts_with("nested-set::StructureElement::structureelements::"));
        assert_eq!(key.for_root(&3, &7), format!("{}::3::7", key.as_str()));
    }

    #[test]
    fn tree_locks_time_out_by_default() {
        let config = NestedSetConfig::new("MenuNode", "menu_nodes");
        assert_eq!(config.lock_timeout(), Some(DEFAULT_LOCK_TIMEOUT));

        let config = NestedSetOptions::default()
            .apply(NestedSetConfig::new("MenuNode", "menu_nodes"));
        assert!(config.lock_timeout().is_some());

        let unbounded = NestedSetOptions::default()
            .lock_timeout_ms(0)
            .apply(NestedSetConfig::new("MenuNode", "menu_nodes"));
        assert_eq!(unbounded.lock_timeout(), None);
    }

    #[test]
    fn options_override_defaults() {
        let config = NestedSetOptions::default()
            .table_name("menu_nodes")
            .lock_namespace("menus")
            .lock_timeout_ms(250)
            .apply(NestedSetConfig::new("MenuNode", "ignored"));

        assert_eq!(config.table_name(), "menu_nodes");
        assert_eq!(
            config.advisory_lock_strategy(),
            &AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::new("menus"))
        );
        assert_eq!(config.lock_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn disabling_locks_wins_over_namespace() {
        let config = NestedSetOptions::default()
            .lock_namespace("menus")
            .advisory_locks(false)
            .apply(NestedSetConfig::new("MenuNode", "menu_nodes"));
        assert_eq!(config.advisory_lock_strategy(), &AdvisoryLockStrategy::Disabled);
        assert!(config.advisory_lock_strategy().key().is_none());
    }

    #[test]
    fn options_deserialize_from_config_files() {
        let options: NestedSetOptions =
            serde_json::from_str(r#"{ "lock_namespace": "menus", "lock_timeout_ms": 1500 }"#)
                .expect("valid options");
        let config = options.apply(NestedSetConfig::new("MenuNode", "menu_nodes"));
        assert_eq!(config.table_name(), "menu_nodes");
        assert_eq!(config.lock_timeout(), Some(Duration::from_millis(1500)));

        let unknown = serde_json::from_str::<NestedSetOptions>(r#"{ "lock_name": "x" }"#);
        assert!(unknown.is_err());
    }
}
