//! Collaborators the engine calls before touching a tree.

use std::fmt;

use async_trait::async_trait;

use crate::error::NestedSetError;

/// Opaque principal on whose behalf a mutation runs.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Actor(String);

impl Actor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decides whether an actor may reorganize a structure.
#[async_trait]
pub trait StructureAuthorizer<Id>: Send + Sync {
    async fn can_edit(&self, structure_id: &Id, actor: &Actor) -> bool;
}

#[async_trait]
impl<Id, F> StructureAuthorizer<Id> for F
where
    Id: Sync + 'static,
    F: Fn(&Id, &Actor) -> bool + Send + Sync,
{
    async fn can_edit(&self, structure_id: &Id, actor: &Actor) -> bool {
        self(structure_id, actor)
    }
}

/// Referential check for content elements placed into structures.
#[async_trait]
pub trait ElementStore<Id>: Send + Sync {
    async fn element_exists(&self, element_id: &Id) -> Result<bool, NestedSetError>;
}

#[async_trait]
impl<Id, F> ElementStore<Id> for F
where
    Id: Sync + 'static,
    F: Fn(&Id) -> bool + Send + Sync,
{
    async fn element_exists(&self, element_id: &Id) -> Result<bool, NestedSetError> {
        Ok(self(element_id))
    }
}
