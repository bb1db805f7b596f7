use std::sync::Arc;

use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter,
};
use tracing::{debug, instrument, warn};

use crate::access::{Actor, ElementStore, StructureAuthorizer};
use crate::bounds::{
    ensure_capacity, ensure_depth, insertion_point, Bounds, DeleteMode, MovePlan, Placement,
    Shift,
};
use crate::config::NestedSetConfig;
use crate::error::NestedSetError;
use crate::lock::LockedTransaction;
use crate::query::{root_of, StructureQuery};
use crate::traits::{NestedSetModel, Structure};

/// Repository exposing the structural mutations for a given node model.
///
/// Only this type writes `root`, `lft`, `rgt` and `level`. Each mutation checks
/// the authorizer (and, for inserts, the element store) first, then runs in one
/// transaction holding the lock of every tree it touches.
pub struct NestedSetRepository<M>
where
    M: NestedSetModel,
{
    authorizer: Arc<dyn StructureAuthorizer<M::Id>>,
    elements: Arc<dyn ElementStore<M::Id>>,
    query: StructureQuery<M>,
}

impl<M> Clone for NestedSetRepository<M>
where
    M: NestedSetModel,
{
    fn clone(&self) -> Self {
        Self {
            authorizer: Arc::clone(&self.authorizer),
            elements: Arc::clone(&self.elements),
            query: self.query.clone(),
        }
    }
}

impl<M> NestedSetRepository<M>
where
    M: NestedSetModel,
{
    pub fn new<A, E>(authorizer: A, elements: E) -> Self
    where
        A: StructureAuthorizer<M::Id> + 'static,
        E: ElementStore<M::Id> + 'static,
    {
        Self {
            authorizer: Arc::new(authorizer),
            elements: Arc::new(elements),
            query: StructureQuery::new(),
        }
    }

    /// Read side of the same node relation.
    pub fn query(&self) -> &StructureQuery<M> {
        &self.query
    }

    fn config(&self) -> &'static NestedSetConfig {
        M::nested_set_config()
    }

    /// Whether `actor` may reorder nodes of the structure.
    pub async fn is_sortable(&self, structure_id: &M::Id, actor: &Actor) -> bool {
        self.authorizer.can_edit(structure_id, actor).await
    }

    #[instrument(skip_all, fields(max_levels = ?max_levels))]
    pub async fn create_structure(
        &self,
        db: &DatabaseConnection,
        max_levels: Option<i32>,
    ) -> Result<Structure<M::Id>, NestedSetError> {
        StructureQuery::<M>::ensure_supported(db)?;
        let max_levels = match max_levels {
            Some(max) if max < 0 => return Err(NestedSetError::InvalidMaxLevels(max)),
            Some(0) => None,
            other => other,
        };

        let model = M::structure_build_row(max_levels).insert(db).await?;
        let structure = Structure::from_model::<M>(&model);
        debug!(structure = ?structure.id, "created structure");
        Ok(structure)
    }

    pub async fn find_structure(
        &self,
        db: &DatabaseConnection,
        structure_id: &M::Id,
    ) -> Result<Option<Structure<M::Id>>, NestedSetError> {
        self.query.structure(db, structure_id).await
    }

    /// Remove a structure together with every node of every tree in it.
    #[instrument(skip_all, fields(structure = ?structure_id))]
    pub async fn delete_structure(
        &self,
        db: &DatabaseConnection,
        structure_id: &M::Id,
        actor: &Actor,
    ) -> Result<u64, NestedSetError> {
        StructureQuery::<M>::ensure_supported(db)?;
        self.authorize(structure_id, actor).await?;
        self.query.get_structure(db, structure_id).await?;

        let roots = self
            .query
            .roots(db, structure_id)
            .await?
            .iter()
            .map(root_of)
            .collect::<Result<Vec<_>, _>>()?;
        let keys = self.lock_keys(structure_id, &roots.iter().collect::<Vec<_>>());

        let guard = LockedTransaction::acquire(self.config(), db, keys).await?;
        let result = self
            .delete_structure_on(guard.connection(), structure_id)
            .await;
        Self::finish(guard, result).await
    }

    async fn delete_structure_on(
        &self,
        txn: &DatabaseTransaction,
        structure_id: &M::Id,
    ) -> Result<u64, NestedSetError> {
        let nodes = M::Entity::delete_many()
            .filter(M::structure_column().eq(M::id_to_value(structure_id)))
            .exec(txn)
            .await?;
        M::StructureEntity::delete_many()
            .filter(M::structure_id_column().eq(M::id_to_value(structure_id)))
            .exec(txn)
            .await?;
        debug!(nodes = nodes.rows_affected, "deleted structure");
        Ok(nodes.rows_affected)
    }

    /// Start a new tree in the structure with `element_id` as its root.
    #[instrument(skip_all, fields(structure = ?structure_id, element = ?element_id))]
    pub async fn make_root(
        &self,
        db: &DatabaseConnection,
        structure_id: &M::Id,
        element_id: &M::Id,
        actor: &Actor,
    ) -> Result<M, NestedSetError> {
        StructureQuery::<M>::ensure_supported(db)?;
        self.authorize(structure_id, actor).await?;
        self.ensure_element(element_id).await?;

        // A new tree has nothing to shift, so no tree lock is needed.
        let guard = LockedTransaction::acquire(self.config(), db, Vec::new()).await?;
        let result = self
            .make_root_on(guard.connection(), structure_id, element_id)
            .await;
        Self::finish(guard, result).await
    }

    async fn make_root_on(
        &self,
        txn: &DatabaseTransaction,
        structure_id: &M::Id,
        element_id: &M::Id,
    ) -> Result<M, NestedSetError> {
        self.query.get_structure(txn, structure_id).await?;
        self.ensure_unplaced(txn, structure_id, element_id).await?;

        let model = M::build_node(
            structure_id.clone(),
            element_id.clone(),
            None,
            Bounds::root(),
        )
        .insert(txn)
        .await
        .map_err(|err| NestedSetError::from_write(err, || format!("{element_id:?}")))?;

        let id = model.id();
        M::Entity::update_many()
            .col_expr(M::root_column(), SimpleExpr::Value(M::id_to_value(&id)))
            .filter(M::id_column().eq(M::id_to_value(&id)))
            .exec(txn)
            .await?;
        debug!(node = ?id, "created root");
        self.query.get(txn, &id).await
    }

    /// Insert `element_id` as the last child of `parent_id`.
    #[instrument(skip_all, fields(parent = ?parent_id, element = ?element_id))]
    pub async fn append_to(
        &self,
        db: &DatabaseConnection,
        parent_id: &M::Id,
        element_id: &M::Id,
        actor: &Actor,
    ) -> Result<M, NestedSetError> {
        self.insert_at(db, Placement::LastChildOf(parent_id.clone()), element_id, actor)
            .await
    }

    /// Insert `element_id` as the first child of `parent_id`.
    #[instrument(skip_all, fields(parent = ?parent_id, element = ?element_id))]
    pub async fn prepend_to(
        &self,
        db: &DatabaseConnection,
        parent_id: &M::Id,
        element_id: &M::Id,
        actor: &Actor,
    ) -> Result<M, NestedSetError> {
        self.insert_at(db, Placement::FirstChildOf(parent_id.clone()), element_id, actor)
            .await
    }

    #[instrument(skip_all, fields(sibling = ?sibling_id, element = ?element_id))]
    pub async fn insert_before(
        &self,
        db: &DatabaseConnection,
        sibling_id: &M::Id,
        element_id: &M::Id,
        actor: &Actor,
    ) -> Result<M, NestedSetError> {
        self.insert_at(db, Placement::Before(sibling_id.clone()), element_id, actor)
            .await
    }

    #[instrument(skip_all, fields(sibling = ?sibling_id, element = ?element_id))]
    pub async fn insert_after(
        &self,
        db: &DatabaseConnection,
        sibling_id: &M::Id,
        element_id: &M::Id,
        actor: &Actor,
    ) -> Result<M, NestedSetError> {
        self.insert_at(db, Placement::After(sibling_id.clone()), element_id, actor)
            .await
    }

    async fn insert_at(
        &self,
        db: &DatabaseConnection,
        placement: Placement<M::Id>,
        element_id: &M::Id,
        actor: &Actor,
    ) -> Result<M, NestedSetError> {
        StructureQuery::<M>::ensure_supported(db)?;
        let anchor = self.query.get(db, placement.anchor()).await?;
        let structure_id = anchor.structure_id();
        self.authorize(&structure_id, actor).await?;
        self.ensure_element(element_id).await?;

        let root = root_of(&anchor)?;
        let keys = self.lock_keys(&structure_id, &[&root]);
        let guard = LockedTransaction::acquire(self.config(), db, keys).await?;
        let result = self
            .insert_on(guard.connection(), &placement, &root, element_id)
            .await;
        Self::finish(guard, result).await
    }

    async fn insert_on(
        &self,
        txn: &DatabaseTransaction,
        placement: &Placement<M::Id>,
        expected_root: &M::Id,
        element_id: &M::Id,
    ) -> Result<M, NestedSetError> {
        let anchor = self.query.get(txn, placement.anchor()).await?;
        let root = root_of(&anchor)?;
        if root != *expected_root {
            return Err(NestedSetError::conflict(format!(
                "node {:?} moved to another tree",
                anchor.id()
            )));
        }
        if !placement.is_child_placement() && anchor.level() == 0 {
            return Err(NestedSetError::RootPlacement);
        }

        let structure_id = anchor.structure_id();
        let structure = self.query.get_structure(txn, &structure_id).await?;
        self.ensure_unplaced(txn, &structure_id, element_id).await?;

        let (to, level) = insertion_point(&anchor.bounds(), placement.kind());
        ensure_depth(level, structure.max_levels)?;
        let tree_rgt = self.query.get(txn, &root).await?.rgt();
        ensure_capacity(tree_rgt + 2, level)?;

        self.shift(txn, &root, Shift::open(to, 2)).await?;
        let node = M::build_node(
            structure_id,
            element_id.clone(),
            Some(root),
            Bounds::new(to, to + 1, level),
        )
        .insert(txn)
        .await
        .map_err(|err| NestedSetError::from_write(err, || format!("{element_id:?}")))?;

        debug!(node = ?node.id(), lft = to, level, "inserted node");
        Ok(node)
    }

    /// Relocate a node and its whole subtree, keeping their relative order.
    #[instrument(skip_all, fields(node = ?node_id, placement = ?placement))]
    pub async fn move_node(
        &self,
        db: &DatabaseConnection,
        node_id: &M::Id,
        placement: Placement<M::Id>,
        actor: &Actor,
    ) -> Result<M, NestedSetError> {
        StructureQuery::<M>::ensure_supported(db)?;
        let node = self.query.get(db, node_id).await?;
        let anchor = self.query.get(db, placement.anchor()).await?;
        let structure_id = node.structure_id();
        if anchor.structure_id() != structure_id {
            return Err(NestedSetError::StructureMismatch);
        }
        self.authorize(&structure_id, actor).await?;

        let source = root_of(&node)?;
        let target = root_of(&anchor)?;
        let keys = self.lock_keys(&structure_id, &[&source, &target]);
        let guard = LockedTransaction::acquire(self.config(), db, keys).await?;
        let result = self
            .move_on(guard.connection(), node_id, &placement, &source, &target)
            .await;
        Self::finish(guard, result).await
    }

    async fn move_on(
        &self,
        txn: &DatabaseTransaction,
        node_id: &M::Id,
        placement: &Placement<M::Id>,
        source: &M::Id,
        target: &M::Id,
    ) -> Result<M, NestedSetError> {
        let node = self.query.get(txn, node_id).await?;
        let anchor = self.query.get(txn, placement.anchor()).await?;
        if root_of(&node)? != *source || root_of(&anchor)? != *target {
            return Err(NestedSetError::conflict(
                "tree changed while the move was being prepared",
            ));
        }

        let bounds = node.bounds();
        let same_tree = source == target;
        if same_tree && bounds.contains_or_is(&anchor.bounds()) {
            return Err(NestedSetError::CyclicMove);
        }
        if !placement.is_child_placement() && anchor.level() == 0 {
            return Err(NestedSetError::RootPlacement);
        }

        let (to, level) = insertion_point(&anchor.bounds(), placement.kind());
        if same_tree && MovePlan::is_noop(&bounds, to, level) {
            debug!("node already in place");
            return Ok(node);
        }

        let structure = self.query.get_structure(txn, &node.structure_id()).await?;
        let level_delta = level - bounds.level;
        let deepest = self.query.subtree_max_level(txn, &node).await? + level_delta;
        ensure_depth(deepest, structure.max_levels)?;
        let tree_rgt = self.query.get(txn, target).await?.rgt();
        ensure_capacity(tree_rgt + bounds.width(), deepest)?;

        if same_tree {
            let plan = MovePlan::within_tree(&bounds, to, level);
            self.shift(txn, source, plan.open).await?;
            self.relocate(txn, source, plan.span, plan.offset, plan.level_delta, None)
                .await?;
            self.shift(txn, source, plan.close).await?;
        } else {
            let width = bounds.width();
            self.shift(txn, target, Shift::open(to, width)).await?;
            self.relocate(
                txn,
                source,
                (bounds.lft, bounds.rgt),
                to - bounds.lft,
                level_delta,
                Some(target),
            )
            .await?;
            self.shift(txn, source, Shift::close(bounds.rgt, width))
                .await?;
        }

        debug!(lft = to, level, "moved subtree");
        self.query.get(txn, node_id).await
    }

    /// Detach a subtree into a tree of its own. A root is left untouched.
    #[instrument(skip_all, fields(node = ?node_id))]
    pub async fn move_to_root(
        &self,
        db: &DatabaseConnection,
        node_id: &M::Id,
        actor: &Actor,
    ) -> Result<M, NestedSetError> {
        StructureQuery::<M>::ensure_supported(db)?;
        let node = self.query.get(db, node_id).await?;
        let structure_id = node.structure_id();
        self.authorize(&structure_id, actor).await?;

        let source = root_of(&node)?;
        let keys = self.lock_keys(&structure_id, &[&source]);
        let guard = LockedTransaction::acquire(self.config(), db, keys).await?;
        let result = self
            .move_to_root_on(guard.connection(), node_id, &source)
            .await;
        Self::finish(guard, result).await
    }

    async fn move_to_root_on(
        &self,
        txn: &DatabaseTransaction,
        node_id: &M::Id,
        source: &M::Id,
    ) -> Result<M, NestedSetError> {
        let node = self.query.get(txn, node_id).await?;
        if root_of(&node)? != *source {
            return Err(NestedSetError::conflict(format!(
                "node {node_id:?} moved to another tree"
            )));
        }
        if node.level() == 0 {
            return Ok(node);
        }

        let bounds = node.bounds();
        self.relocate(
            txn,
            source,
            (bounds.lft, bounds.rgt),
            1 - bounds.lft,
            -bounds.level,
            Some(&node.id()),
        )
        .await?;
        self.shift(txn, source, Shift::close(bounds.rgt, bounds.width()))
            .await?;

        debug!("detached subtree into its own tree");
        self.query.get(txn, node_id).await
    }

    /// Remove a node according to `mode`, returning the number of removed rows.
    #[instrument(skip_all, fields(node = ?node_id, mode = ?mode))]
    pub async fn delete_node(
        &self,
        db: &DatabaseConnection,
        node_id: &M::Id,
        mode: DeleteMode,
        actor: &Actor,
    ) -> Result<u64, NestedSetError> {
        StructureQuery::<M>::ensure_supported(db)?;
        let node = self.query.get(db, node_id).await?;
        let structure_id = node.structure_id();
        self.authorize(&structure_id, actor).await?;

        let root = root_of(&node)?;
        let keys = self.lock_keys(&structure_id, &[&root]);
        let guard = LockedTransaction::acquire(self.config(), db, keys).await?;
        let result = self
            .delete_on(guard.connection(), node_id, mode, &root)
            .await;
        Self::finish(guard, result).await
    }

    async fn delete_on(
        &self,
        txn: &DatabaseTransaction,
        node_id: &M::Id,
        mode: DeleteMode,
        expected_root: &M::Id,
    ) -> Result<u64, NestedSetError> {
        let node = self.query.get(txn, node_id).await?;
        let root = root_of(&node)?;
        if root != *expected_root {
            return Err(NestedSetError::conflict(format!(
                "node {node_id:?} moved to another tree"
            )));
        }

        let bounds = node.bounds();
        let removed = match mode {
            DeleteMode::LeafOnly if !bounds.is_leaf() => return Err(NestedSetError::NotLeaf),
            DeleteMode::PromoteChildren if !bounds.is_leaf() => {
                if bounds.level == 0 {
                    return Err(NestedSetError::RootPlacement);
                }
                self.promote_children(txn, &root, &node).await?
            }
            _ => self.delete_subtree(txn, &root, &bounds).await?,
        };

        debug!(removed, "deleted node");
        Ok(removed)
    }

    async fn delete_subtree(
        &self,
        txn: &DatabaseTransaction,
        root: &M::Id,
        bounds: &Bounds,
    ) -> Result<u64, NestedSetError> {
        let deleted = M::Entity::delete_many()
            .filter(
                Condition::all()
                    .add(M::root_column().eq(M::id_to_value(root)))
                    .add(M::left_column().between(bounds.lft, bounds.rgt)),
            )
            .exec(txn)
            .await?;
        self.shift(txn, root, Shift::close(bounds.rgt, bounds.width()))
            .await?;
        Ok(deleted.rows_affected)
    }

    async fn promote_children(
        &self,
        txn: &DatabaseTransaction,
        root: &M::Id,
        node: &M,
    ) -> Result<u64, NestedSetError> {
        let bounds = node.bounds();
        let deleted = M::Entity::delete_many()
            .filter(M::id_column().eq(M::id_to_value(&node.id())))
            .exec(txn)
            .await?;

        let (lft, rgt, level) = (M::left_column(), M::right_column(), M::level_column());
        M::Entity::update_many()
            .col_expr(lft, Expr::col(lft).sub(1))
            .col_expr(rgt, Expr::col(rgt).sub(1))
            .col_expr(level, Expr::col(level).sub(1))
            .filter(
                Condition::all()
                    .add(M::root_column().eq(M::id_to_value(root)))
                    .add(lft.gt(bounds.lft))
                    .add(rgt.lt(bounds.rgt)),
            )
            .exec(txn)
            .await?;
        self.shift(txn, root, Shift::close(bounds.rgt, 2)).await?;
        Ok(deleted.rows_affected)
    }

    /// Move every `lft` and `rgt` of the tree at or beyond `shift.from`.
    async fn shift<C: ConnectionTrait>(
        &self,
        conn: &C,
        root: &M::Id,
        shift: Shift,
    ) -> Result<(), NestedSetError> {
        for column in [M::left_column(), M::right_column()] {
            M::Entity::update_many()
                .col_expr(column, Expr::col(column).add(shift.delta))
                .filter(
                    Condition::all()
                        .add(M::root_column().eq(M::id_to_value(root)))
                        .add(column.gte(shift.from)),
                )
                .exec(conn)
                .await?;
        }
        debug!(root = ?root, from = shift.from, delta = shift.delta, "shifted bounds");
        Ok(())
    }

    /// Offset the nodes whose `lft` lies in `span`, optionally into another tree.
    async fn relocate<C: ConnectionTrait>(
        &self,
        conn: &C,
        root: &M::Id,
        span: (i64, i64),
        offset: i64,
        level_delta: i32,
        new_root: Option<&M::Id>,
    ) -> Result<(), NestedSetError> {
        let (lft, rgt, level) = (M::left_column(), M::right_column(), M::level_column());
        let mut update = M::Entity::update_many()
            .col_expr(lft, Expr::col(lft).add(offset))
            .col_expr(rgt, Expr::col(rgt).add(offset))
            .col_expr(level, Expr::col(level).add(level_delta));
        if let Some(new_root) = new_root {
            update = update.col_expr(M::root_column(), SimpleExpr::Value(M::id_to_value(new_root)));
        }

        update
            .filter(
                Condition::all()
                    .add(M::root_column().eq(M::id_to_value(root)))
                    .add(lft.between(span.0, span.1)),
            )
            .exec(conn)
            .await?;
        Ok(())
    }

    async fn authorize(&self, structure_id: &M::Id, actor: &Actor) -> Result<(), NestedSetError> {
        if self.authorizer.can_edit(structure_id, actor).await {
            Ok(())
        } else {
            warn!(structure = ?structure_id, %actor, "structure edit denied");
            Err(NestedSetError::Unauthorized(format!("{structure_id:?}")))
        }
    }

    async fn ensure_element(&self, element_id: &M::Id) -> Result<(), NestedSetError> {
        if self.elements.element_exists(element_id).await? {
            Ok(())
        } else {
            Err(NestedSetError::ElementNotFound(format!("{element_id:?}")))
        }
    }

    async fn ensure_unplaced<C: ConnectionTrait>(
        &self,
        conn: &C,
        structure_id: &M::Id,
        element_id: &M::Id,
    ) -> Result<(), NestedSetError> {
        match self
            .query
            .find_by_element(conn, structure_id, element_id)
            .await?
        {
            Some(_) => Err(NestedSetError::DuplicateElement(format!("{element_id:?}"))),
            None => Ok(()),
        }
    }

    fn lock_keys(&self, structure_id: &M::Id, roots: &[&M::Id]) -> Vec<String> {
        match self.config().advisory_lock_strategy().key() {
            Some(key) => roots
                .iter()
                .map(|root| key.for_root(structure_id, *root))
                .collect(),
            None => Vec::new(),
        }
    }

    async fn finish<T>(
        guard: LockedTransaction,
        result: Result<T, NestedSetError>,
    ) -> Result<T, NestedSetError> {
        match result {
            Ok(value) => {
                guard.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(error = %err, "rolling back after concurrent modification");
                }
                if let Err(rollback) = guard.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
