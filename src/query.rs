use std::marker::PhantomData;

use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DbBackend, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use tracing::instrument;

use crate::bounds::{check_tree, Bounds};
use crate::error::NestedSetError;
use crate::traits::{NestedSetModel, Structure};

/// Read-only traversal over the nested-set encoding.
///
/// Every lookup takes ids and re-reads the node, so results always reflect the
/// committed `lft`/`rgt`/`level` values rather than a stale copy.
#[derive(Debug)]
pub struct StructureQuery<M>
where
    M: NestedSetModel,
{
    _marker: PhantomData<M>,
}

impl<M> Default for StructureQuery<M>
where
    M: NestedSetModel,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for StructureQuery<M>
where
    M: NestedSetModel,
{
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<M> StructureQuery<M>
where
    M: NestedSetModel,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub(crate) fn ensure_supported(conn: &impl ConnectionTrait) -> Result<(), NestedSetError> {
        match conn.get_database_backend() {
            DbBackend::Postgres | DbBackend::Sqlite => Ok(()),
            _ => Err(NestedSetError::UnsupportedBackend),
        }
    }

    pub async fn structure<C: ConnectionTrait>(
        &self,
        conn: &C,
        structure_id: &M::Id,
    ) -> Result<Option<Structure<M::Id>>, NestedSetError> {
        Self::ensure_supported(conn)?;
        let model = M::StructureEntity::find()
            .filter(M::structure_id_column().eq(M::id_to_value(structure_id)))
            .one(conn)
            .await?;
        Ok(model.as_ref().map(Structure::from_model::<M>))
    }

    pub(crate) async fn get_structure<C: ConnectionTrait>(
        &self,
        conn: &C,
        structure_id: &M::Id,
    ) -> Result<Structure<M::Id>, NestedSetError> {
        self.structure(conn, structure_id)
            .await?
            .ok_or_else(|| NestedSetError::StructureNotFound(format!("{structure_id:?}")))
    }

    pub async fn find<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<Option<M>, NestedSetError> {
        Self::ensure_supported(conn)?;
        let node = M::Entity::find()
            .filter(M::id_column().eq(M::id_to_value(node_id)))
            .one(conn)
            .await?;
        Ok(node)
    }

    /// Like [`find`](Self::find), with a miss reported as `NodeNotFound`.
    pub async fn get<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<M, NestedSetError> {
        self.find(conn, node_id)
            .await?
            .ok_or_else(|| NestedSetError::NodeNotFound(format!("{node_id:?}")))
    }

    pub async fn find_by_element<C: ConnectionTrait>(
        &self,
        conn: &C,
        structure_id: &M::Id,
        element_id: &M::Id,
    ) -> Result<Option<M>, NestedSetError> {
        Self::ensure_supported(conn)?;
        let node = M::Entity::find()
            .filter(
                Condition::all()
                    .add(M::structure_column().eq(M::id_to_value(structure_id)))
                    .add(M::element_column().eq(M::id_to_value(element_id))),
            )
            .one(conn)
            .await?;
        Ok(node)
    }

    /// Root nodes of every tree in the structure, oldest tree first.
    #[instrument(level = "debug", skip_all, fields(structure = ?structure_id))]
    pub async fn roots<C: ConnectionTrait>(
        &self,
        conn: &C,
        structure_id: &M::Id,
    ) -> Result<Vec<M>, NestedSetError> {
        Self::ensure_supported(conn)?;
        let rows = M::Entity::find()
            .filter(
                Condition::all()
                    .add(M::structure_column().eq(M::id_to_value(structure_id)))
                    .add(M::level_column().eq(0)),
            )
            .order_by_asc(M::root_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// Ancestors from the root down to the parent. `depth_limit` keeps only the
    /// nearest `n` of them.
    #[instrument(level = "debug", skip_all, fields(node = ?node_id, depth_limit = ?depth_limit))]
    pub async fn ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
        depth_limit: Option<i32>,
    ) -> Result<Vec<M>, NestedSetError> {
        let node = self.get(conn, node_id).await?;
        self.ancestors_of(conn, &node, depth_limit).await
    }

    pub(crate) async fn ancestors_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
        depth_limit: Option<i32>,
    ) -> Result<Vec<M>, NestedSetError> {
        let mut condition = Self::in_tree(node)?
            .add(M::left_column().lt(node.lft()))
            .add(M::right_column().gt(node.rgt()));
        if let Some(limit) = depth_limit {
            condition = condition.add(M::level_column().gte(node.level() - limit));
        }

        let rows = M::Entity::find()
            .filter(condition)
            .order_by_asc(M::left_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    pub async fn parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<Option<M>, NestedSetError> {
        let node = self.get(conn, node_id).await?;
        self.parent_of(conn, &node).await
    }

    async fn parent_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
    ) -> Result<Option<M>, NestedSetError> {
        if node.level() == 0 {
            return Ok(None);
        }
        let mut ancestors = self.ancestors_of(conn, node, Some(1)).await?;
        Ok(ancestors.pop())
    }

    /// Descendants in pre-order. `depth_limit` keeps only the first `n` levels below the node.
    #[instrument(level = "debug", skip_all, fields(node = ?node_id, depth_limit = ?depth_limit))]
    pub async fn descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
        depth_limit: Option<i32>,
    ) -> Result<Vec<M>, NestedSetError> {
        let node = self.get(conn, node_id).await?;
        self.descendants_of(conn, &node, depth_limit).await
    }

    async fn descendants_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
        depth_limit: Option<i32>,
    ) -> Result<Vec<M>, NestedSetError> {
        let mut condition = Self::in_tree(node)?
            .add(M::left_column().gt(node.lft()))
            .add(M::right_column().lt(node.rgt()));
        if let Some(limit) = depth_limit {
            condition = condition.add(M::level_column().lte(node.level() + limit));
        }

        let rows = M::Entity::find()
            .filter(condition)
            .order_by_asc(M::left_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    pub async fn children<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<Vec<M>, NestedSetError> {
        let node = self.get(conn, node_id).await?;
        self.descendants_of(conn, &node, Some(1)).await
    }

    /// Descendants without children of their own.
    pub async fn leaves<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<Vec<M>, NestedSetError> {
        let descendants = self.descendants(conn, node_id, None).await?;
        Ok(descendants
            .into_iter()
            .filter(|node| node.bounds().is_leaf())
            .collect())
    }

    /// Nodes sharing the node's parent, excluding the node itself. For a root,
    /// the other roots of its structure.
    #[instrument(level = "debug", skip_all, fields(node = ?node_id))]
    pub async fn siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<Vec<M>, NestedSetError> {
        let node = self.get(conn, node_id).await?;
        let id = node.id();

        let rows = match self.parent_of(conn, &node).await? {
            Some(parent) => self.descendants_of(conn, &parent, Some(1)).await?,
            None => self.roots(conn, &node.structure_id()).await?,
        };
        Ok(rows.into_iter().filter(|row| row.id() != id).collect())
    }

    pub async fn prev_sibling<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<Option<M>, NestedSetError> {
        let node = self.get(conn, node_id).await?;
        if node.level() == 0 {
            let roots = self.roots(conn, &node.structure_id()).await?;
            let position = roots.iter().position(|root| root.id() == node.id());
            return Ok(position
                .and_then(|index| index.checked_sub(1))
                .map(|index| roots[index].clone()));
        }

        let sibling = M::Entity::find()
            .filter(Self::in_tree(&node)?.add(M::right_column().eq(node.lft() - 1)))
            .one(conn)
            .await?;
        Ok(sibling)
    }

    pub async fn next_sibling<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<Option<M>, NestedSetError> {
        let node = self.get(conn, node_id).await?;
        if node.level() == 0 {
            let roots = self.roots(conn, &node.structure_id()).await?;
            let position = roots.iter().position(|root| root.id() == node.id());
            return Ok(position.and_then(|index| roots.get(index + 1).cloned()));
        }

        let sibling = M::Entity::find()
            .filter(Self::in_tree(&node)?.add(M::left_column().eq(node.rgt() + 1)))
            .one(conn)
            .await?;
        Ok(sibling)
    }

    /// Every node of the tree containing `node_id`, in pre-order.
    pub async fn tree<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<Vec<M>, NestedSetError> {
        let node = self.get(conn, node_id).await?;
        let rows = M::Entity::find()
            .filter(Self::in_tree(&node)?)
            .order_by_asc(M::left_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// Pure interval containment; no database access.
    pub fn is_ancestor_of(ancestor: &M, node: &M) -> bool {
        ancestor.root().is_some()
            && ancestor.root() == node.root()
            && ancestor.bounds().is_ancestor_of(&node.bounds())
    }

    /// Load the tree containing `node_id` and check every nested-set invariant.
    #[instrument(level = "debug", skip_all, fields(node = ?node_id))]
    pub async fn verify_tree<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<(), NestedSetError> {
        let nodes = self.tree(conn, node_id).await?;
        let bounds: Vec<Bounds> = nodes.iter().map(|node| node.bounds()).collect();
        check_tree(&bounds).map_err(NestedSetError::invariant)
    }

    /// Deepest level inside the node's subtree, the node included.
    pub(crate) async fn subtree_max_level<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
    ) -> Result<i32, NestedSetError> {
        let max: Option<Option<i32>> = M::Entity::find()
            .select_only()
            .column_as(M::level_column().max(), "max_level")
            .filter(
                Self::in_tree(node)?
                    .add(M::left_column().gte(node.lft()))
                    .add(M::right_column().lte(node.rgt())),
            )
            .into_tuple()
            .one(conn)
            .await?;
        Ok(max.flatten().unwrap_or(node.level()))
    }

    pub(crate) fn in_tree(node: &M) -> Result<Condition, NestedSetError> {
        let root = root_of(node)?;
        Ok(Condition::all().add(M::root_column().eq(M::id_to_value(&root))))
    }
}

pub(crate) fn root_of<M: NestedSetModel>(node: &M) -> Result<M::Id, NestedSetError> {
    node.root().ok_or_else(|| {
        NestedSetError::invariant(format!("node {:?} has no root assigned", node.id()))
    })
}
