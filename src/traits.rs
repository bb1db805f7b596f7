use std::fmt::Debug;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel, Value,
};

use crate::bounds::Bounds;
use crate::config::NestedSetConfig;

/// Trait implemented by SeaORM `Model` types that store nested-set nodes.
///
/// Implementations are normally provided by the `#[derive(NestedSetModel)]` macro,
/// which also binds the companion structure entity carrying `max_levels`.
pub trait NestedSetModel:
    Clone + Send + Sync + 'static + IntoActiveModel<Self::ActiveModel> + FromQueryResult
{
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send;
    /// Key type shared by nodes, structures and elements.
    type Id: Clone + Debug + PartialEq + Send + Sync + 'static;

    type StructureEntity: EntityTrait<Model = Self::StructureModel>;
    type StructureModel: Clone
        + Send
        + Sync
        + 'static
        + FromQueryResult
        + IntoActiveModel<Self::StructureActiveModel>;
    type StructureActiveModel: ActiveModelTrait<Entity = Self::StructureEntity>
        + ActiveModelBehavior
        + Send;

    fn nested_set_config() -> &'static NestedSetConfig;

    fn id(&self) -> Self::Id;
    fn structure_id(&self) -> Self::Id;
    fn element_id(&self) -> Self::Id;
    /// Id of the root node of this node's tree. Only unset while a root is being created.
    fn root(&self) -> Option<Self::Id>;
    fn lft(&self) -> i64;
    fn rgt(&self) -> i64;
    fn level(&self) -> i32;
    fn id_to_value(id: &Self::Id) -> Value;

    fn bounds(&self) -> Bounds {
        Bounds::new(self.lft(), self.rgt(), self.level())
    }

    fn build_node(
        structure_id: Self::Id,
        element_id: Self::Id,
        root: Option<Self::Id>,
        bounds: Bounds,
    ) -> Self::ActiveModel;

    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn structure_column() -> <Self::Entity as EntityTrait>::Column;
    fn element_column() -> <Self::Entity as EntityTrait>::Column;
    fn root_column() -> <Self::Entity as EntityTrait>::Column;
    fn left_column() -> <Self::Entity as EntityTrait>::Column;
    fn right_column() -> <Self::Entity as EntityTrait>::Column;
    fn level_column() -> <Self::Entity as EntityTrait>::Column;

    fn structure_id_column() -> <Self::StructureEntity as EntityTrait>::Column;
    fn structure_model_id(model: &Self::StructureModel) -> Self::Id;
    fn structure_max_levels(model: &Self::StructureModel) -> Option<i32>;
    fn structure_build_row(max_levels: Option<i32>) -> Self::StructureActiveModel;
}

/// One hierarchy instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Structure<Id> {
    pub id: Id,
    /// Number of levels a tree may span, counting the root level. `None` is unlimited.
    pub max_levels: Option<i32>,
}

impl<Id> Structure<Id> {
    pub(crate) fn from_model<M>(model: &M::StructureModel) -> Self
    where
        M: NestedSetModel<Id = Id>,
    {
        Self {
            id: M::structure_model_id(model),
            max_levels: M::structure_max_levels(model).filter(|max| *max > 0),
        }
    }
}
