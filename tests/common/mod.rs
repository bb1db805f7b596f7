#![allow(dead_code)]

use nested_set::{Actor, NestedSetError, NestedSetRepository};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    QueryOrder, Statement,
};

pub mod entity {
    pub mod structure {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "structures")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub max_levels: Option<i32>,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod structure_element {
        use nested_set::NestedSetModelDerive as NestedSetModel;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, NestedSetModel)]
        #[sea_orm(table_name = "structure_elements")]
        #[nested_set(
            structure_module = "crate::common::entity::structure",
            lock_timeout_ms = 1000
        )]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub structure_id: i32,
            pub element_id: i32,
            pub root: Option<i32>,
            pub lft: i64,
            pub rgt: i64,
            pub level: i32,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

pub type Node = entity::structure_element::Model;
pub type Repo = NestedSetRepository<Node>;

pub fn editor() -> Actor {
    Actor::new("editor")
}

pub fn guest() -> Actor {
    Actor::new("guest")
}

/// Guests may not edit; only positive element ids exist.
pub fn repository() -> Repo {
    NestedSetRepository::new(
        |_: &i32, actor: &Actor| actor.as_str() != "guest",
        |element_id: &i32| *element_id > 0,
    )
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn sqlite() -> Result<DatabaseConnection, DbErr> {
    // One connection keeps the in-memory database alive and shared.
    let db = connect_sqlite("sqlite::memory:").await?;
    create_schema(&db).await?;
    Ok(db)
}

/// Single-connection pool on `url`, without creating any table.
pub async fn connect_sqlite(url: &str) -> Result<DatabaseConnection, DbErr> {
    init_tracing();

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    Database::connect(options).await
}

/// URL of a SQLite file inside `dir`, created on first connect.
pub fn sqlite_file_url(dir: &std::path::Path) -> String {
    format!("sqlite://{}?mode=rwc", dir.join("nested_set.db").display())
}

pub async fn create_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    for sql in [
        "CREATE TABLE structures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            max_levels INTEGER
        )",
        "CREATE TABLE structure_elements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            structure_id INTEGER NOT NULL REFERENCES structures(id),
            element_id INTEGER NOT NULL,
            root INTEGER,
            lft BIGINT NOT NULL,
            rgt BIGINT NOT NULL,
            level INTEGER NOT NULL,
            UNIQUE (structure_id, element_id)
        )",
        "CREATE INDEX structure_elements_root_lft ON structure_elements (root, lft)",
        "CREATE INDEX structure_elements_root_rgt ON structure_elements (root, rgt)",
    ] {
        db.execute(Statement::from_string(DbBackend::Sqlite, sql))
            .await?;
    }
    Ok(())
}

/// Every row as (element, lft, rgt, level, root), in id order.
pub async fn snapshot(db: &DatabaseConnection) -> Result<Vec<(i32, i64, i64, i32, Option<i32>)>, DbErr> {
    let rows = entity::structure_element::Entity::find()
        .order_by_asc(entity::structure_element::Column::Id)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.element_id, row.lft, row.rgt, row.level, row.root))
        .collect())
}

pub fn elements(nodes: &[Node]) -> Vec<i32> {
    nodes.iter().map(|node| node.element_id).collect()
}

pub fn bounds(node: &Node) -> (i64, i64, i32) {
    (node.lft, node.rgt, node.level)
}

/// Parent/child/order shape of the tree under `node_id`, keyed by element ids.
pub async fn shape(
    db: &DatabaseConnection,
    repo: &Repo,
    node_id: i32,
) -> Result<Vec<(i32, Option<i32>)>, NestedSetError> {
    let query = repo.query();
    let mut shape = Vec::new();
    for node in query.tree(db, &node_id).await? {
        let parent = query.parent(db, &node.id).await?;
        shape.push((node.element_id, parent.map(|parent| parent.element_id)));
    }
    Ok(shape)
}

/// R(100) with C1(1) holding G1(11), G2(12), followed by C2(2) and C3(3).
pub struct Sample {
    pub structure: i32,
    pub root: Node,
    pub c1: Node,
    pub g1: Node,
    pub g2: Node,
    pub c2: Node,
    pub c3: Node,
}

pub async fn sample(
    db: &DatabaseConnection,
    repo: &Repo,
    max_levels: Option<i32>,
) -> Result<Sample, NestedSetError> {
    let actor = editor();
    let structure = repo.create_structure(db, max_levels).await?;
    let root = repo.make_root(db, &structure.id, &100, &actor).await?;
    let c1 = repo.append_to(db, &root.id, &1, &actor).await?;
    let c2 = repo.append_to(db, &root.id, &2, &actor).await?;
    let c3 = repo.append_to(db, &root.id, &3, &actor).await?;
    let g1 = repo.append_to(db, &c1.id, &11, &actor).await?;
    let g2 = repo.append_to(db, &c1.id, &12, &actor).await?;

    let query = repo.query();
    Ok(Sample {
        structure: structure.id,
        root: query.get(db, &root.id).await?,
        c1: query.get(db, &c1.id).await?,
        g1,
        g2,
        c2: query.get(db, &c2.id).await?,
        c3: query.get(db, &c3.id).await?,
    })
}
