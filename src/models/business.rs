//! Business entity model
//!
//! A business is the root of all tenant-owned review data. Only ownership is
//! modelled here; profile fields are managed elsewhere.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "businesses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    pub name: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::review::Entity")]
    Review,
    #[sea_orm(has_many = "super::source_connection::Entity")]
    SourceConnection,
    #[sea_orm(has_many = "super::enabled_source::Entity")]
    EnabledSource,
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Review.def()
    }
}

impl Related<super::source_connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SourceConnection.def()
    }
}

impl Related<super::enabled_source::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EnabledSource.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
