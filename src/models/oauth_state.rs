//! # OAuth State Model
//!
//! Server-side record binding an opaque `state_token` to the user, business and
//! source that started an authorization attempt.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Random CSRF token handed to the provider as `state`
    #[sea_orm(unique)]
    pub state_token: String,

    pub user_id: Uuid,

    pub business_id: Uuid,

    pub source_id: Uuid,

    /// Flipped exactly once by the callback
    pub used: bool,

    pub expires_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::business::Entity",
        from = "Column::BusinessId",
        to = "super::business::Column::Id",
        on_delete = "Cascade"
    )]
    Business,
}

impl Related<super::business::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Business.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Identity recovered from a successfully consumed state token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumedState {
    pub user_id: Uuid,
    pub business_id: Uuid,
    pub source_id: Uuid,
}

impl From<Model> for ConsumedState {
    fn from(model: Model) -> Self {
        Self {
            user_id: model.user_id,
            business_id: model.business_id,
            source_id: model.source_id,
        }
    }
}
