//! SourceConnection entity model
//!
//! Stored authorization for one (business, source) pair. At most one row per
//! pair exists; writes go through an upsert keyed on that pair.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use crate::crypto::ConnectionScope;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "source_connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub business_id: Uuid,

    pub source_id: Uuid,

    pub user_id: Uuid,

    pub connection_type: ConnectionType,

    pub status: ConnectionStatus,

    /// Sealed JSON `{api_key, api_secret}` for API-key connections
    #[serde(skip)]
    pub credentials_ciphertext: Option<Vec<u8>>,

    #[serde(skip)]
    pub oauth_token_ciphertext: Option<Vec<u8>>,

    #[serde(skip)]
    pub oauth_refresh_token_ciphertext: Option<Vec<u8>>,

    pub token_expires_at: Option<DateTimeWithTimeZone>,

    /// Provider metadata such as `account_id`, or `url` for url connections
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn scope(&self) -> ConnectionScope {
        ConnectionScope {
            user_id: self.user_id,
            business_id: self.business_id,
            source_id: self.source_id,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Provider account id recorded at connect time.
    pub fn account_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("account_id"))
            .and_then(JsonValue::as_str)
            .filter(|account| !account.is_empty())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    #[sea_orm(string_value = "api_key")]
    ApiKey,
    #[sea_orm(string_value = "oauth")]
    #[serde(rename = "oauth")]
    OAuth,
    #[sea_orm(string_value = "url")]
    Url,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "connected")]
    Connected,
    #[sea_orm(string_value = "disconnected")]
    Disconnected,
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
    #[sea_orm(
        belongs_to = "super::source::Entity",
        from = "Column::SourceId",
        to = "super::source::Column::Id"
    )]
    Source,
}

impl Related<super::business::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Business.def()
    }
}

impl Related<super::source::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Source.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
