//! Source entity model
//!
//! Global catalog of review platforms. Rows are seeded from
//! [`SourceKind`](crate::connectors::metadata::SourceKind); the `name` column is
//! the kind's slug.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::connectors::metadata::SourceKind;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sources")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique slug, e.g. `google_business`
    #[sea_orm(unique)]
    pub name: String,

    pub display_name: String,

    pub icon: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Typed kind for this catalog row, `None` for unknown slugs.
    pub fn kind(&self) -> Option<SourceKind> {
        self.name.parse().ok()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
