//! Review platform catalog seeding

use anyhow::{Context, Result};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::connectors::SourceKind;
use crate::repositories::SourceRepository;

/// Inserts every known platform, refreshing display fields of existing rows.
///
/// Safe to run on every start; row ids never change.
pub async fn seed_sources(db: &DatabaseConnection) -> Result<()> {
    let repo = SourceRepository::new(Arc::new(db.clone()));

    for kind in SourceKind::ALL {
        repo.upsert_kind(kind)
            .await
            .with_context(|| format!("seeding source '{}'", kind.slug()))?;
        log::debug!("Seeded source: {}", kind.slug());
    }

    log::info!("Source catalog seeded ({} platforms)", SourceKind::ALL.len());
    Ok(())
}
