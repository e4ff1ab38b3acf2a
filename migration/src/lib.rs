//! Database migrations for the ReviewDesk API.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_businesses;
mod m2025_06_01_000002_create_sources;
mod m2025_06_01_000003_create_enabled_sources;
mod m2025_06_01_000004_create_source_connections;
mod m2025_06_01_000005_create_oauth_states;
mod m2025_06_01_000006_create_reviews;
mod m2025_06_01_000007_create_generated_responses;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_businesses::Migration),
            Box::new(m2025_06_01_000002_create_sources::Migration),
            Box::new(m2025_06_01_000003_create_enabled_sources::Migration),
            Box::new(m2025_06_01_000004_create_source_connections::Migration),
            Box::new(m2025_06_01_000005_create_oauth_states::Migration),
            Box::new(m2025_06_01_000006_create_reviews::Migration),
            Box::new(m2025_06_01_000007_create_generated_responses::Migration),
        ]
    }
}
