//! Creates enabled_sources: one opt-in row per (business, source).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EnabledSources::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EnabledSources::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EnabledSources::BusinessId).uuid().not_null())
                    .col(ColumnDef::new(EnabledSources::SourceId).uuid().not_null())
                    .col(ColumnDef::new(EnabledSources::UserId).uuid().not_null())
                    .col(ColumnDef::new(EnabledSources::LocationId).text().null())
                    .col(
                        ColumnDef::new(EnabledSources::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(EnabledSources::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_enabled_sources_business_id")
                            .from(EnabledSources::Table, EnabledSources::BusinessId)
                            .to(Businesses::Table, Businesses::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_enabled_sources_source_id")
                            .from(EnabledSources::Table, EnabledSources::SourceId)
                            .to(Sources::Table, Sources::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_enabled_sources_business_source")
                    .table(EnabledSources::Table)
                    .col(EnabledSources::BusinessId)
                    .col(EnabledSources::SourceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_enabled_sources_business_source")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(EnabledSources::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EnabledSources {
    Table,
    Id,
    BusinessId,
    SourceId,
    UserId,
    LocationId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Businesses {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Sources {
    Table,
    Id,
}
