//! Creates source_connections, the encrypted credential store.
//!
//! The unique (business_id, source_id) index backs the connection upsert.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SourceConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SourceConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SourceConnections::BusinessId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SourceConnections::SourceId).uuid().not_null())
                    .col(ColumnDef::new(SourceConnections::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(SourceConnections::ConnectionType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SourceConnections::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SourceConnections::CredentialsCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SourceConnections::OauthTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SourceConnections::OauthRefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SourceConnections::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SourceConnections::Metadata)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SourceConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SourceConnections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_source_connections_business_id")
                            .from(SourceConnections::Table, SourceConnections::BusinessId)
                            .to(Businesses::Table, Businesses::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_source_connections_source_id")
                            .from(SourceConnections::Table, SourceConnections::SourceId)
                            .to(Sources::Table, Sources::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_source_connections_business_source")
                    .table(SourceConnections::Table)
                    .col(SourceConnections::BusinessId)
                    .col(SourceConnections::SourceId)
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
                    .name("idx_source_connections_business_source")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SourceConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SourceConnections {
    Table,
    Id,
    BusinessId,
    SourceId,
    UserId,
    ConnectionType,
    Status,
    CredentialsCiphertext,
    OauthTokenCiphertext,
    OauthRefreshTokenCiphertext,
    TokenExpiresAt,
    Metadata,
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
