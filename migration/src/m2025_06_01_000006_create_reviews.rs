//! Creates reviews.
//!
//! `(business_id, source_id, external_review_id)` is unique. NULL external ids
//! (manual entries) never collide because NULLs are distinct in unique indexes
//! on both Postgres and SQLite.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reviews::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Reviews::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Reviews::BusinessId).uuid().not_null())
                    .col(ColumnDef::new(Reviews::UserId).uuid().not_null())
                    .col(ColumnDef::new(Reviews::SourceId).uuid().null())
                    .col(ColumnDef::new(Reviews::SourcePlatform).text().not_null())
                    .col(ColumnDef::new(Reviews::ExternalReviewId).text().null())
                    .col(ColumnDef::new(Reviews::ReviewerName).text().not_null())
                    .col(ColumnDef::new(Reviews::Rating).integer().not_null())
                    .col(
                        ColumnDef::new(Reviews::ReviewText)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Reviews::ReviewDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Reviews::Sentiment).text().null())
                    .col(
                        ColumnDef::new(Reviews::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Reviews::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Reviews::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .check(Expr::col(Reviews::Rating).between(1, 5))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reviews_business_id")
                            .from(Reviews::Table, Reviews::BusinessId)
                            .to(Businesses::Table, Businesses::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reviews_source_id")
                            .from(Reviews::Table, Reviews::SourceId)
                            .to(Sources::Table, Sources::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reviews_business_source_external")
                    .table(Reviews::Table)
                    .col(Reviews::BusinessId)
                    .col(Reviews::SourceId)
                    .col(Reviews::ExternalReviewId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reviews_business_date")
                    .table(Reviews::Table)
                    .col(Reviews::BusinessId)
                    .col(Reviews::ReviewDate)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_reviews_business_date").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_reviews_business_source_external")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Reviews::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Reviews {
    Table,
    Id,
    BusinessId,
    UserId,
    SourceId,
    SourcePlatform,
    ExternalReviewId,
    ReviewerName,
    Rating,
    ReviewText,
    ReviewDate,
    Sentiment,
    Status,
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
