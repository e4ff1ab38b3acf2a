//! Creates generated_responses; the unique review_id index makes the
//! review-to-response relation one-to-one.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GeneratedResponses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GeneratedResponses::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(GeneratedResponses::ReviewId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GeneratedResponses::ResponseText)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GeneratedResponses::ApprovalStatus)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(GeneratedResponses::AiModelUsed)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(GeneratedResponses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(GeneratedResponses::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_generated_responses_review_id")
                            .from(GeneratedResponses::Table, GeneratedResponses::ReviewId)
                            .to(Reviews::Table, Reviews::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_generated_responses_review_id")
                    .table(GeneratedResponses::Table)
                    .col(GeneratedResponses::ReviewId)
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
                    .name("idx_generated_responses_review_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(GeneratedResponses::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum GeneratedResponses {
    Table,
    Id,
    ReviewId,
    ResponseText,
    ApprovalStatus,
    AiModelUsed,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Reviews {
    Table,
    Id,
}
