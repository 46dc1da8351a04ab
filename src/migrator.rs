use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_stock_movements_table::Migration),
            Box::new(m20250101_000002_create_stock_positions_table::Migration),
            Box::new(m20250101_000003_create_catalog_tables::Migration),
            Box::new(m20250101_000004_create_analytics_snapshots_table::Migration),
            Box::new(m20250101_000005_create_analysis_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20250101_000001_create_stock_movements_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::StoreId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::ProductId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::VariantId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockMovements::MovementType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::PreviousStock)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::NewStock)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::ReferenceId).uuid().null())
                        .col(
                            ColumnDef::new(StockMovements::ReferenceType)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::OccurredAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::DeletedAt).timestamp().null())
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_position_key")
                        .table(StockMovements::Table)
                        .col(StockMovements::StoreId)
                        .col(StockMovements::ProductId)
                        .col(StockMovements::VariantId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_occurred_at")
                        .table(StockMovements::Table)
                        .col(StockMovements::OccurredAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_variant_id")
                        .table(StockMovements::Table)
                        .col(StockMovements::VariantId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockMovements {
        Table,
        Id,
        StoreId,
        ProductId,
        VariantId,
        MovementType,
        Quantity,
        PreviousStock,
        NewStock,
        ReferenceId,
        ReferenceType,
        OccurredAt,
        DeletedAt,
        CreatedAt,
    }
}

mod m20250101_000002_create_stock_positions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000002_create_stock_positions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockPositions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockPositions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockPositions::StoreId).uuid().not_null())
                        .col(ColumnDef::new(StockPositions::ProductId).uuid().not_null())
                        .col(ColumnDef::new(StockPositions::VariantId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockPositions::CurrentStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockPositions::MinimumStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockPositions::MaximumStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockPositions::ReservedStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockPositions::AvailableStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockPositions::StockTurnoverRate)
                                .double()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockPositions::DaysOfInventory)
                                .double()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockPositions::LowStockAlert)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(StockPositions::OverstockAlert)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(StockPositions::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(StockPositions::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockPositions::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One position row per ledger key
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_positions_key")
                        .table(StockPositions::Table)
                        .col(StockPositions::StoreId)
                        .col(StockPositions::ProductId)
                        .col(StockPositions::VariantId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_positions_low_stock_alert")
                        .table(StockPositions::Table)
                        .col(StockPositions::LowStockAlert)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockPositions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockPositions {
        Table,
        Id,
        StoreId,
        ProductId,
        VariantId,
        CurrentStock,
        MinimumStock,
        MaximumStock,
        ReservedStock,
        AvailableStock,
        StockTurnoverRate,
        DaysOfInventory,
        LowStockAlert,
        OverstockAlert,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000003_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000003_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductVariants::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::ProductId).uuid().not_null())
                        .col(ColumnDef::new(ProductVariants::Sku).string().not_null())
                        .col(ColumnDef::new(ProductVariants::Name).string().not_null())
                        .col(
                            ColumnDef::new(ProductVariants::UnitCost)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::UnitPrice)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(ProductVariants::SupplierId).uuid().null())
                        .col(ColumnDef::new(ProductVariants::Brand).string().null())
                        .col(
                            ColumnDef::new(ProductVariants::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_variants_product_id")
                        .table(ProductVariants::Table)
                        .col(ProductVariants::ProductId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_variants_sku")
                        .table(ProductVariants::Table)
                        .col(ProductVariants::Sku)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Promotions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Promotions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Promotions::Name).string().not_null())
                        .col(
                            ColumnDef::new(Promotions::PromotionType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Promotions::DiscountPercent)
                                .decimal_len(5, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Promotions::SupplierId).uuid().null())
                        .col(ColumnDef::new(Promotions::ProductId).uuid().null())
                        .col(ColumnDef::new(Promotions::VariantId).uuid().null())
                        .col(ColumnDef::new(Promotions::Brand).string().null())
                        .col(ColumnDef::new(Promotions::Status).string().not_null())
                        .col(ColumnDef::new(Promotions::StartsAt).timestamp().not_null())
                        .col(ColumnDef::new(Promotions::EndsAt).timestamp().not_null())
                        .col(
                            ColumnDef::new(Promotions::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Promotions::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_promotions_status")
                        .table(Promotions::Table)
                        .col(Promotions::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_promotions_ends_at")
                        .table(Promotions::Table)
                        .col(Promotions::EndsAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Promotions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ProductVariants {
        Table,
        Id,
        ProductId,
        Sku,
        Name,
        UnitCost,
        UnitPrice,
        SupplierId,
        Brand,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Promotions {
        Table,
        Id,
        Name,
        PromotionType,
        DiscountPercent,
        SupplierId,
        ProductId,
        VariantId,
        Brand,
        Status,
        StartsAt,
        EndsAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000004_create_analytics_snapshots_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000004_create_analytics_snapshots_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductAnalyticsSnapshots::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::VariantId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::SalesVelocity)
                                .double()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::TotalSales)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::SalesPeriodDays)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::CurrentStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::AvailableStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::MinimumStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::MaximumStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::StockTurnoverRate)
                                .double()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::UnitCost)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::UnitPrice)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::ProfitMargin)
                                .double()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::TotalRevenue)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::TotalProfit)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::HasActivePromotion)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::PromotionDiscount)
                                .decimal_len(5, 2)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::PerformanceScore)
                                .double()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::RiskLevel)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::AnalyticsDate)
                                .date()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductAnalyticsSnapshots::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Snapshot identity; recomputing the same key must not duplicate
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_analytics_snapshots_key")
                        .table(ProductAnalyticsSnapshots::Table)
                        .col(ProductAnalyticsSnapshots::ProductId)
                        .col(ProductAnalyticsSnapshots::VariantId)
                        .col(ProductAnalyticsSnapshots::SalesPeriodDays)
                        .col(ProductAnalyticsSnapshots::AnalyticsDate)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_analytics_snapshots_date")
                        .table(ProductAnalyticsSnapshots::Table)
                        .col(ProductAnalyticsSnapshots::AnalyticsDate)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(ProductAnalyticsSnapshots::Table)
                        .to_owned(),
                )
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ProductAnalyticsSnapshots {
        Table,
        Id,
        ProductId,
        VariantId,
        SalesVelocity,
        TotalSales,
        SalesPeriodDays,
        CurrentStock,
        AvailableStock,
        MinimumStock,
        MaximumStock,
        StockTurnoverRate,
        UnitCost,
        UnitPrice,
        ProfitMargin,
        TotalRevenue,
        TotalProfit,
        HasActivePromotion,
        PromotionDiscount,
        PerformanceScore,
        RiskLevel,
        AnalyticsDate,
        CreatedAt,
    }
}

mod m20250101_000005_create_analysis_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000005_create_analysis_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AiAnalyses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AiAnalyses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AiAnalyses::RestockOrderId).uuid().not_null())
                        .col(ColumnDef::new(AiAnalyses::PeriodDays).integer().not_null())
                        .col(ColumnDef::new(AiAnalyses::AnalyticsDate).date().not_null())
                        .col(ColumnDef::new(AiAnalyses::RequestData).json().not_null())
                        .col(ColumnDef::new(AiAnalyses::AiModel).string().not_null())
                        .col(ColumnDef::new(AiAnalyses::AiResponse).json().null())
                        .col(ColumnDef::new(AiAnalyses::AnalysisSummary).text().null())
                        .col(
                            ColumnDef::new(AiAnalyses::RecommendedProducts)
                                .json()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AiAnalyses::PriorityScores).json().not_null())
                        .col(ColumnDef::new(AiAnalyses::Status).string().not_null())
                        .col(ColumnDef::new(AiAnalyses::ConfidenceScore).double().null())
                        .col(ColumnDef::new(AiAnalyses::ProcessedAt).timestamp().null())
                        .col(ColumnDef::new(AiAnalyses::DeletedAt).timestamp().null())
                        .col(ColumnDef::new(AiAnalyses::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(AiAnalyses::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            // Not unique: failed runs may pile up for the same key
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_ai_analyses_idempotency_key")
                        .table(AiAnalyses::Table)
                        .col(AiAnalyses::RestockOrderId)
                        .col(AiAnalyses::PeriodDays)
                        .col(AiAnalyses::AnalyticsDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_ai_analyses_status")
                        .table(AiAnalyses::Table)
                        .col(AiAnalyses::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RestockRecommendations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RestockRecommendations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::AiAnalysisId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::VariantId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::Category)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::PriorityScore)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::RecommendedQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::Reasoning)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::ConfidenceLevel)
                                .double()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::CurrentStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::CurrentSalesVelocity)
                                .double()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::CurrentProfitMargin)
                                .double()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::HasActivePromotion)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::IsImplemented)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::DeletedAt)
                                .timestamp()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockRecommendations::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_restock_recommendations_analysis_id")
                                .from(
                                    RestockRecommendations::Table,
                                    RestockRecommendations::AiAnalysisId,
                                )
                                .to(AiAnalyses::Table, AiAnalyses::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_restock_recommendations_analysis_id")
                        .table(RestockRecommendations::Table)
                        .col(RestockRecommendations::AiAnalysisId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_restock_recommendations_variant")
                        .table(RestockRecommendations::Table)
                        .col(RestockRecommendations::ProductId)
                        .col(RestockRecommendations::VariantId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RestockRecommendations::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(AiAnalyses::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum AiAnalyses {
        Table,
        Id,
        RestockOrderId,
        PeriodDays,
        AnalyticsDate,
        RequestData,
        AiModel,
        AiResponse,
        AnalysisSummary,
        RecommendedProducts,
        PriorityScores,
        Status,
        ConfidenceScore,
        ProcessedAt,
        DeletedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum RestockRecommendations {
        Table,
        Id,
        AiAnalysisId,
        ProductId,
        VariantId,
        Category,
        PriorityScore,
        RecommendedQuantity,
        Reasoning,
        ConfidenceLevel,
        CurrentStock,
        CurrentSalesVelocity,
        CurrentProfitMargin,
        HasActivePromotion,
        IsImplemented,
        DeletedAt,
        CreatedAt,
        UpdatedAt,
    }
}

// Database migration CLI runner
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    let result = Migrator::up(&db, None).await;

    match result {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
