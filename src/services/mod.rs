// Ledger and analytics
pub mod analytics;
pub mod stock_ledger;

// Restock recommendation pipeline
pub mod ai_augmentation;
pub mod classification;
pub mod restock_analysis;

// Service factory for dependency injection
pub mod factory;

pub use ai_augmentation::AiAugmentationService;
pub use analytics::AnalyticsService;
pub use factory::{ServiceContainer, ServiceFactory};
pub use restock_analysis::RestockAnalysisService;
pub use stock_ledger::StockLedgerService;
