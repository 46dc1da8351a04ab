use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        ai_augmentation::AiAugmentationService, analytics::AnalyticsService,
        restock_analysis::RestockAnalysisService, stock_ledger::StockLedgerService,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    config: AppConfig,
}

impl ServiceFactory {
    /// Creates a new service factory with the given dependencies
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: AppConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            config,
        }
    }

    /// Creates a stock ledger service instance
    pub fn stock_ledger_service(&self) -> StockLedgerService {
        StockLedgerService::new(
            self.db_pool.clone(),
            Arc::new(self.event_sender.clone()),
            self.config.analytics.default_period_days,
        )
    }

    /// Creates an analytics service instance
    pub fn analytics_service(&self) -> AnalyticsService {
        AnalyticsService::new(
            self.db_pool.clone(),
            Arc::new(self.event_sender.clone()),
            self.config.analytics.clone(),
        )
    }

    /// Creates an AI augmentation adapter
    pub fn ai_augmentation_service(&self) -> Result<AiAugmentationService, ServiceError> {
        AiAugmentationService::new(self.config.ai.clone())
    }

    /// Creates a restock analysis service instance
    pub fn restock_analysis_service(&self) -> Result<RestockAnalysisService, ServiceError> {
        Ok(RestockAnalysisService::new(
            self.db_pool.clone(),
            Arc::new(self.event_sender.clone()),
            self.analytics_service(),
            self.ai_augmentation_service()?,
        ))
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }

    /// Gets a reference to the event sender
    pub fn event_sender(&self) -> &EventSender {
        &self.event_sender
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub stock_ledger: Arc<StockLedgerService>,
    pub analytics: Arc<AnalyticsService>,
    pub restock_analysis: Arc<RestockAnalysisService>,
}

impl ServiceContainer {
    /// Creates a new service container with all services initialized
    pub fn new(factory: &ServiceFactory) -> Result<Self, ServiceError> {
        Ok(Self {
            stock_ledger: Arc::new(factory.stock_ledger_service()),
            analytics: Arc::new(factory.analytics_service()),
            restock_analysis: Arc::new(factory.restock_analysis_service()?),
        })
    }
}
