use crate::{
    db::DbPool,
    entities::ai_analysis::{self, AnalysisStatus},
    entities::product_analytics_snapshot,
    entities::restock_recommendation,
    errors::ServiceError,
    events::{Event, EventSender},
    services::ai_augmentation::{
        merge, AiAugmentationService, AiBatchRequest, AiResponse, BaselineItem,
        MergedRecommendation,
    },
    services::analytics::AnalyticsService,
    services::classification,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use prometheus::IntCounter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Select,
    Set, TransactionError, TransactionTrait,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

lazy_static! {
    static ref ANALYSES_COMPLETED: IntCounter = IntCounter::new(
        "restock_analyses_completed_total",
        "Total number of completed restock analyses"
    )
    .expect("metric can be created");
    static ref ANALYSES_FAILED: IntCounter = IntCounter::new(
        "restock_analyses_failed_total",
        "Total number of failed restock analyses"
    )
    .expect("metric can be created");
    static ref AI_FALLBACKS: IntCounter = IntCounter::new(
        "restock_analysis_ai_fallbacks_total",
        "Total number of analyses completed without AI augmentation"
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AnalysisKey {
    restock_order_id: Uuid,
    period_days: i32,
    analytics_date: NaiveDate,
}

enum ClaimOutcome {
    Existing(ai_analysis::Model),
    Claimed(ai_analysis::Model),
}

fn existing_query(key: AnalysisKey) -> Select<ai_analysis::Entity> {
    ai_analysis::Entity::find()
        .filter(ai_analysis::Column::RestockOrderId.eq(key.restock_order_id))
        .filter(ai_analysis::Column::PeriodDays.eq(key.period_days))
        .filter(ai_analysis::Column::AnalyticsDate.eq(key.analytics_date))
        .filter(ai_analysis::Column::Status.ne(AnalysisStatus::Failed))
        .filter(ai_analysis::Column::DeletedAt.is_null())
}

/// Orchestrates one restock analysis run: snapshots, deterministic baseline,
/// best-effort AI augmentation and the atomic recommendation batch. Runs for
/// the same (restock order, period, date) key serialize; distinct keys
/// proceed in parallel.
#[derive(Clone)]
pub struct RestockAnalysisService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    analytics: AnalyticsService,
    ai: AiAugmentationService,
    analysis_locks: Arc<DashMap<AnalysisKey, Arc<Mutex<()>>>>,
}

impl RestockAnalysisService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        analytics: AnalyticsService,
        ai: AiAugmentationService,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            analytics,
            ai,
            analysis_locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, key: AnalysisKey) -> Arc<Mutex<()>> {
        self.analysis_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs (or returns) the analysis for one idempotency key. A repeated
    /// call while a run is pending, processing or completed returns the
    /// existing record; only failed runs are retried with a fresh record.
    /// AI trouble degrades to deterministic-only output, it never fails the
    /// run.
    #[instrument(skip(self))]
    pub async fn run_analysis(
        &self,
        restock_order_id: Uuid,
        period_days: i32,
        now: DateTime<Utc>,
    ) -> Result<ai_analysis::Model, ServiceError> {
        if period_days <= 0 {
            return Err(ServiceError::ValidationError(
                "period_days must be positive".to_string(),
            ));
        }

        let key = AnalysisKey {
            restock_order_id,
            period_days,
            analytics_date: now.date_naive(),
        };
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let analysis = match self.claim(key, now).await? {
            ClaimOutcome::Existing(existing) => {
                info!(
                    analysis_id = %existing.id,
                    restock_order_id = %restock_order_id,
                    status = ?existing.status,
                    "Returning existing analysis for idempotency key"
                );
                return Ok(existing);
            }
            ClaimOutcome::Claimed(claimed) => claimed,
        };

        self.event_sender
            .send(Event::AnalysisStarted(analysis.id))
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))?;

        match self.run_pipeline(&analysis, period_days, now).await {
            Ok(completed) => Ok(completed),
            // Storage faults leave the row in processing for the recovery
            // pass; anything else is a terminal failure of this run.
            Err(err @ ServiceError::DatabaseError(_)) => Err(err),
            Err(err) => {
                self.mark_failed(analysis.id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Fails any run stuck in processing for longer than the grace period.
    /// Returns the number of recovered rows.
    #[instrument(skip(self))]
    pub async fn recover_abandoned(
        &self,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let cutoff = now - grace;
        let db = self.db_pool.as_ref();

        let abandoned = ai_analysis::Entity::find()
            .filter(ai_analysis::Column::Status.eq(AnalysisStatus::Processing))
            .filter(ai_analysis::Column::UpdatedAt.lt(cutoff))
            .filter(ai_analysis::Column::DeletedAt.is_null())
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        if abandoned.is_empty() {
            return Ok(0);
        }

        let updated = ai_analysis::Entity::update_many()
            .col_expr(
                ai_analysis::Column::Status,
                Expr::value(AnalysisStatus::Failed),
            )
            .col_expr(
                ai_analysis::Column::AnalysisSummary,
                Expr::value(format!(
                    "Abandoned in processing for more than {}s; failed by recovery pass",
                    grace.num_seconds()
                )),
            )
            .col_expr(ai_analysis::Column::ProcessedAt, Expr::value(now))
            .col_expr(ai_analysis::Column::UpdatedAt, Expr::value(now))
            .filter(ai_analysis::Column::Status.eq(AnalysisStatus::Processing))
            .filter(ai_analysis::Column::UpdatedAt.lt(cutoff))
            .filter(ai_analysis::Column::DeletedAt.is_null())
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        warn!(
            recovered = updated.rows_affected,
            "Failed abandoned processing analyses"
        );
        for analysis in &abandoned {
            ANALYSES_FAILED.inc();
            if let Err(e) = self
                .event_sender
                .send(Event::AnalysisFailed {
                    analysis_id: analysis.id,
                    reason: "abandoned in processing".to_string(),
                })
                .await
            {
                warn!(error = %e, "Failed to send analysis failed event");
            }
        }
        Ok(updated.rows_affected)
    }

    /// Analysis by id, excluding soft-deleted rows.
    pub async fn get_analysis(&self, analysis_id: Uuid) -> Result<ai_analysis::Model, ServiceError> {
        ai_analysis::Entity::find_by_id(analysis_id)
            .filter(ai_analysis::Column::DeletedAt.is_null())
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Analysis {} not found", analysis_id)))
    }

    /// Recommendations for an analysis, highest priority first.
    pub async fn recommendations_for(
        &self,
        analysis_id: Uuid,
    ) -> Result<Vec<restock_recommendation::Model>, ServiceError> {
        restock_recommendation::Entity::find()
            .filter(restock_recommendation::Column::AiAnalysisId.eq(analysis_id))
            .filter(restock_recommendation::Column::DeletedAt.is_null())
            .order_by_desc(restock_recommendation::Column::PriorityScore)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// The one mutation a persisted recommendation allows. Idempotent.
    #[instrument(skip(self))]
    pub async fn mark_recommendation_implemented(
        &self,
        recommendation_id: Uuid,
    ) -> Result<restock_recommendation::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let recommendation = restock_recommendation::Entity::find_by_id(recommendation_id)
            .filter(restock_recommendation::Column::DeletedAt.is_null())
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Recommendation {} not found",
                    recommendation_id
                ))
            })?;

        if recommendation.is_implemented {
            return Ok(recommendation);
        }

        let mut active: restock_recommendation::ActiveModel = recommendation.into();
        active.is_implemented = Set(true);
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await.map_err(ServiceError::db_error)?;

        info!(recommendation_id = %updated.id, "Recommendation marked implemented");
        self.event_sender
            .send(Event::RecommendationImplemented(updated.id))
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))?;

        Ok(updated)
    }

    /// Creates the pending row unless a non-failed analysis already exists
    /// for the key, then claims it with a status-guarded update. Losing the
    /// claim race resolves to the winner's row.
    async fn claim(
        &self,
        key: AnalysisKey,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, ServiceError> {
        let db = self.db_pool.as_ref();
        let pending = db
            .transaction::<_, Option<ai_analysis::Model>, ServiceError>(move |txn| {
                Box::pin(async move {
                    if let Some(existing) = existing_query(key)
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                    {
                        return Ok(Some(existing));
                    }

                    ai_analysis::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        restock_order_id: Set(key.restock_order_id),
                        period_days: Set(key.period_days),
                        analytics_date: Set(key.analytics_date),
                        request_data: Set(json!({
                            "restock_order_id": key.restock_order_id,
                            "period_days": key.period_days,
                            "analytics_date": key.analytics_date,
                        })),
                        ai_model: Set("none".to_string()),
                        ai_response: Set(None),
                        analysis_summary: Set(None),
                        recommended_products: Set(json!([])),
                        priority_scores: Set(json!({})),
                        status: Set(AnalysisStatus::Pending),
                        confidence_score: Set(None),
                        processed_at: Set(None),
                        deleted_at: Set(None),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?;
                    Ok(None)
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        if let Some(existing) = pending {
            return Ok(ClaimOutcome::Existing(existing));
        }

        let candidate = existing_query(key)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::AnalysisConflict(key.restock_order_id))?;

        let claimed = ai_analysis::Entity::update_many()
            .col_expr(
                ai_analysis::Column::Status,
                Expr::value(AnalysisStatus::Processing),
            )
            .col_expr(ai_analysis::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(ai_analysis::Column::Id.eq(candidate.id))
            .filter(ai_analysis::Column::Status.eq(AnalysisStatus::Pending))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        if claimed.rows_affected == 0 {
            // Another worker claimed the row between commit and update.
            let conflict = ServiceError::AnalysisConflict(key.restock_order_id);
            warn!(
                analysis_id = %candidate.id,
                restock_order_id = %key.restock_order_id,
                "{}",
                conflict.response_message()
            );
            return existing_query(key)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
                .map(ClaimOutcome::Existing)
                .ok_or(conflict);
        }

        let claimed = ai_analysis::Entity::find_by_id(candidate.id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::InternalError("claimed analysis row disappeared".to_string())
            })?;
        Ok(ClaimOutcome::Claimed(claimed))
    }

    async fn run_pipeline(
        &self,
        analysis: &ai_analysis::Model,
        period_days: i32,
        now: DateTime<Utc>,
    ) -> Result<ai_analysis::Model, ServiceError> {
        let snapshots = self.analytics.compute_period_snapshots(period_days, now).await?;
        let stats = self.analytics.catalog_stats(period_days, now).await?;
        let promotions = self.analytics.active_promotions(now).await?;

        let baseline: Vec<BaselineItem> = snapshots
            .iter()
            .map(|snapshot| BaselineItem {
                product_id: snapshot.product_id,
                variant_id: snapshot.variant_id,
                classification: classification::classify(snapshot, &stats, self.analytics.policy()),
            })
            .collect();

        let request = AiBatchRequest::new(self.ai.model(), period_days, &snapshots, &promotions);

        // The network call runs with no ledger lock held; snapshots were
        // handed off above and results are persisted after it returns.
        let (ai_response, ai_model, fallback_reason) =
            if self.ai.is_enabled() && !snapshots.is_empty() {
                match self.ai.augment(&request).await {
                    Ok(response) => (Some(response), self.ai.model().to_string(), None),
                    Err(err) if err.is_recoverable_ai_error() => {
                        AI_FALLBACKS.inc();
                        warn!(
                            analysis_id = %analysis.id,
                            error = %err,
                            "AI augmentation unavailable, completing with deterministic results"
                        );
                        (None, "none".to_string(), Some(err.to_string()))
                    }
                    Err(err) => return Err(err),
                }
            } else {
                (None, "none".to_string(), None)
            };

        let summary = match (&ai_response, &fallback_reason) {
            (Some(response), _) => response.analysis_summary.clone(),
            (None, Some(reason)) => format!(
                "Deterministic classification only; AI augmentation unavailable: {}",
                reason
            ),
            (None, None) => "Deterministic classification only".to_string(),
        };

        let merged = merge(&baseline, ai_response.as_ref(), self.ai.override_threshold());
        let completed = self
            .persist_completion(
                analysis,
                &snapshots,
                &request,
                ai_response.as_ref(),
                &merged,
                summary,
                ai_model,
            )
            .await?;

        ANALYSES_COMPLETED.inc();
        info!(
            analysis_id = %completed.id,
            recommendation_count = merged.len(),
            ai_model = %completed.ai_model,
            "Restock analysis completed"
        );
        self.event_sender
            .send(Event::AnalysisCompleted {
                analysis_id: completed.id,
                recommendation_count: merged.len(),
                ai_model: completed.ai_model.clone(),
            })
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))?;

        Ok(completed)
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_completion(
        &self,
        analysis: &ai_analysis::Model,
        snapshots: &[product_analytics_snapshot::Model],
        request: &AiBatchRequest,
        ai_response: Option<&AiResponse>,
        merged: &[MergedRecommendation],
        summary: String,
        ai_model: String,
    ) -> Result<ai_analysis::Model, ServiceError> {
        let now = Utc::now();
        let by_variant: HashMap<(Uuid, Uuid), &product_analytics_snapshot::Model> = snapshots
            .iter()
            .map(|s| ((s.product_id, s.variant_id), s))
            .collect();

        let recommendations: Vec<restock_recommendation::ActiveModel> = merged
            .iter()
            .map(|item| {
                let snapshot = by_variant.get(&(item.product_id, item.variant_id));
                restock_recommendation::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    ai_analysis_id: Set(analysis.id),
                    product_id: Set(item.product_id),
                    variant_id: Set(item.variant_id),
                    category: Set(item.category),
                    priority_score: Set(item.priority_score),
                    recommended_quantity: Set(item.recommended_quantity),
                    reasoning: Set(item.reasoning.clone()),
                    confidence_level: Set(item.confidence_level),
                    current_stock: Set(snapshot.map(|s| s.current_stock).unwrap_or(0)),
                    current_sales_velocity: Set(snapshot.map(|s| s.sales_velocity).unwrap_or(0.0)),
                    current_profit_margin: Set(snapshot.map(|s| s.profit_margin).unwrap_or(0.0)),
                    has_active_promotion: Set(snapshot
                        .map(|s| s.has_active_promotion)
                        .unwrap_or(false)),
                    is_implemented: Set(false),
                    deleted_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
            })
            .collect();

        let recommended_products = serde_json::to_value(
            merged
                .iter()
                .map(|item| {
                    json!({
                        "product_id": item.product_id,
                        "variant_id": item.variant_id,
                        "category": item.category.as_str(),
                        "recommended_quantity": item.recommended_quantity,
                    })
                })
                .collect::<Vec<_>>(),
        )?;
        let priority_scores = serde_json::to_value(
            merged
                .iter()
                .map(|item| {
                    (
                        format!("{}:{}", item.product_id, item.variant_id),
                        item.priority_score,
                    )
                })
                .collect::<HashMap<_, _>>(),
        )?;
        let request_data = serde_json::to_value(request)?;
        let ai_response_json = ai_response.map(serde_json::to_value).transpose()?;
        let confidence_score = ai_response.map(|r| r.overall_confidence);

        let analysis_id = analysis.id;
        let mut active: ai_analysis::ActiveModel = analysis.clone().into();
        active.status = Set(AnalysisStatus::Completed);
        active.ai_model = Set(ai_model);
        active.request_data = Set(request_data);
        active.ai_response = Set(ai_response_json);
        active.analysis_summary = Set(Some(summary));
        active.recommended_products = Set(recommended_products);
        active.priority_scores = Set(priority_scores);
        active.confidence_score = Set(confidence_score);
        active.processed_at = Set(Some(now));
        active.updated_at = Set(now);

        self.db_pool
            .as_ref()
            .transaction::<_, ai_analysis::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    if !recommendations.is_empty() {
                        restock_recommendation::Entity::insert_many(recommendations)
                            .exec(txn)
                            .await
                            .map_err(ServiceError::DatabaseError)?;
                    }
                    active.update(txn).await.map_err(ServiceError::DatabaseError)
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })
            .map_err(|err| {
                warn!(analysis_id = %analysis_id, error = %err, "Failed to persist analysis results");
                err
            })
    }

    async fn mark_failed(&self, analysis_id: Uuid, reason: &str) {
        ANALYSES_FAILED.inc();
        let now = Utc::now();
        let result = ai_analysis::Entity::update_many()
            .col_expr(
                ai_analysis::Column::Status,
                Expr::value(AnalysisStatus::Failed),
            )
            .col_expr(
                ai_analysis::Column::AnalysisSummary,
                Expr::value(reason.to_string()),
            )
            .col_expr(ai_analysis::Column::ProcessedAt, Expr::value(now))
            .col_expr(ai_analysis::Column::UpdatedAt, Expr::value(now))
            .filter(ai_analysis::Column::Id.eq(analysis_id))
            .filter(ai_analysis::Column::Status.eq(AnalysisStatus::Processing))
            .exec(self.db_pool.as_ref())
            .await;
        if let Err(e) = result {
            warn!(analysis_id = %analysis_id, error = %e, "Failed to mark analysis failed");
        }
        if let Err(e) = self
            .event_sender
            .send(Event::AnalysisFailed {
                analysis_id,
                reason: reason.to_string(),
            })
            .await
        {
            warn!(error = %e, "Failed to send analysis failed event");
        }
    }
}
