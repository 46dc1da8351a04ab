use crate::{
    config::AiConfig,
    entities::product_analytics_snapshot::{self, RiskLevel},
    entities::promotion::{self, PromotionType},
    entities::restock_recommendation::RecommendationCategory,
    errors::ServiceError,
    services::classification::Classification,
};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{instrument, warn};
use uuid::Uuid;

const CLASSIFY_PATH: &str = "/v1/classify";

const INSTRUCTIONS: &str = "Classify each product variant into exactly one of \
fast_moving_low_stock, slow_moving_high_stock, high_profit_potential, \
supplier_promotions or regular_restock. Return an analysis_summary, one list \
per category under recommendations, and an overall_confidence between 0 and 1. \
Per-item confidence_level, priority_score (1-100), recommended_quantity and \
reasoning are optional.";

/// Slim snapshot view sent to the classification service.
#[derive(Debug, Clone, Serialize)]
pub struct AiSnapshotSummary {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub sales_velocity: f64,
    pub stock_turnover_rate: f64,
    pub current_stock: i32,
    pub available_stock: i32,
    pub minimum_stock: i32,
    pub maximum_stock: i32,
    pub profit_margin: f64,
    pub performance_score: f64,
    pub risk_level: RiskLevel,
    pub has_active_promotion: bool,
}

impl From<&product_analytics_snapshot::Model> for AiSnapshotSummary {
    fn from(snapshot: &product_analytics_snapshot::Model) -> Self {
        Self {
            product_id: snapshot.product_id,
            variant_id: snapshot.variant_id,
            sales_velocity: snapshot.sales_velocity,
            stock_turnover_rate: snapshot.stock_turnover_rate,
            current_stock: snapshot.current_stock,
            available_stock: snapshot.available_stock,
            minimum_stock: snapshot.minimum_stock,
            maximum_stock: snapshot.maximum_stock,
            profit_margin: snapshot.profit_margin,
            performance_score: snapshot.performance_score,
            risk_level: snapshot.risk_level,
            has_active_promotion: snapshot.has_active_promotion,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AiPromotionSummary {
    pub name: String,
    pub promotion_type: PromotionType,
    pub discount_percent: Decimal,
    pub supplier_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub brand: Option<String>,
}

impl From<&promotion::Model> for AiPromotionSummary {
    fn from(promotion: &promotion::Model) -> Self {
        Self {
            name: promotion.name.clone(),
            promotion_type: promotion.promotion_type,
            discount_percent: promotion.discount_percent,
            supplier_id: promotion.supplier_id,
            product_id: promotion.product_id,
            variant_id: promotion.variant_id,
            brand: promotion.brand.clone(),
        }
    }
}

/// One batch request: the whole period goes out in a single call.
#[derive(Debug, Clone, Serialize)]
pub struct AiBatchRequest {
    pub model: String,
    pub instructions: String,
    pub period_days: i32,
    pub snapshots: Vec<AiSnapshotSummary>,
    pub promotions: Vec<AiPromotionSummary>,
}

impl AiBatchRequest {
    pub fn new(
        model: &str,
        period_days: i32,
        snapshots: &[product_analytics_snapshot::Model],
        promotions: &[promotion::Model],
    ) -> Self {
        Self {
            model: model.to_string(),
            instructions: INSTRUCTIONS.to_string(),
            period_days,
            snapshots: snapshots.iter().map(AiSnapshotSummary::from).collect(),
            promotions: promotions.iter().map(AiPromotionSummary::from).collect(),
        }
    }
}

/// Decoded classification response. Category lists default to empty so a
/// partial response stays total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub analysis_summary: String,
    #[serde(default)]
    pub recommendations: AiRecommendationSets,
    pub overall_confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiRecommendationSets {
    #[serde(default)]
    pub fast_moving_low_stock: Vec<AiRecommendationItem>,
    #[serde(default)]
    pub slow_moving_high_stock: Vec<AiRecommendationItem>,
    #[serde(default)]
    pub high_profit_potential: Vec<AiRecommendationItem>,
    #[serde(default)]
    pub supplier_promotions: Vec<AiRecommendationItem>,
    #[serde(default)]
    pub regular_restock: Vec<AiRecommendationItem>,
}

impl AiRecommendationSets {
    pub fn by_category(&self) -> [(RecommendationCategory, &[AiRecommendationItem]); 5] {
        [
            (
                RecommendationCategory::FastMovingLowStock,
                self.fast_moving_low_stock.as_slice(),
            ),
            (
                RecommendationCategory::SlowMovingHighStock,
                self.slow_moving_high_stock.as_slice(),
            ),
            (
                RecommendationCategory::HighProfitPotential,
                self.high_profit_potential.as_slice(),
            ),
            (
                RecommendationCategory::SupplierPromotions,
                self.supplier_promotions.as_slice(),
            ),
            (
                RecommendationCategory::RegularRestock,
                self.regular_restock.as_slice(),
            ),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRecommendationItem {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    #[serde(default)]
    pub confidence_level: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub priority_score: Option<i32>,
    #[serde(default)]
    pub recommended_quantity: Option<i32>,
}

/// A deterministic classification keyed for the merge.
#[derive(Debug, Clone)]
pub struct BaselineItem {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub classification: Classification,
}

/// Final recommendation after folding the AI view into the baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRecommendation {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub category: RecommendationCategory,
    pub priority_score: i32,
    pub recommended_quantity: i32,
    pub reasoning: String,
    pub confidence_level: f64,
    pub ai_override: bool,
}

fn check_confidence(field: &str, value: f64) -> Result<(), ServiceError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ServiceError::InvalidAiResponse(format!(
            "{} {} outside [0, 1]",
            field, value
        )));
    }
    Ok(())
}

/// Range checks on every confidence the response carries. Structural gaps
/// (missing categories, missing per-item confidence) are tolerated; numbers
/// out of range are not.
pub fn validate_response(response: &AiResponse) -> Result<(), ServiceError> {
    check_confidence("overall_confidence", response.overall_confidence)?;
    for (category, items) in response.recommendations.by_category() {
        for item in items {
            if let Some(confidence) = item.confidence_level {
                check_confidence(
                    &format!("confidence_level in {}", category.as_str()),
                    confidence,
                )?;
            }
        }
    }
    Ok(())
}

/// Folds the AI response into the deterministic baseline. The AI category
/// replaces the deterministic one only at or above the override threshold;
/// below it the baseline stands and AI reasoning is kept as supplementary
/// context. AI items for pairs outside the baseline are dropped. Baseline
/// rows untouched by the AI carry confidence 1.0.
pub fn merge(
    baseline: &[BaselineItem],
    ai: Option<&AiResponse>,
    override_threshold: f64,
) -> Vec<MergedRecommendation> {
    let mut ai_items: HashMap<(Uuid, Uuid), (RecommendationCategory, &AiRecommendationItem)> =
        HashMap::new();
    if let Some(response) = ai {
        for (category, items) in response.recommendations.by_category() {
            for item in items {
                ai_items
                    .entry((item.product_id, item.variant_id))
                    .or_insert((category, item));
            }
        }
    }

    baseline
        .iter()
        .map(|base| {
            let deterministic = &base.classification;
            match ai_items.get(&(base.product_id, base.variant_id)) {
                Some((ai_category, item)) => {
                    let confidence = item
                        .confidence_level
                        .unwrap_or_else(|| ai.map(|r| r.overall_confidence).unwrap_or(0.0));
                    let disagrees = *ai_category != deterministic.category;
                    if disagrees && confidence >= override_threshold {
                        MergedRecommendation {
                            product_id: base.product_id,
                            variant_id: base.variant_id,
                            category: *ai_category,
                            priority_score: item
                                .priority_score
                                .unwrap_or(deterministic.priority_score)
                                .clamp(1, 100),
                            recommended_quantity: item
                                .recommended_quantity
                                .unwrap_or(deterministic.recommended_quantity)
                                .max(0),
                            reasoning: item
                                .reasoning
                                .clone()
                                .unwrap_or_else(|| deterministic.reasoning.clone()),
                            confidence_level: confidence,
                            ai_override: true,
                        }
                    } else {
                        let reasoning = match item.reasoning.as_deref() {
                            Some(extra) if disagrees => format!(
                                "{} (AI suggested {} below the override threshold: {})",
                                deterministic.reasoning,
                                ai_category.as_str(),
                                extra
                            ),
                            Some(extra) => {
                                format!("{} (AI: {})", deterministic.reasoning, extra)
                            }
                            None => deterministic.reasoning.clone(),
                        };
                        MergedRecommendation {
                            product_id: base.product_id,
                            variant_id: base.variant_id,
                            category: deterministic.category,
                            priority_score: deterministic.priority_score,
                            recommended_quantity: deterministic.recommended_quantity,
                            reasoning,
                            confidence_level: confidence,
                            ai_override: false,
                        }
                    }
                }
                None => MergedRecommendation {
                    product_id: base.product_id,
                    variant_id: base.variant_id,
                    category: deterministic.category,
                    priority_score: deterministic.priority_score,
                    recommended_quantity: deterministic.recommended_quantity,
                    reasoning: deterministic.reasoning.clone(),
                    confidence_level: 1.0,
                    ai_override: false,
                },
            }
        })
        .collect()
}

/// Thin client for the external classification service. The service is
/// treated as untrusted: anything it returns is validated before use and
/// every failure maps to a recoverable error the orchestrator can absorb.
#[derive(Clone)]
pub struct AiAugmentationService {
    client: Client,
    config: AiConfig,
}

impl AiAugmentationService {
    pub fn new(config: AiConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to construct AI client: {}", e))
            })?;
        Ok(Self::with_client(config, client))
    }

    /// Build a service from an existing client (useful for testing).
    pub fn with_client(config: AiConfig, client: Client) -> Self {
        Self { client, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn override_threshold(&self) -> f64 {
        self.config.confidence_override_threshold
    }

    /// One POST per batch under a bounded timeout. Transport failures,
    /// non-2xx statuses and undecodable bodies map to `AiUnavailable`;
    /// decodable responses with out-of-range confidences map to
    /// `InvalidAiResponse`.
    #[instrument(skip(self, request), fields(batch_size = request.snapshots.len()))]
    pub async fn augment(&self, request: &AiBatchRequest) -> Result<AiResponse, ServiceError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), CLASSIFY_PATH);
        let call_timeout = Duration::from_secs(self.config.timeout_secs);

        let response = timeout(call_timeout, self.client.post(&url).json(request).send())
            .await
            .map_err(|_| {
                ServiceError::AiUnavailable(format!(
                    "classification request timed out after {}s",
                    self.config.timeout_secs
                ))
            })?
            .map_err(|e| {
                ServiceError::AiUnavailable(format!("classification request failed: {}", e))
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            ServiceError::AiUnavailable(format!("failed to read classification response: {}", e))
        })?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            warn!(status = %status, "Classification service returned an error");
            return Err(ServiceError::AiUnavailable(format!(
                "classification service error (status: {}): {}",
                status, text
            )));
        }

        let decoded: AiResponse = serde_json::from_slice(&body).map_err(|e| {
            ServiceError::AiUnavailable(format!("undecodable classification response: {}", e))
        })?;
        validate_response(&decoded)?;
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(product_id: Uuid, variant_id: Uuid, confidence: Option<f64>) -> AiRecommendationItem {
        AiRecommendationItem {
            product_id,
            variant_id,
            confidence_level: confidence,
            reasoning: Some("seasonal demand spike expected".to_string()),
            priority_score: Some(88),
            recommended_quantity: Some(40),
        }
    }

    fn baseline(product_id: Uuid, variant_id: Uuid) -> BaselineItem {
        BaselineItem {
            product_id,
            variant_id,
            classification: Classification {
                category: RecommendationCategory::RegularRestock,
                priority_score: 35,
                recommended_quantity: 10,
                reasoning: "Routine replenishment: 5 on hand against a minimum of 10".to_string(),
            },
        }
    }

    fn response_with(
        sets: AiRecommendationSets,
        overall_confidence: f64,
    ) -> AiResponse {
        AiResponse {
            analysis_summary: "test".to_string(),
            recommendations: sets,
            overall_confidence,
        }
    }

    #[test]
    fn missing_categories_decode_as_empty() {
        let decoded: AiResponse = serde_json::from_value(json!({
            "analysis_summary": "thin response",
            "overall_confidence": 0.8,
            "recommendations": {
                "fast_moving_low_stock": []
            }
        }))
        .expect("partial response decodes");

        assert!(validate_response(&decoded).is_ok());
        for (_, items) in decoded.recommendations.by_category() {
            assert!(items.is_empty());
        }
    }

    #[test]
    fn out_of_range_confidences_are_rejected() {
        let overall = response_with(AiRecommendationSets::default(), 1.2);
        assert!(matches!(
            validate_response(&overall),
            Err(ServiceError::InvalidAiResponse(_))
        ));

        let nan = response_with(AiRecommendationSets::default(), f64::NAN);
        assert!(matches!(
            validate_response(&nan),
            Err(ServiceError::InvalidAiResponse(_))
        ));

        let mut sets = AiRecommendationSets::default();
        sets.supplier_promotions
            .push(item(Uuid::new_v4(), Uuid::new_v4(), Some(-0.1)));
        let item_level = response_with(sets, 0.9);
        assert!(matches!(
            validate_response(&item_level),
            Err(ServiceError::InvalidAiResponse(_))
        ));
    }

    #[test]
    fn override_requires_threshold_confidence() {
        let product_id = Uuid::new_v4();
        let variant_id = Uuid::new_v4();
        let merge_at = |confidence: f64| {
            let mut sets = AiRecommendationSets::default();
            sets.fast_moving_low_stock
                .push(item(product_id, variant_id, Some(confidence)));
            let response = response_with(sets, 0.9);
            merge(&[baseline(product_id, variant_id)], Some(&response), 0.6)
                .pop()
                .expect("one row")
        };

        let won = merge_at(0.6);
        assert_eq!(won.category, RecommendationCategory::FastMovingLowStock);
        assert!(won.ai_override);
        assert_eq!(won.priority_score, 88);
        assert_eq!(won.recommended_quantity, 40);

        let lost = merge_at(0.59);
        assert_eq!(lost.category, RecommendationCategory::RegularRestock);
        assert!(!lost.ai_override);
        assert_eq!(lost.priority_score, 35);
        assert!(lost.reasoning.contains("below the override threshold"));
    }

    #[test]
    fn item_confidence_inherits_overall() {
        let product_id = Uuid::new_v4();
        let variant_id = Uuid::new_v4();
        let mut sets = AiRecommendationSets::default();
        sets.high_profit_potential.push(item(product_id, variant_id, None));
        let response = response_with(sets, 0.75);

        let merged = merge(&[baseline(product_id, variant_id)], Some(&response), 0.6);
        assert_eq!(merged[0].confidence_level, 0.75);
        assert!(merged[0].ai_override);
    }

    #[test]
    fn unknown_pairs_are_dropped() {
        let known = baseline(Uuid::new_v4(), Uuid::new_v4());
        let mut sets = AiRecommendationSets::default();
        sets.fast_moving_low_stock
            .push(item(Uuid::new_v4(), Uuid::new_v4(), Some(0.95)));
        let response = response_with(sets, 0.95);

        let merged = merge(
            std::slice::from_ref(&known),
            Some(&response),
            0.6,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].product_id, known.product_id);
        assert_eq!(merged[0].category, RecommendationCategory::RegularRestock);
    }

    #[test]
    fn baseline_alone_keeps_full_confidence() {
        let merged = merge(&[baseline(Uuid::new_v4(), Uuid::new_v4())], None, 0.6);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence_level, 1.0);
        assert!(!merged[0].ai_override);
    }
}
