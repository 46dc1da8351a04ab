use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Wrapper around the event channel handed to every service.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Ledger events
    MovementRecorded {
        movement_id: Uuid,
        store_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        movement_type: String,
        quantity: i32,
        previous_stock: i32,
        new_stock: i32,
    },
    MovementVoided {
        movement_id: Uuid,
        store_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
    },
    PositionRebuilt {
        store_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        current_stock: i32,
    },
    StockLevelsUpdated {
        store_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        minimum_stock: i32,
        maximum_stock: i32,
    },
    StockReserved {
        store_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
        reference_id: Option<Uuid>,
    },
    StockReleased {
        store_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
        reference_id: Option<Uuid>,
    },

    // Alert edge events, emitted when a flag flips on
    LowStockDetected {
        store_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        current_stock: i32,
        minimum_stock: i32,
    },
    OverstockDetected {
        store_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        current_stock: i32,
        maximum_stock: i32,
    },

    // Analytics events
    SnapshotComputed {
        snapshot_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
    },

    // Restock analysis events
    AnalysisStarted(Uuid),
    AnalysisCompleted {
        analysis_id: Uuid,
        recommendation_count: usize,
        ai_model: String,
    },
    AnalysisFailed {
        analysis_id: Uuid,
        reason: String,
    },
    RecommendationImplemented(Uuid),

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

// Drains the event channel and logs each event. Embedders that need to fan
// events out to their own consumers run their own receiver task instead.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::LowStockDetected {
                store_id,
                product_id,
                variant_id,
                current_stock,
                minimum_stock,
            } => {
                warn!(
                    %store_id,
                    %product_id,
                    %variant_id,
                    current_stock,
                    minimum_stock,
                    "Stock dropped below minimum"
                );
            }
            Event::OverstockDetected {
                store_id,
                product_id,
                variant_id,
                current_stock,
                maximum_stock,
            } => {
                warn!(
                    %store_id,
                    %product_id,
                    %variant_id,
                    current_stock,
                    maximum_stock,
                    "Stock exceeded maximum"
                );
            }
            Event::AnalysisFailed {
                analysis_id,
                reason,
            } => {
                warn!(%analysis_id, reason, "Restock analysis failed");
            }
            other => {
                debug!(event = ?other, "Event processed");
            }
        }
    }

    info!("Event processing loop stopped");
}
