//! Restock Engine Library
//!
//! Append-only stock movement ledger with derived analytics snapshots and an
//! AI-augmented restock recommendation pipeline.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use tokio::sync::mpsc;

pub use config::{load_config, AppConfig};
pub use db::DbPool;
pub use errors::ServiceError;
pub use events::{Event, EventSender};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub event_sender: EventSender,
    pub services: services::ServiceContainer,
}

impl AppState {
    /// Wires the shared state from an established connection. Returns the
    /// receiving half of the event channel; drain it with
    /// `events::process_events` or a custom consumer.
    pub fn new(
        db: Arc<DbPool>,
        config: AppConfig,
    ) -> Result<(Self, mpsc::Receiver<Event>), ServiceError> {
        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let event_sender = EventSender::new(tx);
        let factory =
            services::ServiceFactory::new(db.clone(), event_sender.clone(), config.clone());
        let services = services::ServiceContainer::new(&factory)?;
        Ok((
            Self {
                db,
                config,
                event_sender,
                services,
            },
            rx,
        ))
    }
}
