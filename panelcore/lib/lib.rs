//! `panelcore` is the operational core of the x-ui proxy panel.
//!
//! # Overview
//!
//! The panel drives an externally built proxy engine (Xray) and keeps its own state in a
//! relational database. This crate covers the parts of the panel that touch the host:
//! - Opening and migrating the panel database on SQLite or PostgreSQL
//! - Sampling host and process metrics for the status page
//! - Supervising the engine process and replacing its binary
//! - Exporting and importing the database across both engines
//!
//! # Architecture
//!
//! - **Storage**: connection pools, schema migrations and the default administrator
//! - **Metrics**: on-demand [`StatusSnapshot`](metrics::StatusSnapshot) sampling
//! - **Engine**: start, stop and update of the engine process
//! - **Migration**: backend-aware export and import with rollback
//!
//! The migration pipeline pauses the engine around a database swap. The metrics collector only
//! reads engine state and never changes it.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use panelcore::{
//!     config::PanelConfig,
//!     engine::EngineSupervisor,
//!     metrics::{HttpIpResolver, MetricsCollector, PublicIpCache},
//!     storage::Store,
//! };
//! use panelutils::LogRing;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PanelConfig::load(None)?;
//!     let store = Arc::new(Store::initialize(config.backend()?).await?);
//!     let supervisor = Arc::new(EngineSupervisor::from_config(&config, LogRing::default()));
//!
//!     let public_ip = Arc::new(PublicIpCache::new(Arc::new(HttpIpResolver::new()?)));
//!     let collector = MetricsCollector::new(supervisor, public_ip);
//!     let snapshot = collector.sample(None).await;
//!     println!("{}", serde_json::to_string_pretty(&snapshot)?);
//!
//!     store.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line argument types for `panelctl`
//! - [`config`] - Panel configuration and backend selection
//! - [`engine`] - Engine process supervision and releases
//! - [`metrics`] - Host and process metrics
//! - [`migration`] - Database export and import
//! - [`storage`] - The panel database

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod migration;
pub mod storage;

pub use error::*;
