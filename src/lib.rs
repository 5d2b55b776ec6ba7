//! Oxipack: delta-capable release packaging and self-updating.
//!
//! The crate provides:
//! - Release descriptors and canonical package naming (`release`)
//! - A replaceable byte-level diff backend (`diff`)
//! - The artifact container format (`archive`)
//! - Full/delta package building and delta reassembly (`pack`)
//! - The update orchestrator with fallback to full packages (`update`)
//! - Progress reporting and bounded retries (`progress`, `retry`)
//! - Channel promotion and project configuration (`promote`, `config`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use oxipack::release::App;
//! use oxipack::update::{DirectoryInstaller, DirectoryRegistry, UpdateManager};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(installed: App) {
//! let manager = UpdateManager::new(
//!     installed,
//!     Arc::new(DirectoryRegistry),
//!     Arc::new(DirectoryInstaller),
//!     "cache/packages",
//!     "install",
//! );
//! if let Some(app) = manager
//!     .update_to_latest_release(None, &CancellationToken::new())
//!     .await
//! {
//!     println!("updated to {}", app.version);
//! }
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod diff;
pub mod pack;
pub mod progress;
pub mod promote;
pub mod release;
pub mod retry;
pub mod update;

#[cfg(feature = "cli")]
pub mod cli;
