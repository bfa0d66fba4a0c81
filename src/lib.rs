//! # smartstream
//!
//! A real-time market-data fan-in / fan-out engine for the SmartAPI
//! streaming feed.
//!
//! The engine maintains two authenticated upstream WebSocket connections —
//! one for last-traded-price (LTP) ticks, one for full-depth snap quotes —
//! decodes the vendor's binary packet format, and distributes ticks to a
//! Redis-backed latest-price store, per-symbol pub/sub channels, and a set
//! of user-defined order plans whose status advances with the stream.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use smartstream::config::Config;
//! use smartstream::session::StaticSessionProvider;
//! use smartstream::Engine;
//!
//! #[tokio::main]
//! async fn main() -> smartstream::error::Result<()> {
//!     let cfg = Config::from_env()?;
//!     let session = Arc::new(StaticSessionProvider::from_env()?);
//!     let mut engine = Engine::start(cfg, session).await?;
//!     if let Some(err) = engine.wait().await {
//!         eprintln!("engine stopped: {err}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod evaluator;
pub mod session;
pub mod store;
pub mod types;
pub mod ws;

/// Re-export the engine facade at crate root for convenience.
pub use ws::manager::Engine;
/// Re-export the error type and Result alias.
pub use error::{FeedError, Result};
