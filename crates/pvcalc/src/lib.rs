//! Live process-variable (PV) subscriptions delivered into spreadsheet cells.
//!
//! A [`PvDataWorker`] runs a single-threaded event loop on its own thread. It
//! subscribes PV names through a [`PvClient`], filters incoming values with a
//! per-name deadband, and publishes accepted values into [`ResultCell`]s,
//! which push a [`ResultEvent`] to every registered [`ResultListener`] (for
//! example a spreadsheet cell backed by a volatile result).
//!
//! # Architecture
//!
//! ```text
//! Spreadsheet host (listeners)
//!     └── ResultCell (this crate)          ◄── deadband filter
//!           └── PvDataWorker event loop    ◄── one thread, one tokio runtime
//!                 └── PvClient             ◄── external PV source (or SoftIoc)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pvcalc::{listener_fn, PvDataWorker, ResultEvent, SoftIoc, WorkerConfig};
//!
//! # fn example() -> pvcalc::Result<()> {
//! let ioc = SoftIoc::new();
//! let mut worker = PvDataWorker::spawn(Arc::new(ioc.clone()), WorkerConfig::default())?;
//!
//! worker.add_pv("PHY:TEST", 0.5)?;
//! if let Some(cell) = worker.get_result("PHY:TEST") {
//!     cell.add_result_listener(listener_fn(|event: &ResultEvent| {
//!         println!("{event}");
//!     }));
//! }
//! ioc.put("PHY:TEST", 1.0);
//!
//! worker.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod name;
pub mod result;
pub mod sim;
pub mod worker;

mod registry;

pub use client::{MonitorSink, PvClient, Subscription, SubscriptionState};
pub use config::WorkerConfig;
pub use error::{BridgeError, ClientError, Result};
pub use filter::should_emit;
pub use name::{is_valid_pv, MAX_PV_NAME_LEN};
pub use result::{listener_fn, FnListener, ResultCell, ResultListener};
pub use sim::SoftIoc;
pub use worker::{execute_task, PvDataWorker, WorkerStatus};

pub use pvcalc_protocol::{PvValue, ResultEvent, NOT_AVAILABLE};
