//! # handle-sweep
//!
//! Resumable availability sweeps over large identifier lists, spread across
//! a rotating pool of HTTP proxies.
//!
//! ## Features
//!
//! - Cooldown-based proxy rotation with a persisted blacklist
//! - Bounded retries with exponential backoff for flaky or throttled requests
//! - Chunked concurrent checks with a checkpoint after every chunk
//! - redb result storage, JSON/HTML reports and Telegram notifications
//!
//! ## Example
//!
//! ```no_run
//! use handle_sweep::{Sweep, SweepConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SweepConfig::new("data/proxies.txt", "data/identifiers.txt");
//!     let mut sweep = Sweep::builder(config).build()?;
//!     let summary = sweep.run().await;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

mod sweep;

pub mod config;
pub mod external_deps;
pub mod modules;
pub mod probe;

pub use crate::sweep::{
    CheckJob,
    JobState,
    RunSummary,
    Sweep,
    SweepBuilder,
    SweepError,
};

pub use crate::config::{ConfigError, SweepConfig};

pub use crate::external_deps::{DisabledNotifier, Notifier, NotifyError, TelegramNotifier};

pub use crate::modules::{
    Checkpoint,
    CheckpointStore,
    IdentifierSource,
    PoolHealth,
    ProxyPool,
    ProxyPoolConfig,
    ReportGenerator,
    ResultSink,
    RunCounts,
    RunStatus,
};

pub use crate::probe::{
    Outcome,
    ProbeError,
    ProbeTransport,
    Prober,
    ProberConfig,
    RetryPolicy,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
