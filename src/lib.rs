//! Harness for checking ordered, at-least-once delivery through FIFO queues.
//!
//! A [`producer::Producer`] enqueues numbered messages per group and logs
//! each one as sent, a [`consumer::Consumer`] processes delivered batches
//! under a configurable [`policy::FailurePolicy`] and logs what it received,
//! and a [`verifier::Verifier`] compares both sides of the log per group.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod log;
pub mod message;
pub mod poller;
pub mod policy;
pub mod producer;
pub mod queue;
pub mod token;
pub mod verifier;

pub use error::Error;

/// Environment variable holding the tracing filter directives.
pub const LOG_ENV_VAR: &str = "ORDERCHECK_LOG";

/// Installs the global tracing subscriber.
///
/// Debug builds log human-readable output, release builds log JSON.
pub fn init_tracing() -> eyre::Result<()> {
    let filter = EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish()
        .try_init()?;

    Ok(())
}
