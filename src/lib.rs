//! # release-dl
//!
//! Message-driven download stage for a release analysis pipeline.
//!
//! A [`DownloadStage`] consumes `download.http` messages naming a project and a
//! version record, fetches the release tarball over HTTP, verifies its MD5
//! against the record, publishes it below the storage root, marks the record
//! downloaded, and announces the file on `extract.targz` and `analysis.filesize`.
//!
//! ## Design
//!
//! - **Stages are plain values** implementing [`Stage`]; a [`StageRunner`]
//!   binds the input queue and settles every delivery exactly once
//! - **Collaborators are injected** behind traits: [`RecordStore`],
//!   [`ArtifactTransfer`], [`MessagePublisher`], [`MessageBroker`]
//! - **Idempotent** - records already downloaded are acknowledged without I/O
//! - **Event-driven** - runners broadcast [`Event`]s to subscribers
//!
//! ## Quick Start
//!
//! ```no_run
//! use release_dl::{
//!     Config, Database, DownloadStage, HttpTransfer, InMemoryBroker, StageRunner,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let db = Arc::new(Database::new(&config.persistence.database_path).await?);
//!     let broker = Arc::new(InMemoryBroker::new());
//!
//!     let stage = DownloadStage::new(
//!         db,
//!         Arc::new(HttpTransfer::new()?),
//!         broker.clone(),
//!         config,
//!     );
//!     let runner = StageRunner::new(Arc::new(stage), broker);
//!
//!     let mut events = runner.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     release_dl::run_with_shutdown(&runner).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Message broker traits and the in-process broker
pub mod broker;
/// External command execution
pub mod command;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Stage contract, runner and the download stage
pub mod stage;
/// Record store gateway
pub mod store;
/// Artifact transfer
pub mod transfer;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use broker::{Delivery, InMemoryBroker, MessageBroker, MessagePublisher};
pub use command::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::Config;
pub use db::Database;
pub use error::{DatabaseError, DownloadError, Error, Result};
pub use stage::{Binding, DownloadStage, Outcome, QueueOptions, Stage, StageRunner};
pub use store::RecordStore;
pub use transfer::{ArtifactTransfer, HttpTransfer};
pub use types::{
    DownloadMessage, DownloadState, Event, FailurePolicy, FollowUpMessage, ProjectId, VersionId,
};

use tokio_util::sync::CancellationToken;

/// Run a stage until a termination signal arrives, then stop consuming.
///
/// The message in flight (if any) is finished and settled before returning.
///
/// # Platform behavior
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Returns early with [`Error::StageHalted`] if the stage fails fatally.
pub async fn run_with_shutdown<S: Stage>(runner: &StageRunner<S>) -> Result<()> {
    let cancel = CancellationToken::new();

    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            cancel.cancel();
        })
    };

    let result = runner.run(cancel).await;
    signal_task.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
