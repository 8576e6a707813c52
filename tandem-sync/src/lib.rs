//! Cross-service sync engine for Tandem.
//!
//! Requests enter through [`SyncService`], which validates them and either
//! queues a one-off job or hands a recurring one to the [`Scheduler`]. A
//! bounded, priority-ordered [`JobQueue`] connects both paths to a
//! [`WorkerPool`], whose workers run jobs through the [`SyncExecutor`]:
//!
//! ```text
//! manual request ──┐
//!                  ├─> JobQueue ─> WorkerPool ─> SyncExecutor ─> adapters
//! scheduler tick ──┘                                  │
//!                                                     └─> Store (records,
//!                                                         results, metadata)
//! ```
//!
//! Scheduled jobs never wait for queue space: a full queue defers them to
//! the next tick. Failed jobs are re-submitted by the same tick once their
//! backoff has elapsed.

mod blocking;
mod config;
mod error;
mod executor;
mod notifier;
mod queue;
mod scheduler;
mod service;
mod status;
mod worker;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use executor::{JobReport, SyncExecutor};
pub use notifier::{Notifier, TracingNotifier};
pub use queue::JobQueue;
pub use scheduler::{Scheduler, TickReport, RETRY_REQUESTER, SCHEDULER_REQUESTER};
pub use service::{EngineHandle, SyncService};
pub use status::{
    ConnectionInfo, JobDetail, JobSummary, ManualSyncAccepted, ScheduleAccepted, ScheduleSummary,
    ScheduleUpdate, SyncStatusReport,
};
pub use worker::WorkerPool;
