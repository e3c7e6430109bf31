//! replscale-autoscale — alert-driven resizing of replication instances.
//!
//! A pressure alert picks the next instance class from the size table,
//! requests the resize, and installs a recurring wake that carries an
//! `OperationRecord`. Each wake re-enters the orchestrator, which polls
//! the instance and its tasks until they settle or the timeout passes.
//!
//! # Flow
//!
//! ```text
//! alert ──▶ dispatch ──▶ start ──▶ InfraClient::resize_instance
//!                          └──▶ WakeScheduler::install_recurring_wake(record)
//! wake  ──▶ dispatch ──▶ tick  ──▶ Waiting | Converged | TimedOut
//!                                       └──▶ reset alarm, remove wake, notify
//! ```
//!
//! The orchestrator holds no clients of its own: provider access, wakes,
//! notifications, time and the optional operation marker all arrive
//! through the traits in [`collaborators`]. [`local`] implements them on
//! a `StateStore`.

pub mod collaborators;
pub mod dispatch;
pub mod error;
pub mod local;
pub mod orchestrator;
pub mod record;
pub mod runner;

pub use collaborators::{Clock, InfraClient, ManualClock, Notifier, OperationLock, SystemClock, WakeScheduler};
pub use dispatch::{DispatchOutcome, Inbound, classify};
pub use error::{NotifyError, ScaleError, ScaleResult};
pub use local::{OutboxNotifier, StoreInfra, StoreOperationLock, StoreScheduler};
pub use orchestrator::{
    Alert, OrchestratorSettings, ResizeOrchestrator, StartOutcome, TickOutcome, WaitReason,
};
pub use record::{OperationRecord, wake_key};
pub use runner::{ScanFactory, WakeRunner, run_wake_loop};
