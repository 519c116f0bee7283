//! Engine services: command dispatch, replication and reconciliation.

mod dispatcher;
mod replication;
mod sync;

pub use dispatcher::{Dispatcher, ExecutionOutcome};
pub use replication::{FollowerOutcome, FollowerStatus, ReplicationEngine, ReplicationSummary};
pub use sync::{SyncConfig, SyncHandle, SyncService};
