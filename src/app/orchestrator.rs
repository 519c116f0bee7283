//! Engine orchestration for the `run` subcommand.
//!
//! Wires the registry, keystore, replication engine, dispatcher and the
//! reconciliation loop together, then reads leader commands as JSON lines
//! from stdin and dispatches them one at a time. Every command produces a
//! structured execution report that is echoed as a JSON line on stdout, so
//! the upstream decision system gets the same status/leader-order/replication
//! record the dispatcher computed. Commands stay strictly ordered; only the
//! per-follower fan-out inside each command is parallel.

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

use crate::app::Config;
use crate::core::domain::Command;
use crate::core::exchange::ConnectionRegistry;
use crate::core::service::{Dispatcher, ExecutionOutcome, ReplicationEngine, SyncService};
use crate::core::store::Keystore;
use crate::error::Result;

/// Main application struct.
pub struct App;

impl App {
    /// Run the engine until stdin closes or Ctrl-C arrives.
    pub async fn run(config: Config) -> Result<()> {
        let leader = config.leader_descriptor()?;
        let keystore = Keystore::new(config.keystore.path.clone());

        let registry = Arc::new(ConnectionRegistry::new());
        registry.set_leader(leader);

        // Verify leader connectivity up front; a broken leader makes every
        // command fail anyway.
        let leader_adapter = registry.leader_adapter().await?;
        let equity = leader_adapter.get_total_account_value_usdt().await?;
        info!(equity = %equity, "Leader account connected");

        let replication = Arc::new(ReplicationEngine::new(
            registry.clone(),
            keystore.clone(),
            config.sizing.clone(),
        ));
        let dispatcher = Dispatcher::new(registry.clone(), replication);

        let sync_service = Arc::new(SyncService::new(
            registry.clone(),
            keystore,
            config.sizing.clone(),
            config.sync.clone(),
        ));
        let sync_handle = sync_service.start();

        info!("Engine running; reading commands from stdin (one JSON object per line)");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            let report = Self::dispatch_line(&dispatcher, line).await;
                            println!("{report}");
                        }
                        Ok(None) => {
                            info!("Command input closed");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to read command input");
                            break;
                        }
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        // Let the in-flight reconciliation cycle finish, then release every
        // adapter.
        sync_handle.stop().await;
        registry.close_all().await;
        info!("Engine stopped");
        Ok(())
    }

    /// Parse and execute one command line, returning its execution report.
    async fn dispatch_line(dispatcher: &Dispatcher, line: &str) -> serde_json::Value {
        let command: Command = match serde_json::from_str(line) {
            Ok(command) => command,
            Err(e) => {
                error!(error = %e, "Unsupported command");
                return json!({
                    "status": "failed",
                    "message": format!("unsupported command: {e}"),
                });
            }
        };

        let outcome = dispatcher.execute(command).await;
        match &outcome {
            ExecutionOutcome::Order {
                leader_order,
                replication,
            } => {
                if leader_order.is_failed() {
                    error!(
                        symbol = %leader_order.symbol,
                        reason = ?leader_order.error_message,
                        "Leader order failed"
                    );
                } else {
                    match replication {
                        Some(summary) => info!(
                            symbol = %leader_order.symbol,
                            order_id = ?leader_order.id,
                            followers = summary.total,
                            successful = summary.successful,
                            failed = summary.failed,
                            skipped = summary.skipped,
                            "Command executed and replicated"
                        ),
                        None => info!(
                            symbol = %leader_order.symbol,
                            order_id = ?leader_order.id,
                            "Command executed; not replicated"
                        ),
                    }
                }
            }
            ExecutionOutcome::Acknowledged { description } => {
                info!(description = %description, "Command acknowledged");
            }
            ExecutionOutcome::Failed { message } => {
                warn!(message = %message, "Command failed");
            }
        }
        outcome.to_report()
    }
}
