//! Handlers for the CLI subcommands.
//!
//! Each handler prints its findings for a human and returns a success flag
//! that `main` turns into the process exit code.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use owo_colors::OwoColorize;
use tabled::{Table, Tabled};
use tracing::error;

use crate::app::Config;
use crate::core::domain::{AccountDescriptor, Symbol, LEADER_USER_ID};
use crate::core::exchange::ConnectionRegistry;
use crate::core::service::SyncService;
use crate::core::store::Keystore;

/// `test --user-id <id>`: connect one account and probe the essentials.
pub async fn test_connection(config: &Config, user_id: &str) -> bool {
    println!("Testing connectivity for {user_id}...");

    let descriptor = match resolve_descriptor(config, user_id) {
        Some(descriptor) => descriptor,
        None => {
            println!("{} account not found: {user_id}", "✗".red());
            return false;
        }
    };

    let registry = ConnectionRegistry::new();
    let adapter = match registry.get_adapter(&descriptor).await {
        Ok(adapter) => adapter,
        Err(e) => {
            println!("{} could not connect: {e}", "✗".red());
            return false;
        }
    };
    println!("{} adapter connected ({})", "✓".green(), adapter.exchange_id());

    match adapter.get_total_account_value_usdt().await {
        Ok(equity) => println!("{} account value: {equity} USDT", "✓".green()),
        Err(e) => println!("{} account value unavailable: {e}", "!".yellow()),
    }

    match adapter.get_positions(None).await {
        Ok(positions) => {
            println!("{} open positions: {}", "✓".green(), positions.len());
            for position in &positions {
                println!(
                    "    {} {} {} @ {} ({}x)",
                    position.symbol,
                    position.side,
                    position.contracts,
                    position.entry_price,
                    position.leverage
                );
            }
        }
        Err(e) => println!("{} positions unavailable: {e}", "!".yellow()),
    }

    if let Ok(probe) = Symbol::parse("BTC/USDT") {
        match adapter.get_ticker(&probe).await {
            Ok(ticker) => match ticker.price() {
                Some(price) => println!("{} BTC/USDT price: {price}", "✓".green()),
                None => println!("{} BTC/USDT ticker carried no price", "!".yellow()),
            },
            Err(e) => println!("{} ticker unavailable: {e}", "!".yellow()),
        }
    }

    registry.close_all().await;
    println!("{} connectivity test finished", "✓".green());
    true
}

/// `sync [--dry-run]`: one reconciliation pass, or a read-only inspection.
pub async fn sync_positions(config: &Config, dry_run: bool) -> bool {
    let keystore = Keystore::new(config.keystore.path.clone());
    let followers = match keystore.load_accounts(true) {
        Ok(followers) => followers,
        Err(e) => {
            println!("{} could not load keystore: {e}", "✗".red());
            return false;
        }
    };
    if followers.is_empty() {
        println!("{} no active followers in the keystore", "✗".red());
        return false;
    }
    println!("Found {} follower(s)", followers.len());

    let registry = Arc::new(ConnectionRegistry::new());

    if dry_run {
        println!("Dry run: listing follower positions, no orders will be placed");
        let mut ok = true;
        for follower in &followers {
            println!("\n{} ({})", follower.user_id, follower.exchange_id);
            match registry.get_adapter(follower).await {
                Ok(adapter) => match adapter.get_positions(None).await {
                    Ok(positions) if positions.is_empty() => println!("    no open positions"),
                    Ok(positions) => {
                        for position in positions {
                            println!(
                                "    {} {} {} @ {}",
                                position.symbol,
                                position.side,
                                position.contracts,
                                position.entry_price
                            );
                        }
                    }
                    Err(e) => {
                        println!("    {} positions unavailable: {e}", "✗".red());
                        ok = false;
                    }
                },
                Err(e) => {
                    println!("    {} could not connect: {e}", "✗".red());
                    ok = false;
                }
            }
        }
        registry.close_all().await;
        return ok;
    }

    let leader = match config.leader_descriptor() {
        Ok(leader) => leader,
        Err(e) => {
            println!("{} leader is not configured: {e}", "✗".red());
            return false;
        }
    };
    registry.set_leader(leader);

    let service = SyncService::new(
        registry.clone(),
        keystore,
        config.sizing.clone(),
        config.sync.clone(),
    );
    let result = service.run_cycle().await;
    registry.close_all().await;

    match result {
        Ok(()) => {
            println!("{} reconciliation cycle complete", "✓".green());
            true
        }
        Err(e) => {
            println!("{} reconciliation failed: {e}", "✗".red());
            false
        }
    }
}

#[derive(Tabled)]
struct AccountRow {
    #[tabled(rename = "user")]
    user_id: String,
    #[tabled(rename = "exchange")]
    exchange_id: String,
    #[tabled(rename = "role")]
    role: &'static str,
}

/// `status`: keystore summary.
pub fn show_status(config: &Config) -> bool {
    println!("copyhawk v{}", env!("CARGO_PKG_VERSION"));
    println!("keystore: {}", config.keystore.path.display());

    let keystore = Keystore::new(config.keystore.path.clone());
    let accounts = match keystore.load_accounts(false) {
        Ok(accounts) => accounts,
        Err(e) => {
            println!("{} could not load keystore: {e}", "✗".red());
            return false;
        }
    };

    if accounts.is_empty() {
        println!("{} no active accounts in the keystore", "!".yellow());
        return true;
    }

    let followers = accounts.iter().filter(|account| account.copy_enabled).count();
    let rows: Vec<AccountRow> = accounts
        .iter()
        .map(|account| AccountRow {
            user_id: account.user_id.clone(),
            exchange_id: account.exchange_id.clone(),
            role: if account.copy_enabled { "follower" } else { "other" },
        })
        .collect();

    println!("{}", Table::new(rows));
    println!(
        "{} {} active account(s), {} follower(s)",
        "✓".green(),
        accounts.len(),
        followers
    );
    true
}

/// `validate`: structural validation of every keystore entry.
pub fn validate_config(config: &Config) -> bool {
    let path = &config.keystore.path;
    println!("Validating keystore {}", path.display());

    if !path.exists() {
        println!("{} keystore file not found", "✗".red());
        return false;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            println!("{} could not read keystore: {e}", "✗".red());
            return false;
        }
    };
    let raw: BTreeMap<String, BTreeMap<String, serde_json::Value>> =
        match serde_json::from_str(&contents) {
            Ok(raw) => raw,
            Err(e) => {
                println!("{} keystore is not valid JSON: {e}", "✗".red());
                return false;
            }
        };

    let mut total = 0usize;
    let mut valid = 0usize;
    for (user_id, exchanges) in &raw {
        for (exchange_id, entry) in exchanges {
            total += 1;
            match validate_entry(entry) {
                Ok(()) => {
                    valid += 1;
                    println!("{} {user_id} ({exchange_id})", "✓".green());
                }
                Err(problem) => {
                    println!("{} {user_id} ({exchange_id}): {problem}", "✗".red());
                }
            }
        }
    }

    if total == 0 {
        println!("{} keystore contains no entries", "✗".red());
        return false;
    }
    println!("{valid}/{total} entries valid");
    valid == total
}

fn validate_entry(entry: &serde_json::Value) -> Result<(), String> {
    for field in ["api_key", "api_secret", "status"] {
        let value = entry[field].as_str().unwrap_or_default();
        if value.is_empty() {
            return Err(format!("missing field: {field}"));
        }
    }
    for secret in ["api_key", "api_secret"] {
        let value = entry[secret].as_str().unwrap_or_default();
        if BASE64_STANDARD.decode(value).is_err() {
            return Err(format!("{secret} is not valid base64"));
        }
    }
    Ok(())
}

fn resolve_descriptor(config: &Config, user_id: &str) -> Option<AccountDescriptor> {
    if user_id == LEADER_USER_ID || user_id == config.leader.user_id {
        return match config.leader_descriptor() {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                error!(error = %e, "Leader requested but not configured");
                None
            }
        };
    }

    let keystore = Keystore::new(config.keystore.path.clone());
    match keystore.load_accounts(false) {
        Ok(accounts) => accounts.into_iter().find(|account| account.user_id == user_id),
        Err(e) => {
            error!(error = %e, "Could not load keystore");
            None
        }
    }
}
