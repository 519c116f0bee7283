use clap::Parser;
use copyhawk::app::{App, Config};
use copyhawk::cli::{Cli, Commands};
use tracing::error;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    config.init_logging(cli.log_level.as_deref());

    let success = match cli.command {
        Commands::Run => match App::run(config).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Fatal error");
                false
            }
        },
        Commands::Test(args) => copyhawk::cli::commands::test_connection(&config, &args.user_id).await,
        Commands::Sync(args) => copyhawk::cli::commands::sync_positions(&config, args.dry_run).await,
        Commands::Status => copyhawk::cli::commands::show_status(&config),
        Commands::Validate => copyhawk::cli::commands::validate_config(&config),
    };

    std::process::exit(if success { 0 } else { 1 });
}
