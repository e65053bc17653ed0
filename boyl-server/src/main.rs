//! boyl-server CLI
//!
//! Scans the games directory into the catalog and inspects the result.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use boyl_db::{Db, Side, list_games};
use boyl_server::{HttpMedia, ScanError, Scanner, ServerConfig, parse_filename};

#[derive(Parser)]
#[command(name = "boyl-server")]
#[command(about = "Maintain the boyl game catalog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the games directory and update the catalog
    Scan,

    /// List catalog entries
    Games,

    /// Show what a file name parses to
    Parse {
        /// Archive file name, e.g. "Balatro (v1.0.1n) (2024).7z"
        name: String,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] boyl_server::ConfigError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Parse { name } => {
            let meta = parse_filename(&name).map_err(ScanError::from)?;
            println!("name:    {}", meta.name);
            println!("version: {}", meta.version);
            println!("year:    {}", meta.year);
            Ok(())
        }
        Commands::Games => {
            let config = ServerConfig::from_env()?;
            let db = Db::open(&config.database_path(), Side::Server).map_err(ScanError::from)?;
            for game in list_games(&db.lock()).map_err(ScanError::from)? {
                println!("{}  {:<8} {}  {}", game.id, game.status, game.name, game.path);
            }
            Ok(())
        }
        Commands::Scan => {
            let config = ServerConfig::from_env()?;
            let db = Db::open(&config.database_path(), Side::Server).map_err(ScanError::from)?;
            let rt = tokio::runtime::Runtime::new().map_err(|e| CliError::Runtime(e.to_string()))?;
            rt.block_on(async {
                let http = boyl_metadata::http_client().map_err(ScanError::from)?;
                let providers = boyl_metadata::default_providers(
                    http.clone(),
                    &config.igdb_client_id,
                    &config.igdb_client_secret,
                );
                let scanner = Scanner::new(
                    config.games_directory.clone(),
                    config.media_directory(),
                    providers,
                    Box::new(HttpMedia::new(http)),
                    db,
                );
                let result = scanner.update().await?;
                println!(
                    "{} found, {} missing, {} invalid",
                    result.matches.len(),
                    result.missing.len(),
                    result.invalid.len()
                );
                Ok::<(), CliError>(())
            })
        }
    }
}
