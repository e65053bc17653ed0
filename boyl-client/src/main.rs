//! boyl-client CLI
//!
//! Manages local settings and drives downloads from the catalog server.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::SyncSender;
use std::thread;

use clap::{Parser, Subcommand};

use boyl_client::{
    CancelOutcome, DownloadError, Manager, Remote, RemoteClient, SettingKey, Settings, queue,
};
use boyl_db::{Db, DownloadRecord, Side, insert_download, list_downloads};

#[derive(Parser)]
#[command(name = "boyl-client")]
#[command(about = "Download and install games from a boyl server", long_about = None)]
struct Cli {
    /// Directory holding the client database (defaults to the platform data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read or change a setting
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Download and install a game by its server id
    Download {
        /// Game id on the server
        game: String,
    },

    /// Resume every stored download, then exit
    Run,

    /// Cancel a running download, or remove a finished one
    Cancel {
        /// Download record id
        id: String,
    },

    /// List download records
    List,

    /// Re-read the server settings and re-authenticate
    UpdateRemote,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print a setting
    Get { key: SettingKey },
    /// Store a setting; values that are not valid JSON are stored as strings
    Set { key: SettingKey, value: String },
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

fn database_path(data_dir: Option<PathBuf>) -> Result<PathBuf, DownloadError> {
    let dir = match data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .map(|d| d.join("boyl"))
            .ok_or_else(|| DownloadError::config("no data directory on this platform"))?,
    };
    Ok(dir.join("client.db"))
}

fn run(cli: Cli) -> Result<(), DownloadError> {
    let db = Db::open(&database_path(cli.data_dir)?, Side::Client)?;
    let settings = Settings::new(db.clone());
    settings.record_os()?;

    match cli.command {
        Commands::Settings { action } => settings_command(&settings, action),
        Commands::Download { game } => {
            let record = insert_download(&db.lock(), &game)?;
            log::info!("Queued download {} for game {game}", record.id);
            drive(db, settings, |_, tx| {
                tx.send(record)
                    .map_err(|_| DownloadError::config("download queue closed"))
            })
        }
        Commands::Run => drive(db, settings, |manager, tx| {
            let queued = manager.replay(tx)?;
            log::info!("Replaying {queued} download(s)");
            Ok(())
        }),
        Commands::Cancel { id } => {
            let url = settings.get_string(SettingKey::ServerUrl)?;
            let remote: Arc<dyn Remote> = Arc::new(RemoteClient::new(&url)?);
            let manager = Manager::new(db, remote, settings);
            match manager.cancel(&id)? {
                CancelOutcome::Cancelled => println!("cancelled {id}"),
                CancelOutcome::Deleted => println!("removed {id}"),
            }
            Ok(())
        }
        Commands::List => {
            for d in list_downloads(&db.lock())? {
                println!(
                    "{}  {:<11} {:>5.1}%  {}  {}",
                    d.id,
                    d.status,
                    d.progress * 100.0,
                    d.game,
                    d.text
                );
            }
            Ok(())
        }
        Commands::UpdateRemote => {
            let client = RemoteClient::from_settings(&settings)?;
            match client.identity().as_str() {
                "" => println!("using {} anonymously", client.url()),
                who => println!("authenticated to {} as {who}", client.url()),
            }
            Ok(())
        }
    }
}

fn settings_command(settings: &Settings, action: SettingsAction) -> Result<(), DownloadError> {
    match action {
        SettingsAction::Get { key } => {
            match settings.get(key)? {
                Some(serde_json::Value::String(s)) => println!("{s}"),
                Some(value) => println!("{value}"),
                None => {}
            }
            Ok(())
        }
        SettingsAction::Set { key, value } => {
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            settings.set(key, &value)?;
            Ok(())
        }
    }
}

/// Start the worker, let `feed` enqueue records, then wait for the queue to
/// drain and clear the `active` flags.
fn drive(
    db: Db,
    settings: Settings,
    feed: impl FnOnce(&Manager, &SyncSender<DownloadRecord>) -> Result<(), DownloadError>,
) -> Result<(), DownloadError> {
    let remote: Arc<dyn Remote> = Arc::new(RemoteClient::from_settings(&settings)?);
    let manager = Arc::new(Manager::new(db, remote, settings));
    let (tx, rx) = queue();

    let worker = {
        let manager = manager.clone();
        thread::spawn(move || manager.worker(rx))
    };

    let fed = feed(&manager, &tx);
    drop(tx);
    if worker.join().is_err() {
        log::error!("Download worker panicked");
    }
    fed?;

    let cleared = manager.shutdown()?;
    log::debug!("Deactivated {cleared} download(s)");
    Ok(())
}
