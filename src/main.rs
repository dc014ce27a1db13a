use clap::{Parser, Subcommand};
use pineapple::error::Result;
use pineapple::system::browser;
use pineapple::{config, CatalogSync, Db, PlaybackTracker, ProgressCallback};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Local video library catalog", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a directory and add its folders as collections
    Import { directory: PathBuf },
    /// Rescan the directory of an existing collection
    Refresh { directory: PathBuf },
    /// Delete a collection and its videos
    Delete { id: i64 },
    /// List collections
    Collections,
    /// List the videos of a collection
    Videos { collection_id: i64 },
    /// Search videos by name
    Search { query: String },
    /// Recently played videos
    Recent {
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// List folders that can be imported
    Browse { directory: PathBuf },
    /// Record a playback position (milliseconds)
    Progress {
        video_id: i64,
        position: i64,
        duration: i64,
    },
    /// Show the video after this one in its collection
    Next { video_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = config::Config::load(&args.config).unwrap_or_else(|e| {
        warn!("Failed to load {:?}: {}. Using defaults.", args.config, e);
        config::Config::default()
    });

    let db = Arc::new(Db::new(&config.library.database_path).await?);
    let sync = CatalogSync::from_config(db.clone(), &config);
    let playback = PlaybackTracker::new(db.clone());

    match args.command {
        Command::Import { directory } => {
            let summary = sync
                .import_directory(&directory, Some(log_progress()))
                .await?;
            print_json(&summary)?;
        }
        Command::Refresh { directory } => {
            if !sync.refresh_collection(&directory, Some(log_progress())).await? {
                warn!("No collection is registered for {:?}", directory);
            }
        }
        Command::Delete { id } => {
            if !sync.delete_collection(id).await? {
                warn!("Collection #{} does not exist", id);
            }
        }
        Command::Collections => print_json(&db.list_collections().await?)?,
        Command::Videos { collection_id } => print_json(&db.list_videos(collection_id).await?)?,
        Command::Search { query } => print_json(&db.search_videos(&query).await?)?,
        Command::Recent { limit } => {
            let limit = limit.unwrap_or(config.playback.recent_limit);
            print_json(&playback.get_recent(limit).await?)?;
        }
        Command::Browse { directory } => print_json(&browser::list_folders(&directory)?)?,
        Command::Progress {
            video_id,
            position,
            duration,
        } => {
            playback.save(video_id, position, duration).await?;
            info!("Saved position {} ms for video #{}", position, video_id);
        }
        Command::Next { video_id } => print_json(&playback.next_video(video_id).await?)?,
    }

    Ok(())
}

fn log_progress() -> ProgressCallback {
    Arc::new(|current: usize, total: usize, label: &str| {
        info!("[{}/{}] {}", current + 1, total.max(1), label);
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{}", out);
    Ok(())
}
