//! CLI command implementations

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;
use undertow_core::UndertowError;
use undertow_core::config::UndertowConfig;
use undertow_core::torrent::{
    BencodeTorrentParser, DownloadSession, SessionReport, TorrentMetadata, TorrentParser,
};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Download a torrent from its swarm
    Download {
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Directory the finished files are written to
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Directory for intermediate piece shards
        #[arg(long)]
        shard_dir: Option<PathBuf>,
    },
    /// Show the contents of a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of whichever command failed
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Download {
            torrent,
            output,
            shard_dir,
        } => download(&torrent, output, shard_dir).await,
        Commands::Info { torrent } => info(&torrent).await,
    }
}

/// Downloads `torrent` and prints a summary.
///
/// # Errors
/// - Torrent file unreadable or invalid
/// - Download stalled or assembling the output failed
pub async fn download(
    torrent: &Path,
    output: Option<PathBuf>,
    shard_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let metadata = load_metadata(torrent).await?;

    let mut config = UndertowConfig::from_env();
    if let Some(output) = output {
        config.storage.output_dir = output;
    }
    if let Some(shard_dir) = shard_dir {
        config.storage.shard_dir = shard_dir;
    }

    println!("Downloading {} ({})", metadata.name, metadata.info_hash);
    println!(
        "  {} pieces of {}, {} total",
        metadata.piece_count(),
        format_bytes(metadata.piece_length),
        format_bytes(metadata.total_length())
    );

    let report = match DownloadSession::new(metadata, config).run().await {
        Ok(report) => report,
        Err(e) => {
            let error = UndertowError::from(e);
            tracing::error!("Download failed: {}", error);
            anyhow::bail!(error.user_message());
        }
    };

    print_report(&report);
    Ok(())
}

/// Prints name, info hash, layout and trackers of `torrent`.
///
/// # Errors
/// - Torrent file unreadable or invalid
pub async fn info(torrent: &Path) -> anyhow::Result<()> {
    let metadata = load_metadata(torrent).await?;

    println!("Name:         {}", metadata.name);
    println!("Info hash:    {}", metadata.info_hash);
    println!("Piece length: {}", format_bytes(metadata.piece_length));
    println!("Pieces:       {}", metadata.piece_count());
    println!("Total size:   {}", format_bytes(metadata.total_length()));

    println!("\nFiles");
    println!("{:-<60}", "");
    for file in metadata.files() {
        println!("  {:>12}  {}", format_bytes(file.length), file.path.join("/"));
    }

    println!("\nTrackers");
    println!("{:-<60}", "");
    if metadata.announce_urls.is_empty() {
        println!("  (none)");
    }
    for url in &metadata.announce_urls {
        println!("  {url}");
    }

    Ok(())
}

async fn load_metadata(torrent: &Path) -> anyhow::Result<TorrentMetadata> {
    BencodeTorrentParser::new()
        .parse_torrent_file(torrent)
        .await
        .with_context(|| format!("Failed to load {}", torrent.display()))
}

fn print_report(report: &SessionReport) {
    println!(
        "\nDownloaded {} in {:.1}s ({} pieces, {} re-queued)",
        format_bytes(report.total_bytes),
        report.elapsed.as_secs_f64(),
        report.total_pieces,
        report.requeued
    );

    for file in &report.files {
        println!("  {}", file.display());
    }

    if !report.peers.is_empty() {
        println!("\nPeers");
        println!("{:-<60}", "");
        for tally in &report.peers {
            println!("  {:<24} {:>6} pieces", tally.address, tally.pieces);
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
