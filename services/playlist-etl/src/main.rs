//!
//! src/main.rs  Andrew Belles  Sept 13, 2025
//!
//! Entry point for the playlist etl: runs either the extract or the
//! transform handler once and prints its response
//!
//!

mod config;
mod errors;
mod logging;

mod dates;
mod extractor;
mod fetch;
mod handler;
mod storage;
mod transform;
mod transformer;
mod types;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::handler::InvocationContext;

#[derive(Debug, Parser)]
#[command(name = "playlist-etl", version, about = "Stage and normalize spotify playlist data")]
struct Cli {
    /// Opaque trigger payload (json); only logged
    #[arg(long, global = true, default_value = "{}")]
    payload: String,

    /// Work on an in-memory copy of the bucket; nothing is persisted
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch the playlist and stage the raw response
    Extract {
        /// Playlist url, spotify: uri or bare id, overrides SPOTIFY_PLAYLIST
        #[arg(long)]
        playlist: Option<String>
    },
    /// Turn pending raw snapshots into songs/albums/artists csv
    Transform
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let env = config::load_env();
    let logging = config::build_logging(&env);
    let _guard = match logging::init_logging(&logging) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("logging disabled: {e}");
            None
        }
    };

    tracing::info!(
        service = "playlist-etl",
        version = %env!("CARGO_PKG_VERSION"),
        "starting"
    );

    let event = serde_json::from_str::<Value>(&cli.payload)
        .unwrap_or_else(|_| Value::String(cli.payload.clone()));
    let ctx = InvocationContext::new(cli.dry_run);

    let outcome = match cli.command {
        Command::Extract { playlist } =>
            handler::extract_handler(&env, &event, &ctx, playlist).await,
        Command::Transform => handler::transform_handler(&env, &event, &ctx).await
    };

    match serde_json::to_string(&outcome) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("could not encode response: {e}")
    }

    if outcome.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_extract_with_playlist() {
        let cli = Cli::try_parse_from([
            "playlist-etl", "extract", "--playlist", "https://open.spotify.com/playlist/abc"
        ]).unwrap();
        assert!(!cli.dry_run);
        match cli.command {
            Command::Extract { playlist } =>
                assert_eq!(playlist.as_deref(), Some("https://open.spotify.com/playlist/abc")),
            other => panic!("unexpected {other:?}")
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "playlist-etl", "transform", "--dry-run", "--payload", "{\"source\":\"aws.events\"}"
        ]).unwrap();
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Command::Transform));
        assert_eq!(cli.payload, "{\"source\":\"aws.events\"}");
    }
}
