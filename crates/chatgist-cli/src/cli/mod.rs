//! CLI command definitions for the `chatgist` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod chats;
pub mod digest;

use std::path::PathBuf;

use chatgist_types::chat::ChatId;
use clap::{Parser, Subcommand};

/// Summarize unread chats into short digests and listenable audio.
#[derive(Parser)]
#[command(name = "chatgist", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to ~/.config/chatgist/chatgist.toml).
    #[arg(long, global = true, env = "CHATGIST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Chat export the chats are read from.
    #[arg(long, global = true, env = "CHATGIST_EXPORT", default_value = "chats.json")]
    pub export: PathBuf,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List chats, most unread first.
    #[command(alias = "ls")]
    Chats {
        /// Only chats at or above the configured unread threshold.
        #[arg(long)]
        unread: bool,

        /// Only chats flagged favorite.
        #[arg(long, conflicts_with = "unread")]
        favorites: bool,
    },

    /// Summarize a chat's unread messages.
    Digest {
        /// Chat to summarize.
        #[arg(allow_negative_numbers = true)]
        chat_id: ChatId,

        /// Render speech for batch N afterwards (no value or 0: the whole chat).
        #[arg(long, num_args = 0..=1, default_missing_value = "0", value_name = "BATCH")]
        audio: Option<usize>,

        /// Mark batches 1..=N read afterwards (no value or 0: everything).
        #[arg(long, num_args = 0..=1, default_missing_value = "0", value_name = "PAGE")]
        mark_read: Option<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn digest_flags_default_to_whole_chat() {
        let cli = Cli::parse_from(["chatgist", "digest", "-100", "--audio", "--mark-read", "2"]);
        match cli.command {
            Commands::Digest {
                chat_id,
                audio,
                mark_read,
            } => {
                assert_eq!(chat_id, -100);
                assert_eq!(audio, Some(0));
                assert_eq!(mark_read, Some(2));
            }
            Commands::Chats { .. } => panic!("expected digest"),
        }
    }

    #[test]
    fn chats_views_conflict() {
        assert!(Cli::try_parse_from(["chatgist", "chats", "--unread", "--favorites"]).is_err());
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from(["chatgist", "ls", "--json", "-vv", "--export", "x.json"]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.export, PathBuf::from("x.json"));
    }
}
