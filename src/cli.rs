use clap::{Parser, Subcommand};

use crate::app::dispatcher::MatchThreshold;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the http daemon the browser extension posts events to.
    Daemon {},

    /// Diff the local bookmark tree against the remote index and sync what is missing.
    Sync {
        /// Profile `Bookmarks` file or a tree export.
        /// Defaults to `bookmarks_file` from config.yaml
        #[clap(short, long)]
        bookmarks: Option<String>,

        /// Print what would be synced without touching the pending queue
        #[clap(long, default_value = "false")]
        dry_run: bool,
    },

    /// Sync whatever is left in the pending queue.
    Drain {},

    /// Show the sync status and the pending queue.
    Status {},

    /// Clear a `running` sync status left behind by another (crashed) session.
    Reset {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Search your bookmarks with a free-text question.
    Ask {
        question: String,

        /// Similarity cut-off for semantic search.
        /// Defaults to `search.default_threshold` from config.yaml
        #[clap(short, long, value_enum)]
        threshold: Option<MatchThreshold>,
    },

    /// Store the identity bookmarks are synced for.
    Login {
        #[clap(long)]
        user_id: String,

        /// Session token sent as bearer to the remote index
        #[clap(long)]
        access_token: Option<String>,
    },

    /// Watch the profile `Bookmarks` file and sync creations and removals as they happen.
    Watch {
        #[clap(short, long)]
        bookmarks: Option<String>,

        /// Poll interval in seconds
        #[clap(short, long, default_value = "5")]
        interval: u64,
    },

    #[cfg(feature = "markdown-docs")]
    #[clap(hide = true)]
    MarkdownDocs {},
}
