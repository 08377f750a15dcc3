use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "hydrate-dial", version, about = "Offline cache host and daily tally")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the default configuration file
    Init,
    /// Populate the current cache generation from the manifest
    Install,
    /// Activate an installed generation and delete stale ones
    Activate,
    /// Install, then activate
    Update,
    /// Resolve a request through cache, network and offline fallback
    Fetch {
        /// Root-relative path or absolute URL
        path: String,
        #[arg(long, default_value = "GET")]
        method: String,
    },
    /// List cache generations (* marks the current one)
    Generations,
    /// Today's counter
    Tally {
        #[command(subcommand)]
        action: TallyAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyAction {
    Show,
    Inc,
    Dec,
    Reset,
    History,
}
