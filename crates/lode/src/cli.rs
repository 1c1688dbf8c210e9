use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Sets the level of tracing
    #[arg(long, default_value = "info")]
    pub trace: TraceLevel,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync the named tickers, one at a time.
    Sync { tickers: Vec<String> },

    /// Sync every ticker in a ticker-list file, in bulk chunks.
    SyncAll {
        /// Ticker-list file; header line first, one symbol per line.
        #[arg(default_value = "tickers.csv")]
        file: String,
    },

    /// Ask the assistant a question.
    Ask { prompt: Vec<String> },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceLevel {
    DEBUG,
    INFO,
    WARN,
    ERROR,
}
