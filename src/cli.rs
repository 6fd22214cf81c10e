use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Manage a local manga library fed by remote sources
#[derive(Parser)]
#[command(name = "tankobon")]
#[command(about = "Follow manga series from remote sources and read them offline", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to <config_dir>/config.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available sources
    Sources,
    /// Search a source
    Search {
        source: String,
        term: String,
    },
    /// List a source's catalog
    Browse {
        source: String,
        /// Catalog page, starting at 1
        #[arg(short, long, default_value_t = 1, conflicts_with = "all")]
        page: u32,
        /// Walk every catalog page
        #[arg(long)]
        all: bool,
    },
    /// Add a series to the library
    Add {
        source: String,
        slug: String,
        /// Series URL, for sources that address series by URL
        #[arg(long)]
        url: Option<String>,
    },
    /// List the library
    List {
        /// Only series whose name or source matches
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Show a series and its chapters
    Show {
        series_id: i64,
    },
    /// Fetch a page and print its local path
    Read {
        series_id: i64,
        chapter_id: i64,
        /// Page index, starting at 0
        #[arg(short, long, default_value_t = 0)]
        page: usize,
    },
    /// Re-sync one series, or the whole library
    Update {
        series_id: Option<i64>,
        /// Series updated at the same time (defaults to the configured value)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Remove a series with its cached files
    Delete {
        series_id: i64,
    },
    /// Export a chapter as a CBZ archive
    Export {
        series_id: i64,
        chapter_id: i64,
        output: PathBuf,
    },
    /// Catalog counters
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["tankobon", "read", "1", "2", "--page", "3", "--config", "x.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("x.toml")));
        assert!(matches!(cli.command, Commands::Read { series_id: 1, chapter_id: 2, page: 3 }));
    }

    #[test]
    fn browse_page_and_all_conflict() {
        assert!(Cli::try_parse_from(["tankobon", "browse", "webtoon", "--page", "2", "--all"]).is_err());
        let cli = Cli::try_parse_from(["tankobon", "browse", "webtoon", "--all"]).unwrap();
        assert!(matches!(cli.command, Commands::Browse { page: 1, all: true, .. }));
    }
}
