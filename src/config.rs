use crate::source::{DEFAULT_QUEUE_DEPTH, SourceOptions};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "tabixq")]
#[command(about = "Region queries over bgzip-compressed, tabix-indexed files")]
pub struct Config {
    /// Indexed record file (.vcf.gz, .bed.gz, or any tabix-indexed file)
    #[arg(env = "TABIXQ_PATH")]
    pub path: PathBuf,

    /// Regions as chr, chr:start or chr:start-end (1-based, inclusive)
    #[arg(required = true)]
    pub regions: Vec<String>,

    /// Index file, when not next to the data file
    #[arg(long, env = "TABIXQ_INDEX")]
    pub index: Option<PathBuf>,

    /// Records buffered between reader and consumer
    #[arg(long, env = "TABIXQ_QUEUE_DEPTH", default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Print one count per region instead of records
    #[arg(long, env = "TABIXQ_COUNT")]
    pub count: bool,

    /// Print records as JSON lines
    #[arg(long, env = "TABIXQ_JSON", conflicts_with = "count")]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_level: String,
}

impl Config {
    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            queue_depth: self.queue_depth.max(1),
            index_path: self.index.clone(),
        }
    }
}
