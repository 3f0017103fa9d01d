use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "zipflow")]
#[command(version)]
#[command(about = "Stream a ZIP64 archive from files, URLs, and synthetic payloads", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipflow -o out.zip a.txt b.txt              archive two local files\n  \
  zipflow https://example.com/data.csv | wc -c   stream a download into a pipe\n  \
  zipflow -o big.zip random:1073741824        one 1 GiB entry of random bytes")]
pub struct Cli {
    /// Entry payloads: local paths, http(s):// URLs, or random:SIZE
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<String>,

    /// Write the archive to FILE instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Skip failing entries instead of aborting the stream
    #[arg(long = "skip-errors")]
    pub skip_errors: bool,

    /// Store entries without compression
    #[arg(long = "store")]
    pub store: bool,

    /// Deflate level 0-9
    #[arg(short = 'l', long = "level", value_name = "N")]
    pub level: Option<u32>,

    /// Report per-entry progress on stderr
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Quiet mode, no summary
    #[arg(short = 'q')]
    pub quiet: bool,
}

impl Cli {
    pub fn is_http_url(input: &str) -> bool {
        input.starts_with("http://") || input.starts_with("https://")
    }

    /// `random:SIZE` inputs produce SIZE strong random bytes.
    pub fn random_size(input: &str) -> Option<u64> {
        input
            .strip_prefix("random:")
            .and_then(|size| size.parse().ok())
    }
}
