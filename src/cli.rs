use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mastercheck", about = "Mastering-readiness audio metrics and target scoring")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG, AAC)
    pub input: Option<PathBuf>,

    /// Output JSON file (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Target spec file (JSON; canonical, tolerance or flat shape)
    #[arg(short, long)]
    pub targets: Option<PathBuf>,

    /// Playback mode preset / override (streaming, club, reference)
    #[arg(short, long)]
    pub mode: Option<String>,

    /// True Peak oversampling factor (4 or 8)
    #[arg(long, default_value_t = 4)]
    pub oversample: u32,

    /// Audit mode: invariant violations abort instead of degrading
    #[arg(long)]
    pub strict: bool,

    /// Overall analysis timeout in seconds (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Job identifier passed through to the report
    #[arg(long)]
    pub job_id: Option<String>,

    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
}
