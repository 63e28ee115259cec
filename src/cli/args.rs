use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mediaprobe")]
#[command(about = "Inspect remote media files and extract preview frames", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file to use instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the HTTP service (default)
    Serve(ServeCliArgs),
    /// Analyze a remote URL or a local file and print the report as JSON
    Analyze(AnalyzeCliArgs),
    /// Extract thumbnails from a remote URL into a directory
    Thumbnails(ThumbnailsCliArgs),
    /// Check whether a URL would be accepted for fetching
    Admit(AdmitCliArgs),
    /// Show the effective configuration or write the default file
    Config(ConfigCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug, Default)]
pub struct ServeCliArgs {
    /// Port to listen on, overriding the config file
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(ClapArgs, Debug)]
pub struct AnalyzeCliArgs {
    /// http(s) URL or path to a local media file
    pub target: String,
}

#[derive(ClapArgs, Debug)]
pub struct ThumbnailsCliArgs {
    /// http(s) URL of the media
    pub url: String,
    /// Number of frames (1-8)
    #[arg(short = 'n', long)]
    pub count: Option<i64>,
    /// Sampling mode: random, timeline or custom
    #[arg(short, long, default_value = "random")]
    pub mode: String,
    /// Explicit timestamps in seconds (custom mode)
    #[arg(long = "at", value_delimiter = ',')]
    pub at: Vec<f64>,
    /// Second URL; writes A/B frame pairs instead of single frames
    #[arg(long)]
    pub compare: Option<String>,
    /// Directory the JPEG files are written to
    #[arg(short, long)]
    pub out_dir: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct AdmitCliArgs {
    pub url: String,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigCliArgs {
    /// Write the default config file
    #[arg(long)]
    pub init: bool,
    /// Overwrite an existing file when used with --init
    #[arg(long)]
    pub force: bool,
}
