use anyhow::Result;
use clap::Parser;
use mediaprobe::{
    app,
    cli::{
        handle_admit_command, handle_analyze_command, handle_config_command, handle_thumbnails_command, Cli,
        CliCommand, ServeCliArgs,
    },
    config::Config,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Some(CliCommand::Version) => {
            println!("mediaprobe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::Admit(args)) => handle_admit_command(args),
        Some(CliCommand::Config(args)) => handle_config_command(args, config_path),
        Some(CliCommand::Analyze(args)) => {
            let config = Config::load(config_path)?;
            handle_analyze_command(args, &config).await
        }
        Some(CliCommand::Thumbnails(args)) => {
            let config = Config::load(config_path)?;
            handle_thumbnails_command(args, &config).await
        }
        Some(CliCommand::Serve(args)) => serve(args, config_path).await,
        None => serve(ServeCliArgs::default(), config_path).await,
    }
}

async fn serve(args: ServeCliArgs, config_path: Option<&std::path::Path>) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    app::run_service(config).await
}
