mod analyze;
mod args;
mod thumbnails;

use crate::admission;
use crate::config::Config;
use anyhow::{bail, Context, Result};
use std::path::Path;

pub use analyze::handle_analyze_command;
pub use args::{
    AdmitCliArgs, AnalyzeCliArgs, Cli, CliCommand, ConfigCliArgs, ServeCliArgs, ThumbnailsCliArgs,
};
pub use thumbnails::handle_thumbnails_command;

pub fn handle_admit_command(args: AdmitCliArgs) -> Result<()> {
    let verdict = admission::admit(&args.url);
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    if let Some(reason) = verdict.reason {
        bail!("URL refused ({reason})");
    }
    Ok(())
}

pub fn handle_config_command(args: ConfigCliArgs, path: Option<&Path>) -> Result<()> {
    if args.init {
        let target = match path {
            Some(path) => path.to_path_buf(),
            None => crate::global::config_file()?,
        };
        if target.exists() && !args.force {
            bail!(
                "Config file already exists at {} (use --force to overwrite)",
                target.display()
            );
        }
        let written = Config::default().save(Some(&target))?;
        println!("Wrote default config to {}", written.display());
        return Ok(());
    }

    let config = Config::load(path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    print!("{rendered}");
    Ok(())
}
