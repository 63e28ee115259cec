use crate::analysis::MediaInfoCli;
use crate::api::{ApiServer, AppState};
use crate::config::Config;
use crate::fetch::{HttpTransport, ReqwestTransport};
use crate::thumbnails::{FfmpegExtractor, FfmpegSettings};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Production collaborators wired from configuration.
pub fn build_state(config: &Config) -> Result<AppState> {
    let transport = build_transport(config)?;
    let engines = MediaInfoCli::new(
        &config.analysis.command,
        &config.analysis.candidates,
        config.thumbnails.scratch_dir(),
    );
    let frames = build_frame_extractor(config, transport.clone())?;

    Ok(AppState::new(config, transport, Arc::new(engines), Arc::new(frames)))
}

pub fn build_transport(config: &Config) -> Result<Arc<dyn HttpTransport>> {
    let transport = ReqwestTransport::new(&config.fetch.user_agent, config.fetch.max_redirects)
        .context("Failed to build HTTP client")?;
    Ok(Arc::new(transport))
}

/// ffmpeg extractor whose sources are resolved through `transport` first.
pub fn build_frame_extractor(config: &Config, transport: Arc<dyn HttpTransport>) -> Result<FfmpegExtractor> {
    let extractor = FfmpegExtractor::new(FfmpegSettings {
        command: PathBuf::from(&config.thumbnails.ffmpeg_command),
        width: config.thumbnails.width,
        quality: config.thumbnails.quality,
        frame_timeout: config.thumbnails.frame_timeout(),
        scratch_dir: config.thumbnails.scratch_dir(),
    })?;
    Ok(extractor.with_resolver(transport, config.fetch.timeout()))
}

pub async fn run_service(config: Config) -> Result<()> {
    info!("Starting mediaprobe service");

    let state = build_state(&config)?;
    info!(
        "Fetch limits: {} bytes, {}s per attempt, {} redirect(s)",
        config.fetch.byte_ceiling, config.fetch.timeout_secs, config.fetch.max_redirects
    );

    ApiServer::new(&config, state).start().await
}
