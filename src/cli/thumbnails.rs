//! CLI handler for frame extraction.

use crate::admission;
use crate::app;
use crate::config::Config;
use crate::thumbnails::{sampler, FrameSource, SampleMode, ThumbnailPipeline, ThumbnailRequest};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::path::Path;
use std::sync::Arc;

use super::args::ThumbnailsCliArgs;

pub async fn handle_thumbnails_command(args: ThumbnailsCliArgs, config: &Config) -> Result<()> {
    let mode: SampleMode = args.mode.parse()?;
    if mode == SampleMode::Explicit && args.at.is_empty() {
        bail!("--at is required for custom mode");
    }
    let request = ThumbnailRequest {
        count: sampler::clamp_count(args.count.or(Some(config.thumbnails.default_count as i64)))
            .min(config.thumbnails.max_count.max(1)),
        mode,
        timestamps: args.at.clone(),
    };

    let transport = app::build_transport(config)?;
    let extractor = app::build_frame_extractor(config, transport)?;
    let pipeline = ThumbnailPipeline::new(
        Arc::new(extractor),
        config.thumbnails.concurrency,
        config.thumbnails.compare_concurrency,
    );

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let source = FrameSource::Url(admission::admit_url(&args.url)?);

    match &args.compare {
        None => {
            let thumbnails = pipeline.generate(source, &request).await?;
            for thumb in &thumbnails {
                let path = args.out_dir.join(format!("thumb-{:02}.jpg", thumb.index));
                write_image(&path, &thumb.image_data).await?;
                println!("{}  {}", thumb.timestamp, path.display());
            }
            println!("Wrote {} thumbnail(s)", thumbnails.len());
        }
        Some(other) => {
            let other = FrameSource::Url(admission::admit_url(other)?);
            let pairs = pipeline.compare(source, other, &request).await?;
            for pair in &pairs {
                let path_a = args.out_dir.join(format!("pair-{:02}-a.jpg", pair.index));
                let path_b = args.out_dir.join(format!("pair-{:02}-b.jpg", pair.index));
                write_image(&path_a, &pair.image_a).await?;
                write_image(&path_b, &pair.image_b).await?;
                println!("{}  {}  {}", pair.timestamp, path_a.display(), path_b.display());
            }
            println!("Wrote {} pair(s)", pairs.len());
        }
    }

    Ok(())
}

async fn write_image(path: &Path, encoded: &str) -> Result<()> {
    let bytes = BASE64.decode(encoded).context("Invalid image data")?;
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
