//! CLI handler for one-off analysis.

use crate::admission;
use crate::analysis::{AnalysisAdapter, MediaInfoCli};
use crate::config::Config;
use crate::fetch::{BoundedFetcher, FetchRequest, ReqwestTransport};
use crate::report::FileInfo;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use super::args::AnalyzeCliArgs;

pub async fn handle_analyze_command(args: AnalyzeCliArgs, config: &Config) -> Result<()> {
    let engines = MediaInfoCli::new(
        &config.analysis.command,
        &config.analysis.candidates,
        config.thumbnails.scratch_dir(),
    );
    let analyzer = AnalysisAdapter::new(Arc::new(engines));

    let target = args.target.trim();
    let is_remote = target.starts_with("http://") || target.starts_with("https://");

    let (file_info, buffer) = if is_remote {
        let url = admission::admit_url(target)?;
        let transport = ReqwestTransport::new(&config.fetch.user_agent, config.fetch.max_redirects)?;
        let fetcher = BoundedFetcher::new(Arc::new(transport));
        let request = FetchRequest::new(url.clone(), config.fetch.byte_ceiling, config.fetch.timeout())?;
        let fetched = fetcher.fetch(&request).await?;
        (FileInfo::from_fetch(&url, &fetched), fetched.buffer)
    } else {
        let path = Path::new(target);
        let buffer = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| target.to_string());
        (FileInfo::from_upload(filename, buffer.len() as u64), buffer)
    };

    let report = analyzer.analyze(&buffer).await?;
    let output = json!({
        "fileInfo": file_info,
        "data": report,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
