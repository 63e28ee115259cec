//! `mediainfo` command-line engine.
//!
//! Each session materialises the byte source into a scratch file, runs
//! `mediainfo --Output=JSON` against it and hands back the raw stdout. The
//! scratch file is removed on `close()`, or on drop when a session is
//! abandoned mid-analysis.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use which::which;

use super::{AnalysisEngine, AnalysisError, ByteSource, EngineFactory, EngineOutput};

/// Bytes copied from the source per write.
const COPY_CHUNK_BYTES: usize = 256 * 1024;

pub struct MediaInfoCli {
    binary: Option<PathBuf>,
    command: String,
    scratch_dir: PathBuf,
}

impl MediaInfoCli {
    /// Resolves the binary once. A missing binary is not an error here; each
    /// analysis request reports it instead.
    pub fn new(command: &str, candidates: &[PathBuf], scratch_dir: PathBuf) -> Self {
        let binary = resolve_binary(command, candidates);
        match &binary {
            Some(path) => info!("Using mediainfo at {:?}", path),
            None => warn!(
                "mediainfo not found (command '{}', {} candidate path(s)); analysis requests will fail",
                command,
                candidates.len()
            ),
        }
        Self {
            binary,
            command: command.to_string(),
            scratch_dir,
        }
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }
}

#[async_trait]
impl EngineFactory for MediaInfoCli {
    async fn init(&self) -> Result<Box<dyn AnalysisEngine>, AnalysisError> {
        let binary = self.binary.clone().ok_or_else(|| {
            AnalysisError::EngineUnavailable(format!(
                "'{}' was not found in the configured locations or PATH",
                self.command
            ))
        })?;
        let scratch_path = self
            .scratch_dir
            .join(format!("probe-{}.bin", uuid::Uuid::new_v4()));

        Ok(Box::new(MediaInfoSession {
            binary,
            scratch_path,
            created: false,
        }))
    }
}

/// First existing candidate, then a `PATH` lookup of `command`.
pub fn resolve_binary(command: &str, candidates: &[PathBuf]) -> Option<PathBuf> {
    let command_path = Path::new(command);
    if command_path.is_absolute() && command_path.is_file() {
        return Some(command_path.to_path_buf());
    }

    candidates
        .iter()
        .find(|candidate| candidate.is_file())
        .cloned()
        .or_else(|| which(command).ok())
}

struct MediaInfoSession {
    binary: PathBuf,
    scratch_path: PathBuf,
    created: bool,
}

impl MediaInfoSession {
    async fn materialise(&mut self, source: &dyn ByteSource) -> std::io::Result<()> {
        // Armed before creation so a cancelled create still gets cleaned up.
        self.created = true;
        let mut file = tokio::fs::File::create(&self.scratch_path).await?;

        let size = source.size();
        let mut offset = 0u64;
        while offset < size {
            let chunk = source.read_chunk(offset, COPY_CHUNK_BYTES);
            if chunk.is_empty() {
                break;
            }
            file.write_all(chunk).await?;
            offset += chunk.len() as u64;
        }
        file.flush().await?;
        debug!("Wrote {} bytes to {:?}", offset, self.scratch_path);
        Ok(())
    }
}

#[async_trait]
impl AnalysisEngine for MediaInfoSession {
    async fn analyze_data(&mut self, source: &dyn ByteSource) -> Result<Option<EngineOutput>, AnalysisError> {
        self.materialise(source)
            .await
            .map_err(|err| AnalysisError::Engine(format!("failed to stage media for analysis: {err}")))?;

        let output = tokio::process::Command::new(&self.binary)
            .arg("--Output=JSON")
            .arg(&self.scratch_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| AnalysisError::Engine(format!("failed to run mediainfo: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalysisError::Engine(format!(
                "mediainfo exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(EngineOutput::Text(stdout)))
    }

    async fn close(&mut self) {
        if !self.created {
            return;
        }
        self.created = false;
        remove_scratch(tokio::fs::remove_file(&self.scratch_path).await, &self.scratch_path);
    }
}

/// Covers sessions dropped mid-analysis, e.g. when the request is cancelled.
impl Drop for MediaInfoSession {
    fn drop(&mut self) {
        if self.created {
            debug!("Session dropped before close, removing {:?}", self.scratch_path);
            remove_scratch(std::fs::remove_file(&self.scratch_path), &self.scratch_path);
        }
    }
}

fn remove_scratch(result: std::io::Result<()>, path: &Path) {
    match result {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to remove scratch file {:?}: {}", path, err),
    }
}
