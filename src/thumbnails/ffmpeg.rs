//! ffmpeg-backed [`FrameExtractor`].

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use super::{ExtractionError, FrameExtractor, FrameSource};
use crate::admission;
use crate::fetch::{self, DownloadError, HttpTransport};

/// ffmpeg may only open network inputs; nested references (playlists,
/// segments) are held to the same list.
const PROTOCOL_WHITELIST: &str = "http,https,tcp,tls";

#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub command: PathBuf,
    /// Output width in pixels; height follows the aspect ratio.
    pub width: u32,
    /// JPEG quality scale passed to `-q:v` (2 is best, 31 worst).
    pub quality: u32,
    pub frame_timeout: Option<Duration>,
    pub scratch_dir: PathBuf,
}

pub struct FfmpegExtractor {
    settings: FfmpegSettings,
    duration_regex: Regex,
    resolver: Option<Resolver>,
}

/// Follows redirects with the admission-checked HTTP client so ffmpeg is
/// handed the final location instead of chasing redirects itself.
struct Resolver {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl FfmpegExtractor {
    pub fn new(settings: FfmpegSettings) -> Result<Self> {
        // Matches "Duration: 00:01:02.50," in ffmpeg's stream summary
        let duration_regex = Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)")?;

        Ok(Self {
            settings,
            duration_regex,
            resolver: None,
        })
    }

    /// Resolves every source through `transport` before spawning ffmpeg.
    pub fn with_resolver(mut self, transport: Arc<dyn HttpTransport>, timeout: Duration) -> Self {
        self.resolver = Some(Resolver { transport, timeout });
        self
    }

    pub fn settings(&self) -> &FfmpegSettings {
        &self.settings
    }

    /// Seconds from the first `Duration:` line, `None` for `N/A` or no match.
    pub fn parse_duration(&self, diagnostics: &str) -> Option<f64> {
        let captures = self.duration_regex.captures(diagnostics)?;
        let hours: f64 = captures[1].parse().ok()?;
        let minutes: f64 = captures[2].parse().ok()?;
        let seconds: f64 = captures[3].parse().ok()?;
        let total = hours * 3600.0 + minutes * 60.0 + seconds;
        (total > 0.0).then_some(total)
    }

    async fn run(&self, command: &mut Command) -> Result<Output, ExtractionError> {
        command.stdin(Stdio::null()).kill_on_drop(true);

        let output = match self.settings.frame_timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| ExtractionError::Timeout(limit))?,
            None => command.output().await,
        };

        output.map_err(|err| {
            ExtractionError::Spawn(format!("{} ({})", err, self.settings.command.display()))
        })
    }

    async fn capture(&self, url: &Url, timestamp: f64, output_path: &Path) -> Result<Vec<u8>, ExtractionError> {
        // -ss before -i: seek on the input, which avoids decoding from the start
        // -frames:v 1: a single frame
        // -vf scale=W:-2: fixed width, even height keeping the aspect ratio
        // -q:v: JPEG quality
        // -y: overwrite the scratch file
        let mut command = Command::new(&self.settings.command);
        command
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-protocol_whitelist", PROTOCOL_WHITELIST])
            .args(["-ss", &format!("{timestamp:.3}")])
            .args(["-i", url.as_str()])
            .args(["-frames:v", "1"])
            .args(["-vf", &format!("scale={}:-2", self.settings.width)])
            .args(["-q:v", &self.settings.quality.to_string()])
            .arg("-y")
            .arg(output_path);

        let output = self.run(&mut command).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Ffmpeg(format!(
                "exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        match tokio::fs::read(output_path).await {
            Ok(image) if !image.is_empty() => Ok(image),
            Ok(_) => Err(ExtractionError::NoOutput(timestamp)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ExtractionError::NoOutput(timestamp)),
            Err(err) => Err(ExtractionError::Ffmpeg(format!("failed to read frame: {err}"))),
        }
    }

    /// Admitted URL ffmpeg should open: the source itself, or its final
    /// location when a resolver is configured. The final hop is admitted too.
    async fn target_url(&self, source: &FrameSource) -> Result<Url, ExtractionError> {
        let url = admitted_url(source)?;
        let Some(resolver) = &self.resolver else {
            return Ok(url.clone());
        };

        let location = fetch::resolve_location(resolver.transport.as_ref(), url, resolver.timeout)
            .await
            .map_err(|err| match err {
                DownloadError::RedirectBlocked => {
                    warn!("Refused redirect while resolving {}", url);
                    ExtractionError::Forbidden
                }
                other => ExtractionError::Unreachable(other.to_string()),
            })?;

        if !admission::admit_parsed(&location).allowed {
            return Err(ExtractionError::Forbidden);
        }
        Ok(location)
    }
}

/// Re-checks the URL against the admission guard before handing it to ffmpeg.
fn admitted_url(source: &FrameSource) -> Result<&Url, ExtractionError> {
    match source {
        FrameSource::Buffer(_) => Err(ExtractionError::UnsupportedSource),
        FrameSource::Url(url) => {
            if admission::admit_parsed(url).allowed {
                Ok(url)
            } else {
                Err(ExtractionError::Forbidden)
            }
        }
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract_frame(&self, source: &FrameSource, timestamp: f64) -> Result<Vec<u8>, ExtractionError> {
        let url = self.target_url(source).await?;
        let scratch = ScratchFile::new(&self.settings.scratch_dir);
        debug!("Extracting frame at {:.3}s into {:?}", timestamp, scratch.path());

        let result = self.capture(&url, timestamp, scratch.path()).await;
        scratch.release().await;
        result
    }

    async fn probe_duration(&self, source: &FrameSource) -> Result<Option<f64>, ExtractionError> {
        let url = self.target_url(source).await?;

        // Without an output ffmpeg prints the stream summary and exits non-zero.
        let mut command = Command::new(&self.settings.command);
        command
            .arg("-hide_banner")
            .args(["-protocol_whitelist", PROTOCOL_WHITELIST])
            .args(["-i", url.as_str()]);

        let output = self.run(&mut command).await?;
        let diagnostics = String::from_utf8_lossy(&output.stderr);
        let duration = self.parse_duration(&diagnostics);
        if duration.is_none() {
            debug!("No usable duration in ffmpeg output for {}", url);
        }
        Ok(duration)
    }
}

/// Scratch output path that is removed when released or dropped.
pub struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("frame-{}.jpg", uuid::Uuid::new_v4())),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn release(mut self) {
        self.armed = false;
        remove_quietly(tokio::fs::remove_file(&self.path).await, &self.path);
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.armed {
            remove_quietly(std::fs::remove_file(&self.path), &self.path);
        }
    }
}

fn remove_quietly(result: std::io::Result<()>, path: &Path) {
    match result {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to remove scratch file {:?}: {}", path, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn extractor(dir: &Path) -> FfmpegExtractor {
        FfmpegExtractor::new(FfmpegSettings {
            command: PathBuf::from("ffmpeg"),
            width: 320,
            quality: 3,
            frame_timeout: None,
            scratch_dir: dir.to_path_buf(),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_duration() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = extractor(dir.path());

        let stderr = concat!(
            "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'clip.mp4':\n",
            "  Duration: 00:01:02.50, start: 0.000000, bitrate: 1205 kb/s\n",
        );
        assert_eq!(ffmpeg.parse_duration(stderr), Some(62.5));
        assert_eq!(
            ffmpeg.parse_duration("  Duration: 01:00:00.00, start: 0"),
            Some(3600.0)
        );
        assert_eq!(ffmpeg.parse_duration("  Duration: N/A, bitrate: N/A"), None);
        assert_eq!(ffmpeg.parse_duration("  Duration: 00:00:00.00, start: 0"), None);
        assert_eq!(ffmpeg.parse_duration("clip.mp4: Invalid data found"), None);
    }

    #[test]
    fn test_scratch_file_names_are_unique_and_dropped() {
        let dir = TempDir::new().unwrap();
        let first = ScratchFile::new(dir.path());
        let second = ScratchFile::new(dir.path());
        assert_ne!(first.path(), second.path());
        let name = first.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("frame-") && name.ends_with(".jpg"));

        std::fs::write(first.path(), b"jpeg").unwrap();
        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_scratch_release_removes_file() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchFile::new(dir.path());
        let path = scratch.path().to_path_buf();
        std::fs::write(&path, b"jpeg").unwrap();

        scratch.release().await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_buffer_and_private_sources_rejected_before_spawn() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = extractor(dir.path());

        let err = ffmpeg
            .extract_frame(&FrameSource::Buffer(vec![0; 16]), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedSource));

        let private = FrameSource::Url(Url::parse("http://192.168.1.20/cam.mp4").unwrap());
        let err = ffmpeg.probe_duration(&private).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Forbidden));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = FfmpegExtractor::new(FfmpegSettings {
            command: dir.path().join("no-such-ffmpeg"),
            width: 320,
            quality: 3,
            frame_timeout: None,
            scratch_dir: dir.path().to_path_buf(),
        })
        .unwrap();
        let source = FrameSource::Url(Url::parse("https://example.com/a.mp4").unwrap());

        let err = ffmpeg.extract_frame(&source, 1.0).await.unwrap_err();

        assert!(matches!(err, ExtractionError::Spawn(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
