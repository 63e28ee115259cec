//! Thumbnail pipeline: probe duration, plan timestamps, extract frames.
//!
//! Frames are pulled straight from the remote URL by the frame extractor, so
//! only URL sources are supported. Uploaded buffers are rejected with
//! [`ExtractionError::UnsupportedSource`].

pub mod extractor;
pub mod ffmpeg;
pub mod sampler;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

pub use extractor::ConcurrentExtractor;
pub use ffmpeg::{FfmpegExtractor, FfmpegSettings};
pub use sampler::{format_timestamp, SampleMode, SamplePlan, SamplingError};

pub const MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Thumbnail generation from uploaded files is not supported; provide a URL instead")]
    UnsupportedSource,
    #[error("URL is not allowed")]
    Forbidden,
    #[error("Failed to reach media URL: {0}")]
    Unreachable(String),
    #[error("Failed to run ffmpeg: {0}")]
    Spawn(String),
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),
    #[error("FFmpeg produced no image at {0:.3}s")]
    NoOutput(f64),
    #[error("FFmpeg timed out after {0:?}")]
    Timeout(Duration),
    #[error("Thumbnail worker failed: {0}")]
    Worker(String),
}

/// Where frames are read from.
#[derive(Debug, Clone)]
pub enum FrameSource {
    Url(Url),
    Buffer(Vec<u8>),
}

impl FrameSource {
    pub fn describe(&self) -> String {
        match self {
            Self::Url(url) => url.to_string(),
            Self::Buffer(data) => format!("<{} byte upload>", data.len()),
        }
    }
}

#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Encoded still image at `timestamp` seconds.
    async fn extract_frame(&self, source: &FrameSource, timestamp: f64) -> Result<Vec<u8>, ExtractionError>;

    /// Media duration in seconds, `None` when the source does not report one.
    async fn probe_duration(&self, source: &FrameSource) -> Result<Option<f64>, ExtractionError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailResult {
    pub index: usize,
    pub timestamp_seconds: f64,
    pub timestamp: String,
    pub image_data: String,
    pub mime_type: &'static str,
}

impl ThumbnailResult {
    pub(crate) fn new(position: usize, timestamp_seconds: f64, image: &[u8]) -> Self {
        Self {
            index: position + 1,
            timestamp_seconds,
            timestamp: format_timestamp(timestamp_seconds),
            image_data: BASE64.encode(image),
            mime_type: MIME_TYPE,
        }
    }

    pub fn image_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.image_data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailPair {
    pub index: usize,
    pub timestamp_seconds: f64,
    pub timestamp: String,
    pub image_a: String,
    pub image_b: String,
    pub mime_type: &'static str,
}

impl ThumbnailPair {
    pub(crate) fn new(position: usize, timestamp_seconds: f64, image_a: &[u8], image_b: &[u8]) -> Self {
        Self {
            index: position + 1,
            timestamp_seconds,
            timestamp: format_timestamp(timestamp_seconds),
            image_a: BASE64.encode(image_a),
            image_b: BASE64.encode(image_b),
            mime_type: MIME_TYPE,
        }
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, Default)]
pub struct ThumbnailRequest {
    pub count: usize,
    pub mode: SampleMode,
    pub timestamps: Vec<f64>,
}

/// Failure anywhere in [`ThumbnailPipeline`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

#[derive(Clone)]
pub struct ThumbnailPipeline {
    extractor: Arc<dyn FrameExtractor>,
    concurrency: usize,
    compare_concurrency: usize,
}

impl ThumbnailPipeline {
    pub fn new(extractor: Arc<dyn FrameExtractor>, concurrency: usize, compare_concurrency: usize) -> Self {
        Self {
            extractor,
            concurrency,
            compare_concurrency,
        }
    }

    pub async fn generate(
        &self,
        source: FrameSource,
        request: &ThumbnailRequest,
    ) -> Result<Vec<ThumbnailResult>, PipelineError> {
        if matches!(source, FrameSource::Buffer(_)) {
            return Err(ExtractionError::UnsupportedSource.into());
        }

        let duration = self.extractor.probe_duration(&source).await?;
        let plan = sampler::plan(duration, request.count, request.mode, &request.timestamps)?;
        info!(
            "Generating {} thumbnail(s) ({} mode) from {}",
            plan.len(),
            plan.mode,
            source.describe()
        );

        let workers = ConcurrentExtractor::new(self.extractor.clone(), self.concurrency);
        Ok(workers.extract_all(Arc::new(source), &plan).await?)
    }

    pub async fn compare(
        &self,
        source_a: FrameSource,
        source_b: FrameSource,
        request: &ThumbnailRequest,
    ) -> Result<Vec<ThumbnailPair>, PipelineError> {
        if matches!(source_a, FrameSource::Buffer(_)) || matches!(source_b, FrameSource::Buffer(_)) {
            return Err(ExtractionError::UnsupportedSource.into());
        }

        let (duration_a, duration_b) = tokio::try_join!(
            self.extractor.probe_duration(&source_a),
            self.extractor.probe_duration(&source_b)
        )?;
        let plan = sampler::plan_pair(
            duration_a,
            duration_b,
            request.count,
            request.mode,
            &request.timestamps,
        )?;
        info!(
            "Comparing {} frame pair(s) ({} mode) between {} and {}",
            plan.len(),
            plan.mode,
            source_a.describe(),
            source_b.describe()
        );

        let workers = ConcurrentExtractor::new(self.extractor.clone(), self.compare_concurrency);
        Ok(workers
            .extract_pairs(Arc::new(source_a), Arc::new(source_b), &plan)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubExtractor {
        durations: Vec<Option<f64>>,
        probes: AtomicUsize,
        frames: AtomicUsize,
    }

    impl StubExtractor {
        fn new(durations: Vec<Option<f64>>) -> Arc<Self> {
            Arc::new(Self {
                durations,
                probes: AtomicUsize::new(0),
                frames: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FrameExtractor for StubExtractor {
        async fn extract_frame(&self, source: &FrameSource, timestamp: f64) -> Result<Vec<u8>, ExtractionError> {
            self.frames.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}@{timestamp}", source.describe()).into_bytes())
        }

        async fn probe_duration(&self, _source: &FrameSource) -> Result<Option<f64>, ExtractionError> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(self.durations[n.min(self.durations.len() - 1)])
        }
    }

    fn url_source(path: &str) -> FrameSource {
        FrameSource::Url(Url::parse(&format!("https://cdn.example.com/{path}")).unwrap())
    }

    fn timeline(count: usize) -> ThumbnailRequest {
        ThumbnailRequest {
            count,
            mode: SampleMode::Timeline,
            timestamps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_generate_builds_results_in_plan_order() {
        let stub = StubExtractor::new(vec![Some(40.0)]);
        let pipeline = ThumbnailPipeline::new(stub.clone(), 3, 2);

        let results = pipeline.generate(url_source("a.mp4"), &timeline(3)).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(results[1].timestamp_seconds, 20.0);
        assert_eq!(results[1].timestamp, "00:20.000");
        assert_eq!(results[1].mime_type, "image/jpeg");
        assert_eq!(
            results[1].image_bytes().unwrap(),
            b"https://cdn.example.com/a.mp4@20".to_vec()
        );
    }

    #[tokio::test]
    async fn test_unknown_duration_fails_before_extraction() {
        let stub = StubExtractor::new(vec![None]);
        let pipeline = ThumbnailPipeline::new(stub.clone(), 3, 2);

        let err = pipeline.generate(url_source("a.mp4"), &timeline(3)).await.unwrap_err();

        assert!(matches!(err, PipelineError::Sampling(SamplingError::UnknownDuration)));
        assert_eq!(stub.frames.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_buffer_source_is_rejected_without_probing() {
        let stub = StubExtractor::new(vec![Some(10.0)]);
        let pipeline = ThumbnailPipeline::new(stub.clone(), 3, 2);

        let err = pipeline
            .generate(FrameSource::Buffer(vec![1, 2, 3]), &timeline(2))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Extraction(ExtractionError::UnsupportedSource)
        ));
        assert_eq!(stub.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compare_samples_over_shorter_source() {
        let stub = StubExtractor::new(vec![Some(90.0), Some(30.0)]);
        let pipeline = ThumbnailPipeline::new(stub.clone(), 3, 2);

        let pairs = pipeline
            .compare(url_source("a.mp4"), url_source("b.mp4"), &timeline(2))
            .await
            .unwrap();

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].timestamp_seconds, 10.0);
        assert_eq!(pairs[1].timestamp_seconds, 20.0);
        assert_ne!(pairs[0].image_a, pairs[0].image_b);
        assert_eq!(stub.frames.load(Ordering::SeqCst), 4);
    }
}
