//! Media analysis adapter.
//!
//! The metadata engine is opaque: it is handed a random-access byte source
//! and returns a track report. Engines are acquired per call from an
//! [`EngineFactory`] and always closed afterwards, whether analysis succeeded
//! or not.

pub mod mediainfo_cli;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use mediainfo_cli::MediaInfoCli;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Empty or invalid buffer provided")]
    EmptyInput,
    #[error("MediaInfo is not available: {0}")]
    EngineUnavailable(String),
    #[error("Analysis failed: {0}")]
    Engine(String),
    #[error("Analysis failed: MediaInfo returned no data")]
    NoResult,
    #[error("Analysis failed: {0}")]
    Malformed(String),
}

/// Random-access view over the bytes being analyzed.
pub trait ByteSource: Send + Sync {
    fn size(&self) -> u64;

    /// Up to `len` bytes starting at `offset`, clamped to the source bounds.
    /// Reading at or past the end yields an empty slice.
    fn read_chunk(&self, offset: u64, len: usize) -> &[u8];
}

/// In-memory [`ByteSource`].
pub struct BufferSource<'a> {
    data: &'a [u8],
}

impl<'a> BufferSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl ByteSource for BufferSource<'_> {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_chunk(&self, offset: u64, len: usize) -> &[u8] {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        &self.data[start..end]
    }
}

/// Raw engine output before validation.
#[derive(Debug, Clone)]
pub enum EngineOutput {
    Structured(Value),
    Text(String),
}

#[async_trait]
pub trait AnalysisEngine: Send {
    /// Analyzes the source. `Ok(None)` means the engine ran but produced nothing.
    async fn analyze_data(&mut self, source: &dyn ByteSource) -> Result<Option<EngineOutput>, AnalysisError>;

    /// Releases engine resources. Called exactly once per engine.
    async fn close(&mut self);
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn init(&self) -> Result<Box<dyn AnalysisEngine>, AnalysisError>;
}

/// Structured track report: a JSON document carrying a `media.track` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TrackReport(Value);

impl TrackReport {
    pub fn from_value(value: Value) -> Result<Self, AnalysisError> {
        match value.pointer("/media/track") {
            Some(Value::Array(_)) => Ok(Self(value)),
            Some(_) => Err(AnalysisError::Malformed(
                "media.track is not an array".to_string(),
            )),
            None => Err(AnalysisError::Malformed(
                "result has no media.track data".to_string(),
            )),
        }
    }

    pub fn tracks(&self) -> &[Value] {
        self.0
            .pointer("/media/track")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// First track whose `@type` equals `kind` (`General`, `Video`, `Audio`, ...).
    pub fn track(&self, kind: &str) -> Option<&Value> {
        self.tracks()
            .iter()
            .find(|track| track.get("@type").and_then(Value::as_str) == Some(kind))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

#[derive(Clone)]
pub struct AnalysisAdapter {
    factory: Arc<dyn EngineFactory>,
}

impl AnalysisAdapter {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self { factory }
    }

    pub async fn analyze(&self, buffer: &[u8]) -> Result<TrackReport, AnalysisError> {
        if buffer.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }

        info!("Starting media analysis of {} bytes", buffer.len());
        let mut engine = self.factory.init().await?;
        let source = BufferSource::new(buffer);
        let outcome = engine.analyze_data(&source).await;
        engine.close().await;

        let report = match outcome? {
            None => return Err(AnalysisError::NoResult),
            Some(EngineOutput::Structured(value)) => TrackReport::from_value(value)?,
            Some(EngineOutput::Text(text)) => parse_text_output(&text)?,
        };

        debug!("Analysis complete, {} track(s)", report.tracks().len());
        Ok(report)
    }
}

fn parse_text_output(text: &str) -> Result<TrackReport, AnalysisError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::NoResult);
    }
    let value: Value = serde_json::from_str(trimmed).map_err(|err| {
        warn!("MediaInfo output is not valid JSON: {}", err);
        AnalysisError::Malformed(format!("could not parse engine output: {err}"))
    })?;
    TrackReport::from_value(value)
}
