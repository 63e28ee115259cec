//! `/analyze` routes.
//!
//! POST bodies are dispatched on their shape: multipart uploads are analyzed
//! directly, JSON bodies are routed on the optional `action` field.

use crate::admission;
use crate::api::error::{success, ApiError, ApiResult};
use crate::api::AppState;
use crate::fetch::FetchRequest;
use crate::report::FileInfo;
use crate::thumbnails::sampler::{self, SampleMode};
use crate::thumbnails::{FrameSource, ThumbnailRequest};
use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Create the analyze router.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/analyze",
        get(health)
            .post(analyze)
            .options(preflight)
            .fallback(method_not_allowed),
    )
}

/// GET /analyze - Health check.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "MediaInfo API is running",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// OPTIONS /analyze - Bare preflight; CORS headers come from the layer.
async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

/// POST /analyze - Analyze a file or run a thumbnail action.
async fn analyze(State(state): State<AppState>, request: Request) -> ApiResult<Json<Value>> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|err| ApiError::bad_request(err.body_text()))?;
        return analyze_upload(&state, multipart).await;
    }

    let body = axum::body::to_bytes(request.into_body(), state.limits.max_body_bytes)
        .await
        .map_err(|err| {
            ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").with_message(err.to_string())
        })?;
    let payload = parse_json_body(&body)?;

    match payload.get("action") {
        None | Some(Value::Null) => analyze_url(&state, &payload).await,
        Some(Value::String(action)) => match action.as_str() {
            "generateThumbnails" => generate_thumbnails(&state, payload).await,
            "compareThumbnails" => compare_thumbnails(&state, payload).await,
            other => Err(ApiError::bad_request(format!("Unknown action '{other}'"))),
        },
        Some(_) => Err(ApiError::bad_request("action must be a string")),
    }
}

fn parse_json_body(body: &Bytes) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::bad_request("Empty request body"));
    }

    let payload: Value = serde_json::from_slice(body).map_err(|err| {
        ApiError::bad_request("Invalid JSON in request body").with_details(err.to_string())
    })?;

    if !payload.is_object() {
        return Err(ApiError::bad_request("Request body must be a JSON object"));
    }
    Ok(payload)
}

fn required_string<'a>(payload: &'a Value, field: &str, error: &str) -> ApiResult<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request(error))
}

async fn analyze_url(state: &AppState, payload: &Value) -> ApiResult<Json<Value>> {
    let raw_url = required_string(payload, "url", "URL is required")?;
    let url = admission::admit_url(raw_url)?;
    info!("Analyzing {}", url);

    let request = FetchRequest::new(url.clone(), state.limits.byte_ceiling, state.limits.fetch_timeout)?;
    let fetched = state.fetcher.fetch(&request).await?;
    let report = state.analyzer.analyze(&fetched.buffer).await?;

    Ok(success(json!({
        "fileInfo": FileInfo::from_fetch(&url, &fetched),
        "data": report,
    })))
}

async fn analyze_upload(state: &AppState, mut multipart: Multipart) -> ApiResult<Json<Value>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(err.body_text()))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            debug!("Skipping non-file multipart field {:?}", field.name());
            continue;
        };

        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(err.body_text()))?;
        info!("Analyzing upload {} ({} bytes)", filename, data.len());

        let report = state.analyzer.analyze(&data).await?;
        return Ok(success(json!({
            "fileInfo": FileInfo::from_upload(filename, data.len() as u64),
            "data": report,
        })));
    }

    Err(ApiError::bad_request("No file uploaded"))
}

/// Numbers arrive as JSON numbers or numeric strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ThumbnailPayload {
    url: Option<String>,
    file_buffer: Option<String>,
    url_a: Option<String>,
    url_b: Option<String>,
    count: Option<Numeric>,
    mode: Option<String>,
    custom_timestamps: Option<Vec<Numeric>>,
}

impl ThumbnailPayload {
    fn parse(payload: Value) -> ApiResult<Self> {
        serde_json::from_value(payload)
            .map_err(|err| ApiError::bad_request("Invalid thumbnail request").with_details(err.to_string()))
    }

    fn request(&self, state: &AppState) -> ApiResult<ThumbnailRequest> {
        let limits = &state.limits;
        let count = match self.count.as_ref().and_then(Numeric::as_f64) {
            Some(value) if value.is_finite() => sampler::clamp_count(Some(value.trunc() as i64)),
            _ => sampler::clamp_count(Some(limits.default_count as i64)),
        }
        .min(limits.max_count.max(1));

        let mode = match self.mode.as_deref() {
            None => SampleMode::default(),
            Some(mode) => mode
                .parse::<SampleMode>()
                .map_err(|err| ApiError::bad_request(err.to_string()))?,
        };

        let timestamps: Vec<f64> = self
            .custom_timestamps
            .iter()
            .flatten()
            .filter_map(Numeric::as_f64)
            .collect();
        if mode == SampleMode::Explicit && timestamps.is_empty() {
            return Err(ApiError::bad_request(
                "customTimestamps is required for custom mode",
            ));
        }

        Ok(ThumbnailRequest {
            count,
            mode,
            timestamps,
        })
    }
}

fn url_source(raw: &str) -> ApiResult<FrameSource> {
    Ok(FrameSource::Url(admission::admit_url(raw)?))
}

async fn generate_thumbnails(state: &AppState, payload: Value) -> ApiResult<Json<Value>> {
    let payload = ThumbnailPayload::parse(payload)?;
    let request = payload.request(state)?;

    let source = match (payload.url.as_deref().map(str::trim), payload.file_buffer.as_deref()) {
        (Some(url), _) if !url.is_empty() => url_source(url)?,
        (_, Some(encoded)) => {
            let data = BASE64
                .decode(encoded.trim())
                .map_err(|err| ApiError::bad_request("fileBuffer must be base64").with_details(err.to_string()))?;
            FrameSource::Buffer(data)
        }
        _ => return Err(ApiError::bad_request("URL or file buffer is required")),
    };

    let thumbnails = state.thumbnails.generate(source, &request).await?;
    Ok(success(json!({
        "count": thumbnails.len(),
        "thumbnails": thumbnails,
    })))
}

async fn compare_thumbnails(state: &AppState, payload: Value) -> ApiResult<Json<Value>> {
    let payload = ThumbnailPayload::parse(payload)?;
    let request = payload.request(state)?;

    let (Some(url_a), Some(url_b)) = (payload.url_a.as_deref(), payload.url_b.as_deref()) else {
        return Err(ApiError::bad_request("urlA and urlB are required"));
    };
    let source_a = url_source(url_a)?;
    let source_b = url_source(url_b)?;

    let pairs = state.thumbnails.compare(source_a, source_b, &request).await?;
    Ok(success(json!({
        "count": pairs.len(),
        "pairs": pairs,
    })))
}
