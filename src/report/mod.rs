//! Response shapes describing the analyzed file.

use serde::Serialize;
use url::Url;

use crate::fetch::FetchResult;

const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// `fileInfo` block of an analysis response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileInfo {
    #[serde(rename_all = "camelCase")]
    Url {
        url: String,
        filename: String,
        size: u64,
        size_formatted: String,
        downloaded_size: u64,
        is_partial: bool,
    },
    #[serde(rename_all = "camelCase")]
    Upload {
        filename: String,
        size: u64,
        size_formatted: String,
    },
}

impl FileInfo {
    /// `size` is the declared total when known, else the downloaded length.
    pub fn from_fetch(url: &Url, fetched: &FetchResult) -> Self {
        let size = fetched.reported_size();
        Self::Url {
            url: url.to_string(),
            filename: fetched.filename.clone(),
            size,
            size_formatted: format_bytes(size),
            downloaded_size: fetched.buffer.len() as u64,
            is_partial: fetched.is_partial,
        }
    }

    pub fn from_upload(filename: impl Into<String>, size: u64) -> Self {
        Self::Upload {
            filename: filename.into(),
            size,
            size_formatted: format_bytes(size),
        }
    }
}

/// Human readable size with at most two decimals: `1.5 MB`, `512 Bytes`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5_242_880), "5 MB");
        assert_eq!(format_bytes(50_000_000), "47.68 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 * 1024), "3072 GB");
    }

    #[test]
    fn test_url_file_info_shape() {
        let url = Url::parse("https://example.com/movie.mp4").unwrap();
        let fetched = FetchResult {
            buffer: vec![0; 1024],
            filename: "movie.mp4".to_string(),
            total_size_known: Some(50_000_000),
            is_partial: true,
        };

        let value = serde_json::to_value(FileInfo::from_fetch(&url, &fetched)).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "url",
                "url": "https://example.com/movie.mp4",
                "filename": "movie.mp4",
                "size": 50_000_000,
                "sizeFormatted": "47.68 MB",
                "downloadedSize": 1024,
                "isPartial": true
            })
        );
    }

    #[test]
    fn test_upload_file_info_shape() {
        let value = serde_json::to_value(FileInfo::from_upload("clip.mov", 2048)).unwrap();
        assert_eq!(
            value,
            json!({"type": "upload", "filename": "clip.mov", "size": 2048, "sizeFormatted": "2 KB"})
        );
    }
}
