//! HTTP origin for original images.

use std::time::Duration;

use cache_core::{ImageSource, PortFuture, SourceError, SourceImage};

pub const DEFAULT_ORIGIN_BASE_URL: &str = "https://image.tmdb.org/t/p/original";

/// Fetches originals over HTTP.
///
/// Relative paths such as `/pB8BM7pdSp6B6Ih7QZ4DrQ3PmJK.jpg` are joined onto
/// the base URL; absolute http(s) URLs are fetched as-is.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpImageSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("image-cache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn resolve_url(&self, source_url: &str) -> Result<String, SourceError> {
        let url = source_url.trim();
        if url.is_empty() {
            return Err(SourceError::InvalidUrl("empty source url".into()));
        }

        let lower = url.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(url.to_string());
        }
        if url.contains("://") {
            return Err(SourceError::InvalidUrl(format!("unsupported scheme: {url}")));
        }

        Ok(format!("{}/{}", self.base_url, url.trim_start_matches('/')))
    }

    pub async fn fetch_image(&self, source_url: &str) -> Result<SourceImage, SourceError> {
        let url = self.resolve_url(source_url)?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        Ok(SourceImage {
            source_url: source_url.to_string(),
            bytes,
            content_type,
        })
    }
}

impl ImageSource for HttpImageSource {
    fn fetch<'a>(&'a self, source_url: &'a str) -> PortFuture<'a, Result<SourceImage, SourceError>> {
        Box::pin(self.fetch_image(source_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> HttpImageSource {
        HttpImageSource::new("https://image.example.org/t/p/original/", Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn joins_relative_paths_onto_base() {
        let source = source();
        assert_eq!(
            source.resolve_url("/abc.jpg").unwrap(),
            "https://image.example.org/t/p/original/abc.jpg"
        );
        assert_eq!(
            source.resolve_url("abc.jpg").unwrap(),
            "https://image.example.org/t/p/original/abc.jpg"
        );
    }

    #[test]
    fn keeps_absolute_urls() {
        assert_eq!(
            source().resolve_url("https://o/img.jpg").unwrap(),
            "https://o/img.jpg"
        );
    }

    #[test]
    fn rejects_unusable_urls() {
        assert!(matches!(
            source().resolve_url("  "),
            Err(SourceError::InvalidUrl(_))
        ));
        assert!(matches!(
            source().resolve_url("ftp://o/img.jpg"),
            Err(SourceError::InvalidUrl(_))
        ));
    }
}
