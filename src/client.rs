//! HTTP client for a running ezread server.
//!
//! Mirrors what the web front-end does: post the PDF and a quality level as
//! `multipart/form-data`, read `{pdf_url, image_url}` back, then fetch both
//! artifacts. Returned URLs may be relative; they are resolved against the
//! server's base URL.

use crate::error::ClientError;
use crate::quality::Quality;
use crate::server::{ConvertResponse, ErrorResponse, HealthResponse};
use bytes::Bytes;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info};

/// Prefixes the server's temporary files may carry in their names.
const TEMP_PREFIXES: [&str; 2] = ["_download_temp_", "temp_"];

/// A downloaded artifact.
#[derive(Debug, Clone)]
pub struct DownloadedArtifact {
    pub url: Url,
    pub mime_type: Option<String>,
    /// Save-as name with temporary-file prefixes removed.
    pub filename: String,
    pub bytes: Bytes,
}

/// The full front-end flow: the conversion response plus both artifacts.
#[derive(Debug, Clone)]
pub struct ClientConversion {
    pub response: ConvertResponse,
    pub pdf: DownloadedArtifact,
    pub preview: DownloadedArtifact,
}

/// Talks to one ezread server.
#[derive(Debug, Clone)]
pub struct EzreadClient {
    http: reqwest::Client,
    base: Url,
}

impl EzreadClient {
    /// `base_url` is the server origin, optionally with a path prefix.
    /// `timeout` bounds each request, including the wait for a conversion.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl {
                url: base_url.to_string(),
                reason: "only http and https are supported".into(),
            });
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ezread/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Http {
                url: base.to_string(),
                source: e,
            })?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve a URL returned by the server.
    pub fn resolve(&self, url: &str) -> Result<Url, ClientError> {
        self.base.join(url).map_err(|e| ClientError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// GET /health
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let url = self.resolve("health")?;
        let response = self.send(self.http.get(url.clone()), &url).await?;
        json_body(&url, response).await
    }

    /// Upload `pdf` for conversion and return the artifact URLs.
    pub async fn convert(
        &self,
        pdf: Vec<u8>,
        filename: &str,
        quality: Quality,
    ) -> Result<ConvertResponse, ClientError> {
        let url = self.resolve("convert-pdf/")?;
        let size = pdf.len();
        let part = Part::bytes(pdf)
            .file_name(filename.to_string())
            .mime_str("application/pdf")
            .map_err(|e| ClientError::Http {
                url: url.to_string(),
                source: e,
            })?;
        let form = Form::new()
            .part("file", part)
            .text("quality", quality.as_str());

        debug!(%url, size, %quality, "Uploading PDF");
        let response = self
            .send(self.http.post(url.clone()).multipart(form), &url)
            .await?;
        let converted: ConvertResponse = json_body(&url, response).await?;
        if converted.pdf_url.is_empty() || converted.image_url.is_empty() {
            return Err(ClientError::UnexpectedResponse {
                url: url.to_string(),
                detail: "empty artifact URL".into(),
            });
        }
        info!(
            pages = converted.pages,
            pdf_url = %converted.pdf_url,
            image_url = %converted.image_url,
            "Conversion finished"
        );
        Ok(converted)
    }

    /// Fetch an artifact by the URL the server returned.
    ///
    /// `fallback_name` is used when neither `Content-Disposition` nor the
    /// URL yields a file name.
    pub async fn fetch(
        &self,
        artifact_url: &str,
        fallback_name: &str,
    ) -> Result<DownloadedArtifact, ClientError> {
        let url = self.resolve(artifact_url)?;
        let response = self.send(self.http.get(url.clone()), &url).await?;

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let mime_type = header(CONTENT_TYPE);
        let filename = header(CONTENT_DISPOSITION)
            .as_deref()
            .and_then(filename_from_disposition)
            .or_else(|| {
                url.path_segments()
                    .and_then(|mut s| s.next_back())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .map(|name| strip_temp_prefixes(&name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| fallback_name.to_string());

        let bytes = response.bytes().await.map_err(|e| ClientError::Http {
            url: url.to_string(),
            source: e,
        })?;
        debug!(%url, size = bytes.len(), %filename, "Fetched artifact");
        Ok(DownloadedArtifact {
            url,
            mime_type,
            filename,
            bytes,
        })
    }

    /// Upload, then download the PDF and the preview image.
    pub async fn convert_and_fetch(
        &self,
        pdf: Vec<u8>,
        filename: &str,
        quality: Quality,
    ) -> Result<ClientConversion, ClientError> {
        let response = self.convert(pdf, filename, quality).await?;
        let pdf = self.fetch(&response.pdf_url, "converted.pdf").await?;
        let preview = self.fetch(&response.image_url, "preview.png").await?;
        Ok(ClientConversion {
            response,
            pdf,
            preview,
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<reqwest::Response, ClientError> {
        let response = request.send().await.map_err(|e| ClientError::Http {
            url: url.to_string(),
            source: e,
        })?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(rejection(response).await)
    }
}

async fn json_body<T: serde::de::DeserializeOwned>(
    url: &Url,
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let body = response.bytes().await.map_err(|e| ClientError::Http {
        url: url.to_string(),
        source: e,
    })?;
    serde_json::from_slice(&body).map_err(|e| ClientError::UnexpectedResponse {
        url: url.to_string(),
        detail: e.to_string(),
    })
}

async fn rejection(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let retry_after_secs = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let body = response.bytes().await.unwrap_or_default();

    let (code, message) = match serde_json::from_slice::<ErrorResponse>(&body) {
        Ok(e) => (e.error, e.message),
        Err(_) => (
            format!("http_{}", status.as_u16()),
            String::from_utf8_lossy(&body).trim().to_string(),
        ),
    };
    ClientError::Rejected {
        status: status.as_u16(),
        code,
        message,
        retry_after_secs,
    }
}

/// Remove the first occurrence of each temporary-file prefix.
pub fn strip_temp_prefixes(name: &str) -> String {
    TEMP_PREFIXES
        .iter()
        .fold(name.to_string(), |acc, prefix| acc.replacen(prefix, "", 1))
}

/// The `filename=` parameter of a `Content-Disposition` value.
fn filename_from_disposition(value: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = val.trim().trim_matches('"');
        (!name.is_empty()).then(|| name.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_prefixes() {
        assert_eq!(
            strip_temp_prefixes("_download_temp_report_converted.pdf"),
            "report_converted.pdf"
        );
        assert_eq!(strip_temp_prefixes("temp_scan.pdf"), "scan.pdf");
        assert_eq!(strip_temp_prefixes("plain.pdf"), "plain.pdf");
    }

    #[test]
    fn parses_disposition_filename() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"a_converted.pdf\"").as_deref(),
            Some("a_converted.pdf")
        );
        assert_eq!(
            filename_from_disposition("inline; FILENAME=x.png").as_deref(),
            Some("x.png")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn resolves_relative_and_absolute_urls() {
        let client = EzreadClient::new("http://127.0.0.1:8000", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.resolve("/download/abc").unwrap().as_str(),
            "http://127.0.0.1:8000/download/abc"
        );
        assert_eq!(
            client.resolve("https://cdn.example/image/x").unwrap().as_str(),
            "https://cdn.example/image/x"
        );

        let prefixed = EzreadClient::new("http://h/api", Duration::from_secs(5)).unwrap();
        assert_eq!(
            prefixed.resolve("convert-pdf/").unwrap().as_str(),
            "http://h/api/convert-pdf/"
        );
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(matches!(
            EzreadClient::new("ftp://h/", Duration::from_secs(1)),
            Err(ClientError::InvalidUrl { .. })
        ));
    }
}
