//! Error types for the ezread library.
//!
//! A single fatal taxonomy, [`ServiceError`], covers every way a request can
//! fail. The variants fall into three groups:
//!
//! * **Client-side** ([`ServiceError::InvalidInput`],
//!   [`ServiceError::InvalidQuality`], [`ServiceError::CorruptDocument`],
//!   [`ServiceError::UnsupportedDocument`]): retrying the same request will
//!   fail the same way.
//! * **Server-side** ([`ServiceError::ResourceExhausted`],
//!   [`ServiceError::Overloaded`], [`ServiceError::ConversionTimeout`]):
//!   worth retrying after a backoff.
//! * **Delivery-side** ([`ServiceError::NotFound`], [`ServiceError::Expired`]):
//!   the artifact is gone and will not come back.
//!
//! The HTTP layer maps each variant to a stable status code and error code
//! (see [`ServiceError::code`]); the `Display` text of internal variants is
//! logged but never sent to the caller.

use thiserror::Error;

/// All fatal errors returned by the ezread library.
#[derive(Debug, Error)]
pub enum ServiceError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// The upload is empty, missing, or does not start with a PDF header.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The upload exceeds the configured maximum size.
    #[error("Upload exceeds the {max} byte limit")]
    PayloadTooLarge { max: usize },

    /// The quality field is missing or not one of `high`, `medium`, `low`.
    #[error("Invalid quality {value:?}: expected one of high, medium, low")]
    InvalidQuality { value: Option<String> },

    // ── Document errors ───────────────────────────────────────────────────
    /// The PDF structure could not be parsed.
    #[error("PDF is corrupt: {detail}")]
    CorruptDocument { detail: String },

    /// The PDF parsed but cannot be converted (e.g. password protected).
    #[error("PDF is not supported: {reason}")]
    UnsupportedDocument { reason: String },

    /// The document exceeds a configured ceiling (page count, pixels).
    #[error("Document exceeds limits: {detail}")]
    ResourceExhausted { detail: String },

    // ── Capacity errors ───────────────────────────────────────────────────
    /// No conversion slot became free within the queue timeout, or the wait
    /// queue is full.
    #[error("Service overloaded: {detail}")]
    Overloaded { detail: String, retry_after_secs: u64 },

    /// The conversion did not finish within the conversion timeout.
    #[error("Conversion timed out after {secs}s")]
    ConversionTimeout { secs: u64 },

    /// The conversion was cancelled between pages.
    #[error("Conversion cancelled")]
    Cancelled,

    // ── Delivery errors ───────────────────────────────────────────────────
    /// No artifact with this id exists.
    #[error("Artifact '{id}' not found")]
    NotFound { id: String },

    /// The artifact exists but its retention window has elapsed.
    #[error("Artifact '{id}' has expired")]
    Expired { id: String },

    // ── Infrastructure errors ─────────────────────────────────────────────
    /// pdfium could not be bound or failed while rendering.
    #[error("Rasteriser error: {0}")]
    Rasterizer(String),

    /// The artifact store failed to read or write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput { .. } | ServiceError::PayloadTooLarge { .. } => {
                "invalid_input"
            }
            ServiceError::InvalidQuality { .. } => "invalid_quality",
            ServiceError::CorruptDocument { .. } => "corrupt_document",
            ServiceError::UnsupportedDocument { .. } => "unsupported_document",
            ServiceError::ResourceExhausted { .. } => "resource_exhausted",
            ServiceError::Overloaded { .. } => "overloaded",
            ServiceError::ConversionTimeout { .. } | ServiceError::Cancelled => "timeout",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::Expired { .. } => "expired",
            ServiceError::Rasterizer(_)
            | ServiceError::Storage(_)
            | ServiceError::InvalidConfig(_)
            | ServiceError::Internal(_) => "internal_error",
        }
    }

    /// Whether the same request may succeed if retried after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::ResourceExhausted { .. }
                | ServiceError::Overloaded { .. }
                | ServiceError::ConversionTimeout { .. }
                | ServiceError::Cancelled
        )
    }

    /// Whether the error was caused by the request rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::InvalidInput { .. }
                | ServiceError::PayloadTooLarge { .. }
                | ServiceError::InvalidQuality { .. }
                | ServiceError::CorruptDocument { .. }
                | ServiceError::UnsupportedDocument { .. }
                | ServiceError::NotFound { .. }
                | ServiceError::Expired { .. }
        )
    }

    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        ServiceError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(detail: impl Into<String>) -> Self {
        ServiceError::CorruptDocument {
            detail: detail.into(),
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Storage(e.to_string())
    }
}

/// Errors seen by [`crate::client::EzreadClient`] when talking to a server.
#[derive(Debug, Error)]
pub enum ClientError {
    // ── Transport ─────────────────────────────────────────────────────────
    /// The request could not be sent or the response not read.
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server URL or a returned artifact URL is not usable.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    // ── Server responses ──────────────────────────────────────────────────
    /// The server answered with a non-2xx status.
    ///
    /// `code` is the stable error code from the JSON body, or `http_<status>`
    /// when the body was not an ezread error.
    #[error("Server rejected the request ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// A 2xx response whose body was not what the endpoint promises.
    #[error("Unexpected response from {url}: {detail}")]
    UnexpectedResponse { url: String, detail: String },
}

impl ClientError {
    /// Whether the server signalled that retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Rejected { status, code, .. } => {
                *status == 503
                    || matches!(
                        code.as_str(),
                        "overloaded" | "timeout" | "resource_exhausted"
                    )
            }
            ClientError::Http { source, .. } => source.is_timeout() || source.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_too_large_display() {
        let e = ServiceError::PayloadTooLarge { max: 10 };
        let msg = e.to_string();
        assert!(msg.contains("10 byte"), "got: {msg}");
        assert_eq!(e.code(), "invalid_input");
    }

    #[test]
    fn invalid_quality_display_without_value() {
        let e = ServiceError::InvalidQuality { value: None };
        assert!(e.to_string().contains("high, medium, low"));
        assert_eq!(e.code(), "invalid_quality");
    }

    #[test]
    fn retryable_classification() {
        assert!(ServiceError::Overloaded {
            detail: "queue full".into(),
            retry_after_secs: 1
        }
        .is_retryable());
        assert!(ServiceError::ConversionTimeout { secs: 5 }.is_retryable());
        assert!(!ServiceError::corrupt("bad xref").is_retryable());
        assert!(!ServiceError::NotFound { id: "x".into() }.is_retryable());
    }

    #[test]
    fn client_errors_are_not_internal() {
        assert!(ServiceError::invalid_input("empty").is_client_error());
        assert!(ServiceError::Expired { id: "x".into() }.is_client_error());
        assert!(!ServiceError::Internal("boom".into()).is_client_error());
        assert_eq!(ServiceError::Storage("disk".into()).code(), "internal_error");
    }

    #[test]
    fn rejected_display_and_retry() {
        let e = ClientError::Rejected {
            status: 503,
            code: "overloaded".into(),
            message: "busy".into(),
            retry_after_secs: Some(30),
        };
        assert!(e.to_string().contains("503 overloaded"), "got: {e}");
        assert!(e.is_retryable());

        let e = ClientError::Rejected {
            status: 400,
            code: "invalid_quality".into(),
            message: "nope".into(),
            retry_after_secs: None,
        };
        assert!(!e.is_retryable());
    }
}
