//! Configuration types for the conversion service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. Pipeline knobs that influence the converted
//! bytes live in the nested [`PipelineConfig`] so they can be handed to the
//! blocking conversion task on their own.
//!
//! None of the limits below are dictated by the front-end; each has a
//! documented default and can be overridden from the CLI or environment.

use crate::error::ServiceError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Largest number of conversion workers picked automatically.
const MAX_AUTO_WORKERS: usize = 16;

/// Longest accepted artifact retention: one year.
pub const MAX_RETENTION: Duration = Duration::from_secs(366 * 24 * 3600);

/// Parameters that affect the converted output.
///
/// Two runs with equal `PipelineConfig`, equal input bytes and equal quality
/// produce byte-identical artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum number of pages a document may have. Default: 200.
    pub max_pages: usize,

    /// Maximum rendered image edge (width or height) in pixels. Default: 6000.
    ///
    /// A 900-DPI render of a letter page is 7650 × 9900 px; this caps the
    /// longest edge and scales the other proportionally so one page never
    /// allocates more than roughly `max_rendered_pixels²` pixels.
    pub max_rendered_pixels: u32,

    /// Apply the dark-mode recolouring. Default: true.
    pub dark_mode: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pages: 200,
            max_rendered_pixels: 6000,
            dark_mode: true,
        }
    }
}

/// Configuration for the HTTP conversion service.
///
/// Built via [`ServiceConfig::builder()`] or using [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use ezread::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .max_concurrent(4)
///     .retention(Duration::from_secs(600))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_queued, 16);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the server listens on. Default: `0.0.0.0:8000`.
    pub bind_addr: SocketAddr,

    /// Origin prepended to returned artifact URLs, e.g. `https://ezread.example`.
    /// When `None` the URLs are relative (`/download/<id>`). Default: None.
    pub public_base_url: Option<String>,

    /// Maximum accepted upload size in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// How long artifacts stay downloadable. Default: 1 hour.
    pub retention: Duration,

    /// How often the expiry sweep runs. Default: 5 minutes.
    pub sweep_interval: Duration,

    /// Number of conversions allowed to run at once. Default: CPU count, at most 16.
    pub max_concurrent: usize,

    /// Number of requests allowed to wait for a conversion slot. Default: 4 × `max_concurrent`.
    pub max_queued: usize,

    /// How long a request waits for a slot before failing `Overloaded`. Default: 30 s.
    pub queue_timeout: Duration,

    /// How long a caller waits for a running conversion. Default: 5 minutes.
    pub conversion_timeout: Duration,

    /// Persist artifacts under this directory instead of in memory. Default: None.
    pub storage_dir: Option<PathBuf>,

    /// Explicit path to the pdfium shared library. Default: None (search).
    pub pdfium_lib_path: Option<PathBuf>,

    /// Output-affecting parameters.
    pub pipeline: PipelineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let workers = default_workers();
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            public_base_url: None,
            max_upload_bytes: 50 * 1024 * 1024,
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
            max_concurrent: workers,
            max_queued: workers * 4,
            queue_timeout: Duration::from_secs(30),
            conversion_timeout: Duration::from_secs(300),
            storage_dir: None,
            pdfium_lib_path: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_AUTO_WORKERS)
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
            max_queued_set: false,
        }
    }

    /// Resolve an artifact path (`/image/<id>`) against `public_base_url`.
    pub fn artifact_url(&self, path: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}{}", base, path),
            None => path.to_string(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
    max_queued_set: bool,
}

impl ServiceConfigBuilder {
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.config.public_base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn retention(mut self, d: Duration) -> Self {
        self.config.retention = d;
        self
    }

    pub fn sweep_interval(mut self, d: Duration) -> Self {
        self.config.sweep_interval = d.max(Duration::from_millis(10));
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = n.max(1);
        self
    }

    pub fn max_queued(mut self, n: usize) -> Self {
        self.config.max_queued = n;
        self.max_queued_set = true;
        self
    }

    pub fn queue_timeout(mut self, d: Duration) -> Self {
        self.config.queue_timeout = d;
        self
    }

    pub fn conversion_timeout(mut self, d: Duration) -> Self {
        self.config.conversion_timeout = d;
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = Some(dir.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.pipeline.max_pages = n.max(1);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.pipeline.max_rendered_pixels = px.max(100);
        self
    }

    pub fn dark_mode(mut self, v: bool) -> Self {
        self.config.pipeline.dark_mode = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<ServiceConfig, ServiceError> {
        if !self.max_queued_set {
            self.config.max_queued = self.config.max_concurrent * 4;
        }
        let c = &self.config;
        if c.max_upload_bytes < 8 {
            return Err(ServiceError::InvalidConfig(format!(
                "max_upload_bytes must be at least 8, got {}",
                c.max_upload_bytes
            )));
        }
        if c.retention.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "retention must be greater than zero".into(),
            ));
        }
        if c.retention > MAX_RETENTION {
            return Err(ServiceError::InvalidConfig(format!(
                "retention must be at most {}s, got {}s",
                MAX_RETENTION.as_secs(),
                c.retention.as_secs()
            )));
        }
        if c.conversion_timeout.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "conversion_timeout must be greater than zero".into(),
            ));
        }
        if let Some(ref base) = c.public_base_url {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(ServiceError::InvalidConfig(format!(
                    "public_base_url must be an http(s) origin, got '{base}'"
                )));
            }
        }
        Ok(self.config)
    }
}
