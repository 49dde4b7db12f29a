//! # ezread
//!
//! Dark-mode PDF conversion: upload a PDF, get back a recoloured preview of
//! the first page and a recoloured copy of the whole document.
//!
//! ## Why rasterise?
//!
//! Recolouring a PDF's drawing operators is fragile: images, shadings,
//! transparency groups and form XObjects each need their own treatment, and
//! scanned documents have no vector content at all. Instead every page is
//! rendered with pdfium, pure white becomes dark grey and pure black becomes
//! white, and the pixels are packed back into a PDF at the original page
//! sizes. The output is larger and no longer searchable, but it always looks
//! right.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     validate upload, quality and PDF header
//!  ├─ 2. Inspect   page tree, encryption, limits (lopdf)
//!  ├─ 3. Render    rasterise one page at a time (pdfium, spawn_blocking)
//!  ├─ 4. Recolor   white → (40,40,40), black → white
//!  ├─ 5. Encode    page 1 → PNG preview, every page → JPEG
//!  └─ 6. Assemble  JPEGs → new PDF at the source page sizes (lopdf)
//! ```
//!
//! Both outputs are published to an [`ArtifactStore`] under unguessable ids
//! and served until their retention window elapses.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ezread::{ConversionService, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().max_concurrent(2).build()?;
//!     let service = ConversionService::from_config(config)?;
//!     ezread::server::serve(service).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Quality Levels
//!
//! | Quality | DPI | JPEG quality | PNG compression |
//! |---------|-----|--------------|-----------------|
//! | `low`    | 300 | 60 | best |
//! | `medium` | 600 | 80 | best |
//! | `high`   | 900 | 92 | default |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ezread` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the service as a library:
//! ```toml
//! ezread = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod quality;
pub mod server;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{ClientConversion, DownloadedArtifact, EzreadClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PipelineConfig, ServiceConfig, ServiceConfigBuilder};
pub use error::{ClientError, ServiceError};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use pipeline::{convert_document, CancelFlag, ConversionRequest, ConvertedDocument};
pub use pool::ConversionPool;
pub use progress::{ConversionProgressCallback, NoopProgressCallback};
pub use quality::{Quality, QualityProfile};
pub use server::{AppState, ConvertResponse, ErrorResponse, HealthResponse};
pub use service::{ConversionOutcome, ConversionService};
pub use store::{
    spawn_sweeper, Artifact, ArtifactId, ArtifactStore, FsArtifactStore, MemoryArtifactStore,
    StoredArtifact,
};
