//! Conversion orchestration: run the pipeline, then publish both artifacts.
//!
//! [`ConversionService`] is what the HTTP handlers talk to. It owns the
//! bounded pool, the rasteriser and a handle to the artifact store, and it
//! guarantees the publish is atomic from the caller's point of view: either
//! both the preview and the PDF are stored and their ids returned, or neither
//! id is ever handed out.

use crate::config::{PipelineConfig, ServiceConfig};
use crate::error::ServiceError;
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::pipeline::{convert_document, ConversionRequest};
use crate::pool::ConversionPool;
use crate::progress::NoopProgressCallback;
use crate::store::{
    Artifact, ArtifactId, ArtifactStore, FsArtifactStore, MemoryArtifactStore, StoredArtifact,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const PNG_MIME: &str = "image/png";
pub const PDF_MIME: &str = "application/pdf";

/// Both published artifacts of one conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub conversion_id: Uuid,
    pub preview: Artifact,
    pub pdf: Artifact,
    pub page_count: usize,
}

/// Runs conversions and serves their artifacts.
pub struct ConversionService {
    config: Arc<ServiceConfig>,
    pool: ConversionPool,
    store: Arc<dyn ArtifactStore>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl ConversionService {
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn ArtifactStore>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        Self {
            pool: ConversionPool::from_config(&config),
            config: Arc::new(config),
            store,
            rasterizer,
        }
    }

    /// Build the production service: pdfium rasteriser, store per `storage_dir`.
    pub fn from_config(config: ServiceConfig) -> Result<Self, ServiceError> {
        let rasterizer = PdfiumRasterizer::bind(config.pdfium_lib_path.as_deref())?;
        let store = open_store(&config)?;
        Ok(Self::new(config, store, Arc::new(rasterizer)))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConversionPool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Convert `request` and publish its preview and PDF.
    pub async fn convert(
        &self,
        request: ConversionRequest,
    ) -> Result<ConversionOutcome, ServiceError> {
        let conversion_id = Uuid::new_v4();
        info!(
            conversion_id = %conversion_id,
            quality = %request.quality(),
            size = request.source().len(),
            "Conversion requested"
        );

        let preview_name = request.preview_filename();
        let pdf_name = request.pdf_filename();
        let pipeline: PipelineConfig = self.config.pipeline.clone();
        let rasterizer = Arc::clone(&self.rasterizer);

        let converted = self
            .pool
            .run(self.config.conversion_timeout, move |cancel| {
                convert_document(
                    &request,
                    &pipeline,
                    rasterizer.as_ref(),
                    cancel,
                    &NoopProgressCallback,
                )
            })
            .await
            .inspect_err(|e| log_failure(conversion_id, e))?;

        let preview = self
            .store
            .put(Bytes::from(converted.preview_png), PNG_MIME, Some(preview_name))
            .await
            .inspect_err(|e| log_failure(conversion_id, e))?;
        // Deletes the preview if this future is dropped before the PDF is stored.
        let rollback = Rollback::new(Arc::clone(&self.store), preview.id.clone(), conversion_id);

        let pdf = match self
            .store
            .put(Bytes::from(converted.output_pdf), PDF_MIME, Some(pdf_name))
            .await
        {
            Ok(pdf) => pdf,
            Err(e) => {
                log_failure(conversion_id, &e);
                rollback.run().await;
                return Err(e);
            }
        };
        rollback.disarm();

        info!(
            conversion_id = %conversion_id,
            pages = converted.page_count,
            preview = %preview.id,
            pdf = %pdf.id,
            "Conversion published"
        );
        Ok(ConversionOutcome {
            conversion_id,
            preview,
            pdf,
            page_count: converted.page_count,
        })
    }

    /// Look up an artifact by its URL path segment.
    ///
    /// Malformed ids are reported as `NotFound`, same as unknown ones.
    pub async fn fetch(&self, raw_id: &str) -> Result<StoredArtifact, ServiceError> {
        let id = ArtifactId::parse(raw_id).ok_or_else(|| ServiceError::NotFound {
            id: raw_id.to_string(),
        })?;
        self.store.get(&id).await
    }
}

/// Removes a published artifact unless disarmed.
///
/// Dropping an armed guard schedules the delete on the current runtime.
struct Rollback {
    store: Arc<dyn ArtifactStore>,
    id: Option<ArtifactId>,
    conversion_id: Uuid,
}

impl Rollback {
    fn new(store: Arc<dyn ArtifactStore>, id: ArtifactId, conversion_id: Uuid) -> Self {
        Self {
            store,
            id: Some(id),
            conversion_id,
        }
    }

    fn disarm(mut self) {
        self.id = None;
    }

    async fn run(mut self) {
        if let Some(id) = self.id.take() {
            delete_artifact(self.store.as_ref(), &id, self.conversion_id).await;
        }
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let conversion_id = self.conversion_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    delete_artifact(store.as_ref(), &id, conversion_id).await;
                });
            }
            Err(_) => warn!(
                conversion_id = %conversion_id,
                "No runtime to roll back {}; it stays until swept", id
            ),
        }
    }
}

async fn delete_artifact(store: &dyn ArtifactStore, id: &ArtifactId, conversion_id: Uuid) {
    match store.delete(id).await {
        Ok(_) => debug!(conversion_id = %conversion_id, "Rolled back {}", id),
        Err(e) => warn!(
            conversion_id = %conversion_id,
            "Failed to roll back {}: {}", id, e
        ),
    }
}

fn log_failure(conversion_id: Uuid, e: &ServiceError) {
    if e.is_client_error() {
        warn!(conversion_id = %conversion_id, code = e.code(), "Conversion rejected: {}", e);
    } else if e.is_retryable() {
        warn!(conversion_id = %conversion_id, code = e.code(), "Conversion deferred: {}", e);
    } else {
        error!(conversion_id = %conversion_id, code = e.code(), "Conversion failed: {}", e);
    }
}

/// The store `config` asks for: on disk under `storage_dir`, else in memory.
pub fn open_store(config: &ServiceConfig) -> Result<Arc<dyn ArtifactStore>, ServiceError> {
    Ok(match &config.storage_dir {
        Some(dir) => {
            info!("Artifact store: {}", dir.display());
            Arc::new(FsArtifactStore::open(dir, config.retention)?)
        }
        None => {
            info!("Artifact store: in memory");
            Arc::new(MemoryArtifactStore::new(config.retention))
        }
    })
}
