//! Process-scoped wiring: one job store, one dispatcher, one worker pool.
//!
//! ```rust,no_run
//! use docconv::{ConversionRequest, ConversionService, PipelineConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ConversionService::builder(PipelineConfig::from_env()?).start();
//! let bytes = std::fs::read("deck.pptx")?;
//! let id = service
//!     .submit(ConversionRequest::new(bytes, "deck.pptx", "ppt_to_pdf"))
//!     .await?;
//! let job = service.wait_for_terminal(&id, Duration::from_millis(250)).await?;
//! println!("{:?}", job.status);
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::ai::BackendRegistry;
use crate::automation::{AutomationEngine, AutomationManager, SofficeEngine};
use crate::config::PipelineConfig;
use crate::dispatch::{ConversionRequest, Dispatcher};
use crate::error::{ConvertError, JobStoreError};
use crate::executor::ConversionExecutor;
use crate::extract::{Extractor, OcrEngine, PdfBackend, PdfiumBackend, TesseractOcr};
use crate::job::{Job, JobId, JobStatusView, JobStore};
use crate::worker::WorkerPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Builder for [`ConversionService`]. Every external collaborator can be
/// replaced; unset ones use the real engines configured in [`PipelineConfig`].
pub struct ConversionServiceBuilder {
    config: PipelineConfig,
    pdf: Option<Arc<dyn PdfBackend>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    automation: Option<Arc<dyn AutomationEngine>>,
    registry: Option<BackendRegistry>,
}

impl ConversionServiceBuilder {
    pub fn pdf_backend(mut self, pdf: Arc<dyn PdfBackend>) -> Self {
        self.pdf = Some(pdf);
        self
    }

    pub fn ocr_engine(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn automation_engine(mut self, engine: Arc<dyn AutomationEngine>) -> Self {
        self.automation = Some(engine);
        self
    }

    pub fn backend_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Spawn the worker pool on the current Tokio runtime.
    pub fn start(self) -> ConversionService {
        let config = Arc::new(self.config);

        let pdf = self
            .pdf
            .unwrap_or_else(|| Arc::new(PdfiumBackend::new(config.pdfium_library_path.clone())));
        let ocr = self.ocr.unwrap_or_else(|| {
            Arc::new(TesseractOcr::new(
                config.tesseract_path.clone(),
                config.ocr_languages.clone(),
                Duration::from_secs(config.ocr_timeout_secs),
            ))
        });
        let engine = self.automation.unwrap_or_else(|| {
            Arc::new(SofficeEngine::new(
                config.soffice_path.clone(),
                Duration::from_secs(config.automation_timeout_secs),
            ))
        });
        let registry = self.registry.unwrap_or_default();

        let automation = AutomationManager::new(engine);
        let extractor = Extractor::new(pdf, ocr, automation.clone(), &config);
        let store = Arc::new(JobStore::new());
        let executor = Arc::new(ConversionExecutor::new(
            store.clone(),
            extractor,
            automation,
            registry,
            config.clone(),
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::spawn(config.workers, rx, executor);
        let dispatcher = Dispatcher::new(store.clone(), config.clone(), tx);
        info!("{:?}", config);

        ConversionService {
            store,
            dispatcher,
            pool,
            config,
        }
    }
}

/// The running pipeline.
pub struct ConversionService {
    store: Arc<JobStore>,
    dispatcher: Dispatcher,
    pool: WorkerPool,
    config: Arc<PipelineConfig>,
}

impl ConversionService {
    pub fn builder(config: PipelineConfig) -> ConversionServiceBuilder {
        ConversionServiceBuilder {
            config,
            pdf: None,
            ocr: None,
            automation: None,
            registry: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<JobStore> {
        self.store.clone()
    }

    /// A cloneable submission handle for request handlers.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub async fn submit(&self, request: ConversionRequest) -> Result<JobId, ConvertError> {
        self.dispatcher.submit(request).await
    }

    pub fn get(&self, id: &JobId) -> Result<Job, JobStoreError> {
        self.store.get(id)
    }

    /// The status payload for polling clients.
    pub fn status(&self, id: &JobId) -> Result<JobStatusView, JobStoreError> {
        self.store.get(id).map(|job| JobStatusView::from(&job))
    }

    /// Poll until the job is terminal.
    pub async fn wait_for_terminal(&self, id: &JobId, poll: Duration) -> Result<Job, JobStoreError> {
        loop {
            let job = self.store.get(id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Stop accepting work, let workers finish what is queued, and wait.
    ///
    /// Dispatcher clones handed out via [`Self::dispatcher`] keep the queue
    /// open until they are dropped too.
    pub async fn shutdown(self) {
        let ConversionService {
            dispatcher, pool, ..
        } = self;
        drop(dispatcher);
        pool.join().await;
        info!("Conversion service stopped");
    }
}

impl std::fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionService")
            .field("jobs", &self.store.len())
            .field("pool", &self.pool)
            .finish()
    }
}
