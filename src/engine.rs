//! Job orchestration: one logically sequential generation job per request.
//!
//! All job state is request-scoped and dropped at completion. The only thing
//! shared between jobs is the advisory lock registry that rejects a second
//! concurrent job for the same report.

use std::{
    collections::HashSet,
    sync::{LazyLock, Mutex},
};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::{
    Error, ErrorContext, ErrorDetail, Stage,
    fetch::ImageFetcher,
    mapper::{self, ConditionsProvider, Enhancer, MapperOptions},
    photo::PhotoManifest,
    progress::ProgressSink,
    render::{
        cloud::{self, DocumentService, SubmitError},
        docx::{self, RenderOptions},
    },
    report::{RawReportData, ReportData, ReportImage},
    template::{PlaceholderSpec, Template},
};

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub report_id: String,
    pub template_id: String,
    pub ai_enhance: bool,
    pub include_photos_inline: bool,
}

#[derive(Debug)]
pub enum RenderedDocument {
    /// Sealed container bytes, ready to stream as an attachment.
    Docx(Vec<u8>),
    /// Id of the document assembled in the cloud service.
    Remote { document_id: String },
}

/// Structured failure object, only usable before any byte has streamed.
#[derive(Debug, Serialize)]
pub struct FailureBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&Error> for FailureBody {
    fn from(error: &Error) -> Self {
        Self {
            error: error.detail.to_string(),
            details: Some(error.context.to_string()),
        }
    }
}

/// Advisory per-report lock. Entries live exactly as long as their job; a
/// second job for the same report id is rejected, not queued.
#[derive(Debug, Default)]
pub struct JobRegistry {
    active: Mutex<HashSet<String>>,
}

pub struct JobGuard<'a> {
    registry: &'a JobRegistry,
    report_id: String,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self, report_id: &str) -> Option<JobGuard<'_>> {
        let mut active = self.active.lock().unwrap();
        if !active.insert(report_id.to_owned()) {
            return None;
        }
        Some(JobGuard {
            registry: self,
            report_id: report_id.to_owned(),
        })
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap()
            .remove(&self.report_id);
    }
}

static NON_ALNUM: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[^A-Za-z0-9]+").unwrap());

/// Attachment filename: report title with non-alphanumerics stripped, plus
/// the render date.
pub fn attachment_filename(title: &str, date: NaiveDate) -> String {
    let stem = NON_ALNUM.replace_all(title, "");
    let stem = if stem.is_empty() { "Report" } else { &stem };
    format!("{stem}_{}.docx", date.format("%Y-%m-%d"))
}

pub struct Engine<F, E, C> {
    fetcher: F,
    enhancer: E,
    conditions: C,
    registry: JobRegistry,
}

struct MappedJob {
    data: ReportData,
    placeholders: indexmap::IndexMap<String, String>,
    photos: PhotoManifest,
}

impl<F, E, C> Engine<F, E, C>
where
    F: ImageFetcher,
    E: Enhancer,
    C: ConditionsProvider,
{
    pub fn new(fetcher: F, enhancer: E, conditions: C) -> Self {
        Self {
            fetcher,
            enhancer,
            conditions,
            registry: JobRegistry::new(),
        }
    }

    /// Mapping prelude shared by both backends: reconcile, resolve, number
    /// photographs. Infallible by contract; defaults absorb missing data.
    async fn map_job<P: ProgressSink>(
        &self,
        request: &GenerationRequest,
        report: RawReportData,
        images: &[ReportImage],
        spec: &PlaceholderSpec,
        progress: &P,
    ) -> MappedJob {
        progress.emit(2, "Validating report data");
        let data = ReportData::reconcile(report);
        let options = MapperOptions {
            ai_enhance: request.ai_enhance,
            today: chrono::Local::now().date_naive(),
        };
        let mut placeholders = mapper::resolve_placeholders(
            spec,
            &data,
            &options,
            &self.enhancer,
            &self.conditions,
            progress,
        )
        .await;
        let photos = PhotoManifest::resolve(images);
        photos.annotate(&mut placeholders);
        MappedJob {
            data,
            placeholders,
            photos,
        }
    }

    /// Render into a binary container. Fatal only on template/container
    /// integrity failures; everything else degrades in place.
    pub async fn generate_docx<P: ProgressSink>(
        &self,
        request: &GenerationRequest,
        report: RawReportData,
        images: &[ReportImage],
        template_bytes: &[u8],
        spec: &PlaceholderSpec,
        progress: &P,
    ) -> Result<RenderedDocument, Error> {
        let context = ErrorContext::new(&request.report_id);
        let Some(_guard) = self.registry.begin(&request.report_id) else {
            let error = context.error(ErrorDetail::AlreadyRunning);
            progress.complete(100, "Generation failed: job already running");
            return Err(error);
        };

        let result = async {
            // Pre-flight the container before the mapper can reach out to
            // any external service.
            let template = docx::load_template(template_bytes)
                .map_err(|e| context.error(ErrorDetail::Container(e)))?;
            let job = self
                .map_job(request, report, images, spec, progress)
                .await;
            let bytes = docx::render(
                template,
                &job.placeholders,
                images,
                &RenderOptions {
                    include_photos_inline: request.include_photos_inline,
                },
                &self.fetcher,
                progress,
            )
            .await
            .map_err(|e| context.at(Stage::Render).error(ErrorDetail::Container(e)))?;
            info!(
                report_id = %request.report_id,
                template_id = %request.template_id,
                size = bytes.len(),
                photos = job.photos.total(),
                "rendered container document"
            );
            Ok(RenderedDocument::Docx(bytes))
        }
        .await;

        match &result {
            Ok(_) => progress.complete(100, "Document ready"),
            Err(error) => progress.complete(100, &format!("Generation failed: {error}")),
        }
        result
    }

    /// Assemble the document in the cloud service instead. Batch rejection
    /// is fatal for the job; partially-applied remote edits stay in place.
    pub async fn generate_cloud<S, P>(
        &self,
        service: &S,
        request: &GenerationRequest,
        report: RawReportData,
        images: &[ReportImage],
        template: &Template,
        spec: &PlaceholderSpec,
        progress: &P,
    ) -> Result<RenderedDocument, Error>
    where
        S: DocumentService,
        P: ProgressSink,
    {
        let context = ErrorContext::new(&request.report_id);
        let Some(_guard) = self.registry.begin(&request.report_id) else {
            let error = context.error(ErrorDetail::AlreadyRunning);
            progress.complete(100, "Generation failed: job already running");
            return Err(error);
        };

        let result = async {
            let job = self
                .map_job(request, report, images, spec, progress)
                .await;
            let title = job
                .data
                .project
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Inspection Report".to_owned());
            let batcher = cloud::build_ops(template, &job.placeholders, &job.photos);
            let document_id = cloud::submit(service, &title, batcher, progress)
                .await
                .map_err(|error| match error {
                    SubmitError::Create(source) => context
                        .at(Stage::Submit)
                        .error(ErrorDetail::CreateDocument(Box::new(source))),
                    other => {
                        let batch = match &other {
                            SubmitError::Batch { index, .. }
                            | SubmitError::ShortAck { index, .. } => *index,
                            SubmitError::Create(_) => 0,
                        };
                        let document_id =
                            other.document_id().unwrap_or_default().to_owned();
                        context.at(Stage::Submit).error(ErrorDetail::BatchRejected {
                            batch,
                            document_id,
                            source: Box::new(other),
                        })
                    }
                })?;
            info!(
                report_id = %request.report_id,
                document_id = %document_id,
                "assembled remote document"
            );
            Ok(RenderedDocument::Remote { document_id })
        }
        .await;

        match &result {
            Ok(_) => progress.complete(100, "Document ready"),
            Err(error) => progress.complete(100, &format!("Generation failed: {error}")),
        }
        result
    }
}
