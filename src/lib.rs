pub mod config;
pub mod engine;
pub mod fetch;
pub mod mapper;
pub mod photo;
pub mod progress;
pub mod render;
pub mod report;
pub mod template;

#[cfg(test)]
mod tests;

/// Pipeline stage a failure was observed in. Carried in error context so a
/// pre-flight rejection can be told apart from a post-render one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Map,
    Render,
    Submit,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validate => write!(f, "validate"),
            Self::Map => write!(f, "map"),
            Self::Render => write!(f, "render"),
            Self::Submit => write!(f, "submit"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{context}: {detail}")]
pub struct Error {
    pub context: Box<ErrorContext>,
    pub detail: Box<ErrorDetail>,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub report_id: String,
    pub stage: Stage,
}

impl ErrorContext {
    fn new(report_id: impl Into<String>) -> Self {
        Self {
            report_id: report_id.into(),
            stage: Stage::Validate,
        }
    }

    fn at(&self, stage: Stage) -> Self {
        Self {
            report_id: self.report_id.clone(),
            stage,
        }
    }

    fn error(&self, detail: ErrorDetail) -> Error {
        Error {
            context: Box::new(self.clone()),
            detail: Box::new(detail),
        }
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "report {} ({})", self.report_id, self.stage)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorDetail {
    #[error("another generation job is already running for this report")]
    AlreadyRunning,
    #[error("Template container rejected: {0}")]
    Container(render::docx::ContainerError),
    #[error("Failed to create remote document: {0}")]
    CreateDocument(Box<dyn std::error::Error + Send + Sync>),
    #[error("Remote batch {batch} rejected: {source}")]
    BatchRejected {
        batch: usize,
        document_id: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
