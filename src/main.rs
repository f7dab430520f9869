use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::Parser;
use scriba::{
    config::Backend,
    engine::{Engine, GenerationRequest, RenderedDocument, attachment_filename},
    fetch::SchemeFetcher,
    mapper::{conditions, enhance},
    render::cloud,
    report::{RawReportData, ReportImage},
    template::{PlaceholderSpec, Template},
};
use tracing::{error, info};

#[derive(Parser)]
struct Opts {
    #[clap(short, long, env = "SCRIBA_CONFIG")]
    config: PathBuf,
    /// Report data (JSON).
    #[clap(long)]
    report: PathBuf,
    /// Report photographs (JSON list). Omit for a report without photos.
    #[clap(long)]
    images: Option<PathBuf>,
    /// Placeholder declarations (YAML).
    #[clap(long)]
    spec: PathBuf,
    /// Logical document template (YAML); required for the cloud backend.
    #[clap(long)]
    template_doc: Option<PathBuf>,
    /// Output path; defaults to the attachment filename in the working dir.
    #[clap(short, long)]
    out: Option<PathBuf>,
    #[clap(long, default_value = "local")]
    report_id: String,
    #[clap(long)]
    ai_enhance: bool,
    /// Skip embedding photographs into the container.
    #[clap(long)]
    no_inline_photos: bool,
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let config = tokio::fs::read_to_string(&opts.config)
        .await
        .with_context(|| "read config")?;
    let config: scriba::config::Config = serde_yaml::from_str(&config)
        .with_context(|| format!("parse config from {}", opts.config.display()))?;
    config.validate().map_err(|msg| anyhow!("{msg}"))?;

    let report = tokio::fs::read_to_string(&opts.report)
        .await
        .with_context(|| "read report data")?;
    let report: RawReportData =
        serde_json::from_str(&report).with_context(|| "parse report data")?;
    let images: Vec<ReportImage> = match &opts.images {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| "read image list")?;
            serde_json::from_str(&raw).with_context(|| "parse image list")?
        }
        None => Vec::new(),
    };
    let spec = tokio::fs::read_to_string(&opts.spec)
        .await
        .with_context(|| "read placeholder spec")?;
    let spec: PlaceholderSpec =
        serde_yaml::from_str(&spec).with_context(|| "parse placeholder spec")?;

    let title = report
        .project
        .title
        .clone()
        .unwrap_or_else(|| "Inspection Report".to_owned());
    let request = GenerationRequest {
        report_id: opts.report_id.clone(),
        template_id: match &config.backend {
            Backend::Docx { template } => template.display().to_string(),
            Backend::Cloud { endpoint, .. } => endpoint.to_string(),
        },
        ai_enhance: opts.ai_enhance,
        include_photos_inline: !opts.no_inline_photos,
    };

    let enhancer = config
        .enhancer
        .as_ref()
        .map(|c| enhance::Client::new(c.endpoint.clone(), c.token.clone(), config.enhance_timeout()));
    let conditions = config
        .weather
        .as_ref()
        .map(|c| conditions::Client::new(c.endpoint.clone(), config.weather_timeout()));
    let fetcher = SchemeFetcher::new(config.image_timeout());
    let engine = Engine::new(fetcher, enhancer, conditions);
    let progress = scriba::progress::create_sink();

    let rendered = match &config.backend {
        Backend::Docx { template } => {
            let template_bytes = tokio::fs::read(template)
                .await
                .with_context(|| format!("read template container {}", template.display()))?;
            engine
                .generate_docx(&request, report, &images, &template_bytes, &spec, &progress)
                .await?
        }
        Backend::Cloud { endpoint, token } => {
            let path = opts
                .template_doc
                .as_ref()
                .ok_or_else(|| anyhow!("cloud backend requires --template-doc"))?;
            let template = tokio::fs::read_to_string(path)
                .await
                .with_context(|| "read document template")?;
            let template: Template =
                serde_yaml::from_str(&template).with_context(|| "parse document template")?;
            let service = cloud::client::Client::new(
                endpoint.clone(),
                token.clone(),
                config.service_timeout(),
            );
            engine
                .generate_cloud(&service, &request, report, &images, &template, &spec, &progress)
                .await?
        }
    };

    match rendered {
        RenderedDocument::Docx(bytes) => {
            let path = opts.out.unwrap_or_else(|| {
                attachment_filename(&title, chrono::Local::now().date_naive()).into()
            });
            tokio::fs::write(&path, &bytes)
                .await
                .with_context(|| format!("write document to {}", path.display()))?;
            info!(path = %path.display(), size = bytes.len(), "wrote document");
        }
        RenderedDocument::Remote { document_id } => {
            info!(document_id = %document_id, "remote document assembled");
            println!("{document_id}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run(opts).await {
        error!(?e, "generation failed");
        std::process::exit(1);
    }
}
