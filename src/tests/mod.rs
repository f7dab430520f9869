use std::{
    collections::HashMap,
    io::{Cursor, Read, Write},
    sync::Arc,
};

use bytes::Bytes;
use indexmap::IndexMap;
use zip::write::SimpleFileOptions;

use crate::{
    ErrorDetail,
    engine::{Engine, GenerationRequest, RenderedDocument},
    fetch::{FetchError, ImageFetcher},
    mapper::{conditions::Unavailable, enhance::Disabled},
    photo::PhotoManifest,
    progress::{ChannelSink, NullSink},
    render::{
        cloud::{EditOp, local::LocalService},
        docx::{
            self, ARCHIVE_MAGIC, CONTENT_TYPES_PART, DOCUMENT_PART, DOCUMENT_RELS_PART,
            RenderOptions,
        },
    },
    report::{PhotoCategory, RawReportData, ReportImage},
    template::{PlaceholderSpec, Template},
};

struct MemoryFetcher {
    objects: HashMap<String, Bytes>,
}

impl ImageFetcher for MemoryFetcher {
    async fn fetch(&self, url: &url::Url) -> Result<Bytes, FetchError> {
        self.objects
            .get(url.as_str())
            .cloned()
            .ok_or(FetchError::Status(reqwest::StatusCode::NOT_FOUND))
    }
}

fn test_png(width: u32, height: u32) -> Bytes {
    let pixels = image::RgbaImage::from_pixel(width, height, image::Rgba([180, 40, 40, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(pixels)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    Bytes::from(bytes)
}

const CONTENT_TYPES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
    r#"</Types>"#,
);

/// One paragraph per entry, each inside its own text run.
fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|text| format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#))
        .collect();
    let document = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
            "<w:body>{body}</w:body></w:document>",
        ),
        body = body
    );

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, content) in [
        (CONTENT_TYPES_PART, CONTENT_TYPES_XML.to_owned()),
        (DOCUMENT_PART, document),
        (
            DOCUMENT_RELS_PART,
            docx::markup::RELS_SKELETON.to_owned(),
        ),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn part_text(archive_bytes: &[u8], part: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes)).unwrap();
    let mut file = archive.by_name(part).unwrap();
    let mut text = String::new();
    file.read_to_string(&mut text).unwrap();
    text
}

fn fixture_report() -> RawReportData {
    serde_json::from_str(include_str!("scenario1/report.json")).unwrap()
}

fn fixture_spec() -> PlaceholderSpec {
    serde_yaml::from_str(include_str!("scenario1/placeholders.yaml")).unwrap()
}

fn fixture_template() -> Template {
    serde_yaml::from_str(include_str!("scenario1/template.yaml")).unwrap()
}

fn request() -> GenerationRequest {
    GenerationRequest {
        report_id: "report-1".into(),
        template_id: "inspection-standard".into(),
        ai_enhance: false,
        include_photos_inline: true,
    }
}

fn scenario_images() -> Vec<ReportImage> {
    vec![
        ReportImage {
            filename: "front.png".into(),
            size_bytes: 2048,
            mime_type: "image/png".into(),
            storage_url: "https://storage.example.com/front.png".parse().unwrap(),
            description: Some("Front elevation".into()),
            category: Some(PhotoCategory::Building),
            upload_order: 1,
        },
        // Unreachable object; the renderer must fall back to the
        // transparent placeholder instead of failing the job.
        ReportImage {
            filename: "west-siding.png".into(),
            size_bytes: 2048,
            mime_type: "image/png".into(),
            storage_url: "https://storage.example.com/missing.png".parse().unwrap(),
            description: None,
            category: Some(PhotoCategory::Exterior),
            upload_order: 2,
        },
    ]
}

fn scenario_fetcher() -> MemoryFetcher {
    MemoryFetcher {
        objects: HashMap::from([(
            "https://storage.example.com/front.png".to_owned(),
            test_png(800, 600),
        )]),
    }
}

#[tokio::test]
async fn docx_generation_end_to_end() {
    let engine = Engine::new(scenario_fetcher(), Disabled, Unavailable);
    let template = minimal_docx(&[
        "{{report_title}}",
        "Prepared for {{client_name}}, {{property_address}}",
        "{{building_observations}}",
        "{{exterior_observations}}",
        "{{photo_1}}",
        "{{photo_2}}",
        "{{photo_3}}",
        "{{photo_appendix}}",
        "{{not_a_declared_key}}",
    ]);
    let (sink, events) = ChannelSink::new(64);

    let rendered = engine
        .generate_docx(
            &request(),
            fixture_report(),
            &scenario_images(),
            &template,
            &fixture_spec(),
            &sink,
        )
        .await
        .unwrap();
    let RenderedDocument::Docx(bytes) = rendered else {
        panic!("docx backend must return container bytes");
    };

    // The sealed archive leads with the format magic and reopens with both
    // mandatory parts intact.
    assert_eq!(&bytes[..4], &ARCHIVE_MAGIC[..]);
    let document = part_text(&bytes, DOCUMENT_PART);
    assert!(!document.contains("{{"), "unsubstituted token left behind");
    assert!(document.contains("Roof Report"));
    // Missing address resolves to its documented default.
    assert!(document.contains("Prepared for Meridian Claims Group, [Property Address]"));
    // Legacy-shape exterior text survived reconciliation, with its inline
    // photo reference appended.
    assert!(document.contains(
        "Vinyl siding with scattered hail spatter on the west elevation. (Photo 2)"
    ));
    assert!(
        document.contains("Two-story wood-framed dwelling with a cross-gable roof. (Photo 1)")
    );
    // Appendix prefers descriptions and falls back to filenames.
    assert!(document.contains("Photo 1: Front elevation"));
    assert!(document.contains("Photo 2: west-siding.png"));

    // Two embedded photographs: the resized one and the 1x1 placeholder.
    assert_eq!(document.matches("<w:drawing>").count(), 2);
    assert!(
        document.contains(r#"cx="5715000""#),
        "800x600 must be scaled into the 600x450 box"
    );
    assert!(
        document.contains(r#"cx="9525""#),
        "failed slot must embed the 1x1 placeholder"
    );

    let content_types = part_text(&bytes, CONTENT_TYPES_PART);
    assert!(content_types.contains(r#"Extension="png""#));
    let rels = part_text(&bytes, DOCUMENT_RELS_PART);
    assert!(rels.contains("rIdImg1") && rels.contains("rIdImg2"));
    let archive = zip::ZipArchive::new(Cursor::new(&bytes[..])).unwrap();
    let media: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("word/media/"))
        .map(str::to_owned)
        .collect();
    assert_eq!(media.len(), 2);

    // Progress stream ends with a terminal frame and nothing after it.
    let mut saw_intermediate = false;
    let mut terminal = None;
    while let Ok(event) = events.recv().await {
        if event.completed {
            terminal = Some(event);
            break;
        }
        saw_intermediate = true;
    }
    let terminal = terminal.expect("terminal event must be emitted");
    assert_eq!(terminal.progress, 100);
    assert!(saw_intermediate);
    assert!(events.recv().await.is_err());
}

#[tokio::test]
async fn rendering_twice_yields_identical_markup() {
    let report = crate::report::ReportData::reconcile(fixture_report());
    let options = crate::mapper::MapperOptions {
        ai_enhance: false,
        today: chrono::NaiveDate::from_ymd_opt(2026, 8, 7).unwrap(),
    };
    let mut placeholders = crate::mapper::resolve_placeholders(
        &fixture_spec(),
        &report,
        &options,
        &Disabled,
        &Unavailable,
        &NullSink,
    )
    .await;
    let images = scenario_images();
    PhotoManifest::resolve(&images).annotate(&mut placeholders);

    let template = minimal_docx(&["{{report_title}}", "{{photo_1}}", "{{report_date}}"]);
    let render_options = RenderOptions {
        include_photos_inline: true,
    };
    let first = docx::render(
        docx::load_template(&template).unwrap(),
        &placeholders,
        &images,
        &render_options,
        &scenario_fetcher(),
        &NullSink,
    )
    .await
    .unwrap();
    let second = docx::render(
        docx::load_template(&template).unwrap(),
        &placeholders,
        &images,
        &render_options,
        &scenario_fetcher(),
        &NullSink,
    )
    .await
    .unwrap();
    assert_eq!(
        part_text(&first, DOCUMENT_PART),
        part_text(&second, DOCUMENT_PART)
    );
}

#[tokio::test]
async fn twenty_two_images_embed_only_twenty_slots() {
    let png = test_png(64, 48);
    let mut objects = HashMap::new();
    let images: Vec<ReportImage> = (1..=22)
        .map(|order| {
            let url = format!("https://storage.example.com/photo-{order:02}.png");
            objects.insert(url.clone(), png.clone());
            ReportImage {
                filename: format!("photo-{order:02}.png"),
                size_bytes: png.len() as u64,
                mime_type: "image/png".into(),
                storage_url: url.parse().unwrap(),
                description: None,
                category: Some(PhotoCategory::Roof),
                upload_order: order,
            }
        })
        .collect();

    let mut placeholders = IndexMap::new();
    let manifest = PhotoManifest::resolve(&images);
    manifest.annotate(&mut placeholders);
    assert_eq!(placeholders["photo_count"], "22");
    assert!(placeholders["photo_appendix"].contains("Photo 21: photo-21.png"));
    assert!(placeholders["photo_appendix"].contains("Photo 22: photo-22.png"));

    let slot_tokens: Vec<String> = (1..=20)
        .map(|slot| format!("{{{{photo_{slot}}}}}"))
        .collect();
    let mut paragraphs: Vec<&str> = slot_tokens.iter().map(String::as_str).collect();
    paragraphs.push("{{photo_appendix}}");
    paragraphs.push("{{photo_count}}");
    let template = minimal_docx(&paragraphs);

    let bytes = docx::render(
        docx::load_template(&template).unwrap(),
        &placeholders,
        &images,
        &RenderOptions {
            include_photos_inline: true,
        },
        &MemoryFetcher { objects },
        &NullSink,
    )
    .await
    .unwrap();

    let document = part_text(&bytes, DOCUMENT_PART);
    assert_eq!(document.matches("<w:drawing>").count(), 20);
    assert!(document.contains("Photo 22: photo-22.png"));
    let archive = zip::ZipArchive::new(Cursor::new(&bytes[..])).unwrap();
    let media_count = archive
        .file_names()
        .filter(|name| name.starts_with("word/media/"))
        .count();
    assert_eq!(media_count, 20);
}

#[tokio::test]
async fn cloud_generation_end_to_end() {
    let engine = Engine::new(scenario_fetcher(), Disabled, Unavailable);
    let service = LocalService::new();

    let rendered = engine
        .generate_cloud(
            &service,
            &request(),
            fixture_report(),
            &scenario_images(),
            &fixture_template(),
            &fixture_spec(),
            &NullSink,
        )
        .await
        .unwrap();
    let RenderedDocument::Remote { document_id } = rendered else {
        panic!("cloud backend must return a remote document id");
    };
    assert_eq!(document_id, "local-1");

    let ops = service.applied_ops(&document_id);
    assert!(!ops.is_empty());
    // Every substituted text is token-free and offsets never decrease.
    let mut last_offset = 0;
    let mut texts = Vec::new();
    let mut page_breaks = 0;
    let mut tables = 0;
    for op in &ops {
        let at = match op {
            EditOp::InsertText { at, text, .. } => {
                assert!(!text.contains("{{"), "token left in {text:?}");
                texts.push(text.clone());
                *at
            }
            EditOp::InsertPageBreak { at } => {
                page_breaks += 1;
                *at
            }
            EditOp::InsertTable { at, rows } => {
                tables += 1;
                assert!(rows.iter().flatten().all(|cell| !cell.contains("{{")));
                *at
            }
        };
        assert!(at >= last_offset);
        last_offset = at;
    }
    assert_eq!(page_breaks, 2);
    assert_eq!(tables, 1);
    assert!(texts.iter().any(|t| t == "Roof Report\n"));
    // Weather lookup is unavailable, so its documented default lands in the
    // table cell instead.
    let Some(EditOp::InsertTable { rows, .. }) = ops
        .iter()
        .find(|op| matches!(op, EditOp::InsertTable { .. }))
    else {
        unreachable!()
    };
    assert_eq!(rows[0][1], "Weather conditions were not recorded.");
    // Photographs surface only as text in this backend.
    assert!(texts.iter().any(|t| t.contains("Photo 1: Front elevation")));
    assert!(texts.iter().any(|t| t == "• Total photographs: 2\n"));
}

/// Fetcher that parks on a gate so a test can hold a job in flight.
struct GateFetcher {
    started: async_channel::Sender<()>,
    gate: async_channel::Receiver<()>,
    png: Bytes,
}

impl ImageFetcher for GateFetcher {
    async fn fetch(&self, _url: &url::Url) -> Result<Bytes, FetchError> {
        let _ = self.started.send(()).await;
        let _ = self.gate.recv().await;
        Ok(self.png.clone())
    }
}

#[tokio::test]
async fn concurrent_job_for_same_report_is_rejected() {
    let (started_tx, started_rx) = async_channel::bounded(1);
    let (gate_tx, gate_rx) = async_channel::bounded(1);
    let engine = Arc::new(Engine::new(
        GateFetcher {
            started: started_tx,
            gate: gate_rx,
            png: test_png(8, 8),
        },
        Disabled,
        Unavailable,
    ));
    let template = minimal_docx(&["{{report_title}}", "{{photo_1}}"]);

    let first = tokio::spawn({
        let engine = engine.clone();
        let template = template.clone();
        async move {
            engine
                .generate_docx(
                    &request(),
                    fixture_report(),
                    &scenario_images()[..1],
                    &template,
                    &fixture_spec(),
                    &NullSink,
                )
                .await
        }
    });

    // Wait until the first job is provably inside the render stage.
    started_rx.recv().await.unwrap();
    let err = engine
        .generate_docx(
            &request(),
            fixture_report(),
            &[],
            &template,
            &fixture_spec(),
            &NullSink,
        )
        .await
        .unwrap_err();
    assert!(matches!(*err.detail, ErrorDetail::AlreadyRunning));

    gate_tx.send(()).await.unwrap();
    first.await.unwrap().unwrap();

    // The finished job released the advisory lock.
    engine
        .generate_docx(
            &request(),
            fixture_report(),
            &[],
            &template,
            &fixture_spec(),
            &NullSink,
        )
        .await
        .unwrap();
}
