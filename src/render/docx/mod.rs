//! Binary container rendering: token substitution on the markup part plus
//! by-hand media embedding into the archive.
//!
//! The template container is loaded whole, mutated part-by-part in memory
//! and re-serialized. A failed pre-flight or a failed post-render integrity
//! check is fatal; a failed image fetch is not.

use std::{
    collections::HashSet,
    io::{Cursor, Read, Write},
};

use indexmap::IndexMap;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;

use crate::{
    fetch::{FetchError, ImageFetcher},
    progress::ProgressSink,
    render::TOKEN,
    report::ReportImage,
};

pub mod markup;

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const DOCUMENT_PART: &str = "word/document.xml";
pub const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";

/// Fixed number of photo slot tokens a template may carry.
pub const PHOTO_SLOTS: usize = 20;

/// Bounding box embedded photographs are scaled into, in pixels.
pub const PHOTO_BOX: (u32, u32) = (600, 450);

/// Local-file-header signature every valid archive must lead with.
pub const ARCHIVE_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("not a readable archive: {0}")]
    OpenArchive(zip::result::ZipError),
    #[error("Failed to read part {part}: {source}")]
    ReadPart {
        part: String,
        source: std::io::Error,
    },
    #[error("missing mandatory part: {0}")]
    MissingPart(&'static str),
    #[error("markup part is not valid UTF-8: {0}")]
    MarkupEncoding(std::string::FromUtf8Error),
    #[error("registry mutation failed: {0}")]
    Markup(markup::MarkupError),
    #[error("Failed to serialize archive: {0}")]
    WriteArchive(zip::result::ZipError),
    #[error("Failed to write part {part}: {source}")]
    WritePart {
        part: String,
        source: std::io::Error,
    },
    #[error("rendered archive failed integrity check: {0}")]
    Integrity(String),
    #[error("mutated part {part} is not well-formed: {source}")]
    MalformedXml {
        part: String,
        source: roxmltree::Error,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub include_photos_inline: bool,
}

/// Pre-flight load of the template container, run before the job touches
/// any external service. Fails on unreadable archives and on archives
/// missing a mandatory part.
pub fn load_template(bytes: &[u8]) -> Result<LoadedTemplate, ContainerError> {
    Container::open(bytes).map(|container| LoadedTemplate { container })
}

/// A validated template container, ready to render.
pub struct LoadedTemplate {
    container: Container,
}

/// An in-memory view of the container, parts in archive order.
struct Container {
    parts: IndexMap<String, Vec<u8>>,
}

impl Container {
    /// Pre-flight: the bytes must open as an archive and carry both
    /// mandatory parts, otherwise the job aborts before any external call.
    fn open(bytes: &[u8]) -> Result<Self, ContainerError> {
        let mut archive =
            zip::ZipArchive::new(Cursor::new(bytes)).map_err(ContainerError::OpenArchive)?;
        let mut parts = IndexMap::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(ContainerError::OpenArchive)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_owned();
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)
                .map_err(|source| ContainerError::ReadPart {
                    part: name.clone(),
                    source,
                })?;
            parts.insert(name, buf);
        }
        for part in [CONTENT_TYPES_PART, DOCUMENT_PART] {
            if !parts.contains_key(part) {
                return Err(ContainerError::MissingPart(part));
            }
        }
        Ok(Self { parts })
    }

    fn part_string(&self, name: &'static str) -> Result<String, ContainerError> {
        let bytes = self
            .parts
            .get(name)
            .ok_or(ContainerError::MissingPart(name))?;
        String::from_utf8(bytes.clone()).map_err(ContainerError::MarkupEncoding)
    }

    fn seal(self) -> Result<Vec<u8>, ContainerError> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, bytes) in &self.parts {
            writer
                .start_file(name.as_str(), options)
                .map_err(ContainerError::WriteArchive)?;
            writer
                .write_all(bytes)
                .map_err(|source| ContainerError::WritePart {
                    part: name.clone(),
                    source,
                })?;
        }
        let cursor = writer.finish().map_err(ContainerError::WriteArchive)?;
        Ok(cursor.into_inner())
    }
}

struct EmbeddedImage {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    extension: &'static str,
    content_type: &'static str,
}

#[derive(Debug, thiserror::Error)]
enum EmbedError {
    #[error("fetch: {0}")]
    Fetch(FetchError),
    #[error("decode: {0}")]
    Decode(image::ImageError),
    #[error("encode: {0}")]
    Encode(image::ImageError),
}

/// 1×1 transparent stand-in used when a photograph cannot be materialized.
fn placeholder_image() -> EmbeddedImage {
    let pixel = image::RgbaImage::new(1, 1);
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(pixel)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("1x1 png must encode");
    EmbeddedImage {
        bytes,
        width: 1,
        height: 1,
        extension: "png",
        content_type: "image/png",
    }
}

fn target_format(image: &ReportImage) -> (image::ImageFormat, &'static str, &'static str) {
    let declared = image.mime_type.parse::<mime::Mime>().ok();
    let guessed = mime_guess::from_path(&image.filename).first();
    let subtype = declared
        .or(guessed)
        .map(|m| m.subtype().as_str().to_owned())
        .unwrap_or_default();
    if subtype == "jpeg" {
        (image::ImageFormat::Jpeg, "jpg", "image/jpeg")
    } else {
        (image::ImageFormat::Png, "png", "image/png")
    }
}

async fn fetch_and_resize<F: ImageFetcher>(
    source: &ReportImage,
    fetcher: &F,
) -> Result<EmbeddedImage, EmbedError> {
    let bytes = fetcher
        .fetch(&source.storage_url)
        .await
        .map_err(EmbedError::Fetch)?;
    let decoded = image::load_from_memory(&bytes).map_err(EmbedError::Decode)?;

    let (box_w, box_h) = PHOTO_BOX;
    let resized = if decoded.width() > box_w || decoded.height() > box_h {
        decoded.thumbnail(box_w, box_h)
    } else {
        decoded
    };
    let (width, height) = (resized.width(), resized.height());

    let (format, extension, content_type) = target_format(source);
    let mut out = Vec::new();
    match format {
        // The jpeg encoder rejects alpha channels.
        image::ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(resized.to_rgb8())
            .write_to(&mut Cursor::new(&mut out), format)
            .map_err(EmbedError::Encode)?,
        _ => resized
            .write_to(&mut Cursor::new(&mut out), format)
            .map_err(EmbedError::Encode)?,
    }
    Ok(EmbeddedImage {
        bytes: out,
        width,
        height,
        extension,
        content_type,
    })
}

/// Render the loaded template against resolved placeholder values and the
/// report's photographs. Returns the sealed archive bytes.
pub async fn render<F, P>(
    template: LoadedTemplate,
    placeholders: &IndexMap<String, String>,
    images: &[ReportImage],
    options: &RenderOptions,
    fetcher: &F,
    progress: &P,
) -> Result<Vec<u8>, ContainerError>
where
    F: ImageFetcher,
    P: ProgressSink,
{
    let mut container = template.container;
    let mut document = container.part_string(DOCUMENT_PART)?;
    let mut content_types = container.part_string(CONTENT_TYPES_PART)?;
    let mut rels = match container.parts.get(DOCUMENT_RELS_PART) {
        Some(bytes) => {
            String::from_utf8(bytes.clone()).map_err(ContainerError::MarkupEncoding)?
        }
        None => markup::RELS_SKELETON.to_owned(),
    };
    let mut used_ids: HashSet<String> = markup::existing_relationship_ids(&rels);

    progress.emit(50, "Formatting document");

    let mut ordered: Vec<&ReportImage> = images.iter().collect();
    ordered.sort_by_key(|image| image.upload_order);

    // Per-slot media embedding, strictly in upload order. A failed slot is
    // replaced by a transparent placeholder instead of failing the render.
    let mut drawings = IndexMap::<String, String>::new();
    let mut media = Vec::<(String, Vec<u8>)>::new();
    if options.include_photos_inline {
        let slots = ordered.len().min(PHOTO_SLOTS);
        for (index, source) in ordered.iter().take(PHOTO_SLOTS).enumerate() {
            let slot = index + 1;
            progress.emit(
                (50 + 40 * slot / slots.max(1)) as u8,
                &format!("Embedding photograph {slot} of {slots}"),
            );
            let embedded = match fetch_and_resize(source, fetcher).await {
                Ok(embedded) => embedded,
                Err(error) => {
                    warn!(%error, url = %source.storage_url, slot, "photo embed failed, substituting placeholder");
                    placeholder_image()
                }
            };

            let digest = blake3::hash(&embedded.bytes).to_hex();
            let path = format!(
                "word/media/photo{slot}_{}.{}",
                &digest.as_str()[..8],
                embedded.extension
            );
            markup::register_default_extension(
                &mut content_types,
                embedded.extension,
                embedded.content_type,
            )
            .map_err(ContainerError::Markup)?;
            let rel_id = markup::fresh_relationship_id(&mut used_ids, slot);
            let target = path
                .strip_prefix("word/")
                .unwrap_or(path.as_str())
                .to_owned();
            markup::append_relationship(&mut rels, &rel_id, &target)
                .map_err(ContainerError::Markup)?;
            drawings.insert(
                format!("photo_{slot}"),
                markup::inline_drawing(&rel_id, slot as u32, embedded.width, embedded.height),
            );
            debug!(slot, part = %path, rel = %rel_id, "embedded photograph");
            media.push((path, embedded.bytes));
        }
    }

    // Every token is consumed: resolved values are substituted escaped,
    // photo slots become drawing runs, unknown keys collapse to nothing.
    document = TOKEN
        .replace_all(&document, |caps: &regex::Captures| {
            let key = &caps[1];
            if let Some(drawing) = drawings.get(key) {
                drawing.clone()
            } else if let Some(value) = placeholders.get(key) {
                markup::escape_xml(value)
            } else {
                String::new()
            }
        })
        .into_owned();

    progress.emit(95, "Finalizing document");

    container
        .parts
        .insert(DOCUMENT_PART.to_owned(), document.into_bytes());
    container
        .parts
        .insert(CONTENT_TYPES_PART.to_owned(), content_types.into_bytes());
    if !drawings.is_empty() || container.parts.contains_key(DOCUMENT_RELS_PART) {
        container
            .parts
            .insert(DOCUMENT_RELS_PART.to_owned(), rels.into_bytes());
    }
    for (path, bytes) in media {
        container.parts.insert(path, bytes);
    }

    let sealed = container.seal()?;
    verify(&sealed)?;
    Ok(sealed)
}

/// Post-render self check: the sealed bytes must reopen, carry both
/// mandatory parts, lead with the archive signature, and every mutated
/// markup part must still parse. A failure here means the caller gets an
/// error, never the broken bytes.
fn verify(bytes: &[u8]) -> Result<(), ContainerError> {
    if bytes.get(..4) != Some(&ARCHIVE_MAGIC[..]) {
        return Err(ContainerError::Integrity(
            "leading signature does not match the archive magic".to_owned(),
        ));
    }
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| ContainerError::Integrity(format!("reopen failed: {error}")))?;

    let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
    for part in [CONTENT_TYPES_PART, DOCUMENT_PART] {
        if !names.iter().any(|name| name == part) {
            return Err(ContainerError::Integrity(format!(
                "mandatory part {part} missing after render"
            )));
        }
    }

    for part in [CONTENT_TYPES_PART, DOCUMENT_PART, DOCUMENT_RELS_PART] {
        let Ok(mut file) = archive.by_name(part) else {
            continue;
        };
        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|source| ContainerError::ReadPart {
                part: part.to_owned(),
                source,
            })?;
        roxmltree::Document::parse(&text).map_err(|source| ContainerError::MalformedXml {
            part: part.to_owned(),
            source,
        })?;
    }
    Ok(())
}
