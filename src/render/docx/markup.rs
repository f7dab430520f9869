//! Hand-edited OOXML fragments: escaping, registry insertion and the inline
//! drawing run.

use std::collections::HashSet;

/// EMU per pixel at the container's native 96 dpi.
pub const EMU_PER_PIXEL: u64 = 9525;

pub const RELS_SKELETON: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/relationships"></Relationships>"#,
);

const IMAGE_RELATIONSHIP_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

#[derive(Debug, thiserror::Error)]
pub enum MarkupError {
    #[error("registry part has no {0} anchor")]
    MissingAnchor(&'static str),
}

pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Register a `<Default>` mapping for `extension` unless one already exists.
pub fn register_default_extension(
    content_types: &mut String,
    extension: &str,
    content_type: &str,
) -> Result<(), MarkupError> {
    if content_types.contains(&format!("Extension=\"{extension}\"")) {
        return Ok(());
    }
    let anchor = content_types
        .rfind("</Types>")
        .ok_or(MarkupError::MissingAnchor("</Types>"))?;
    content_types.insert_str(
        anchor,
        &format!("<Default Extension=\"{extension}\" ContentType=\"{content_type}\"/>"),
    );
    Ok(())
}

/// Append a relationship entry pointing at an embedded media part.
pub fn append_relationship(
    rels: &mut String,
    id: &str,
    target: &str,
) -> Result<(), MarkupError> {
    let anchor = rels
        .rfind("</Relationships>")
        .ok_or(MarkupError::MissingAnchor("</Relationships>"))?;
    rels.insert_str(
        anchor,
        &format!(r#"<Relationship Id="{id}" Type="{IMAGE_RELATIONSHIP_TYPE}" Target="{target}"/>"#),
    );
    Ok(())
}

/// Relationship ids already present in a registry part. Freshly generated
/// ids must not collide with these.
pub fn existing_relationship_ids(rels: &str) -> HashSet<String> {
    static ID: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r#"Id="([^"]+)""#).unwrap());
    ID.captures_iter(rels)
        .map(|caps| caps[1].to_owned())
        .collect()
}

pub fn fresh_relationship_id(used: &mut HashSet<String>, slot: usize) -> String {
    let mut candidate = format!("rIdImg{slot}");
    let mut bump = 0;
    while used.contains(&candidate) {
        bump += 1;
        candidate = format!("rIdImg{slot}x{bump}");
    }
    used.insert(candidate.clone());
    candidate
}

/// Inline picture run for one photo slot. The token being replaced sits
/// inside a `<w:r><w:t>` pair, so the fragment closes that run, emits the
/// drawing in a run of its own and reopens a text run for whatever follows.
pub fn inline_drawing(rel_id: &str, doc_pr_id: u32, width_px: u32, height_px: u32) -> String {
    let cx = u64::from(width_px) * EMU_PER_PIXEL;
    let cy = u64::from(height_px) * EMU_PER_PIXEL;
    format!(
        concat!(
            "</w:t></w:r><w:r><w:drawing>",
            r#"<wp:inline distT="0" distB="0" distL="0" distR="0" xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing">"#,
            r#"<wp:extent cx="{cx}" cy="{cy}"/>"#,
            r#"<wp:docPr id="{id}" name="Photograph {id}"/>"#,
            r#"<a:graphic xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">"#,
            r#"<a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
            r#"<pic:pic xmlns:pic="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
            r#"<pic:nvPicPr><pic:cNvPr id="{id}" name="Photograph {id}"/><pic:cNvPicPr/></pic:nvPicPr>"#,
            r#"<pic:blipFill><a:blip r:embed="{rel}" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>"#,
            r#"<pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
            r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr>"#,
            "</pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r>",
            r#"<w:r><w:t xml:space="preserve">"#,
        ),
        cx = cx,
        cy = cy,
        id = doc_pr_id,
        rel = rel_id,
    )
}
