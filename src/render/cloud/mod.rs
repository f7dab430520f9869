//! Cloud document backend: the same logical document built through ordered
//! edit operations against an external word-processor service.
//!
//! Every operation's target offset depends on the length of everything
//! inserted before it, so the batcher is a small state machine (cursor +
//! pending queue) and batches are submitted strictly one after another,
//! each only after the previous acknowledgement. This backend cannot embed
//! binary images; photographs surface only through their textual numbering
//! and the appendix.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::{
    photo::PhotoManifest,
    progress::ProgressSink,
    render::TOKEN,
    render::docx::PHOTO_SLOTS,
    template::{Element, Style, Template},
};

pub mod client;
pub mod local;

/// Operations per submitted batch.
pub const BATCH_SIZE: usize = 50;

/// Offset units the service charges per table cell on top of the cell text.
pub const CELL_SEPARATOR_ALLOWANCE: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditOp {
    InsertText {
        at: usize,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        style: Option<Style>,
    },
    InsertPageBreak {
        at: usize,
    },
    InsertTable {
        at: usize,
        rows: Vec<Vec<String>>,
    },
}

/// Cursor-tracked operation queue. Offsets are assigned at enqueue time and
/// are only valid if operations are later applied in exactly this order.
#[derive(Debug)]
pub struct CursorBatcher {
    cursor: usize,
    pending: Vec<EditOp>,
}

impl CursorBatcher {
    pub fn new() -> Self {
        // The service reserves offset 0 for the document head; the first
        // insertable position is 1.
        Self {
            cursor: 1,
            pending: Vec::new(),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn insert_text(&mut self, text: &str, style: Option<Style>) {
        if text.is_empty() {
            return;
        }
        self.pending.push(EditOp::InsertText {
            at: self.cursor,
            text: text.to_owned(),
            style,
        });
        self.cursor += text.chars().count();
    }

    pub fn insert_page_break(&mut self) {
        self.pending.push(EditOp::InsertPageBreak { at: self.cursor });
        self.cursor += 1;
    }

    pub fn insert_table(&mut self, rows: Vec<Vec<String>>) {
        if rows.is_empty() {
            return;
        }
        let cells: usize = rows.iter().map(Vec::len).sum();
        let text: usize = rows.iter().flatten().map(|cell| cell.chars().count()).sum();
        self.pending.push(EditOp::InsertTable {
            at: self.cursor,
            rows,
        });
        self.cursor += text + cells * CELL_SEPARATOR_ALLOWANCE;
    }

    /// Fixed-size batches, preserving enqueue order across the whole run.
    pub fn into_batches(self) -> Vec<Vec<EditOp>> {
        self.pending
            .chunks(BATCH_SIZE)
            .map(<[EditOp]>::to_vec)
            .collect()
    }
}

impl Default for CursorBatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn substitute(
    text: &str,
    placeholders: &IndexMap<String, String>,
    photos: &PhotoManifest,
) -> String {
    TOKEN
        .replace_all(text, |caps: &regex::Captures| {
            let key = &caps[1];
            if let Some(slot) = key
                .strip_prefix("photo_")
                .and_then(|rest| rest.parse::<u32>().ok())
                .filter(|slot| (1..=PHOTO_SLOTS as u32).contains(slot))
            {
                return photos
                    .slot(slot)
                    .map(|r| format!("Photo {}: {}", r.number, r.caption))
                    .unwrap_or_default();
            }
            placeholders.get(key).cloned().unwrap_or_default()
        })
        .into_owned()
}

fn element_style(style: &Style) -> Option<Style> {
    (style != &Style::default()).then(|| style.clone())
}

fn push_elements(
    batcher: &mut CursorBatcher,
    elements: &[Element],
    placeholders: &IndexMap<String, String>,
    photos: &PhotoManifest,
) {
    for element in elements {
        match element {
            Element::Text { content, style } => {
                let text = substitute(content, placeholders, photos);
                if !text.is_empty() {
                    batcher.insert_text(&format!("{text}\n"), element_style(style));
                }
            }
            Element::List { items, style } => {
                for item in items {
                    let text = substitute(item, placeholders, photos);
                    if !text.is_empty() {
                        batcher.insert_text(&format!("• {text}\n"), element_style(style));
                    }
                }
            }
            Element::Table { rows, style: _ } => {
                batcher.insert_table(
                    rows.iter()
                        .map(|row| {
                            row.iter()
                                .map(|cell| substitute(cell, placeholders, photos))
                                .collect()
                        })
                        .collect(),
                );
            }
            Element::Subsection { title, elements } => {
                batcher.insert_text(
                    &format!("{}\n", substitute(title, placeholders, photos)),
                    None,
                );
                push_elements(batcher, elements, placeholders, photos);
            }
        }
    }
}

/// Traverse the template and queue the full document as ordered operations.
pub fn build_ops(
    template: &Template,
    placeholders: &IndexMap<String, String>,
    photos: &PhotoManifest,
) -> CursorBatcher {
    let mut batcher = CursorBatcher::new();
    for section in &template.sections {
        if section.page_break_before {
            batcher.insert_page_break();
        }
        if let Some(title) = &section.title {
            batcher.insert_text(&format!("{}\n", substitute(title, placeholders, photos)), None);
        }
        push_elements(&mut batcher, &section.elements, placeholders, photos);
    }
    batcher
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAck {
    pub applied: usize,
}

/// External document service seam. Implemented by the HTTP client and by
/// the in-memory service used in tests and dry runs.
pub trait DocumentService: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn create_document(
        &self,
        title: &str,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send;

    fn apply_batch(
        &self,
        document_id: &str,
        ops: &[EditOp],
    ) -> impl Future<Output = Result<BatchAck, Self::Error>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError<E> {
    #[error("Failed to create document: {0}")]
    Create(E),
    #[error("batch {index} rejected for document {document_id}: {source}")]
    Batch {
        index: usize,
        document_id: String,
        source: E,
    },
    #[error("batch {index} acknowledged {acked} of {sent} operations")]
    ShortAck {
        index: usize,
        document_id: String,
        acked: usize,
        sent: usize,
    },
}

impl<E> SubmitError<E> {
    /// The remote document touched when the failure happened, if one was
    /// created. Partially-applied edits are not rolled back; the caller may
    /// use this id to clean up.
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::Create(_) => None,
            Self::Batch { document_id, .. } | Self::ShortAck { document_id, .. } => {
                Some(document_id)
            }
        }
    }
}

/// Create the remote document and submit all batches strictly in order.
/// Offsets are only valid relative to the already-applied state, so no
/// batch is sent before the previous one is acknowledged.
pub async fn submit<S, P>(
    service: &S,
    title: &str,
    batcher: CursorBatcher,
    progress: &P,
) -> Result<String, SubmitError<S::Error>>
where
    S: DocumentService,
    P: ProgressSink,
{
    let document_id = service
        .create_document(title)
        .await
        .map_err(SubmitError::Create)?;
    let batches = batcher.into_batches();
    let total = batches.len();
    for (index, batch) in batches.into_iter().enumerate() {
        let ack = service
            .apply_batch(&document_id, &batch)
            .await
            .map_err(|source| SubmitError::Batch {
                index,
                document_id: document_id.clone(),
                source,
            })?;
        if ack.applied != batch.len() {
            return Err(SubmitError::ShortAck {
                index,
                document_id,
                acked: ack.applied,
                sent: batch.len(),
            });
        }
        debug!(index, ops = batch.len(), "batch acknowledged");
        progress.emit(
            (50 + 45 * (index + 1) / total.max(1)) as u8,
            &format!("Submitted batch {} of {total}", index + 1),
        );
    }
    Ok(document_id)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::report::{PhotoCategory, ReportImage};

    #[test]
    fn text_advances_cursor_by_char_count() {
        let mut batcher = CursorBatcher::new();
        batcher.insert_text("Résumé", None);
        // 6 characters, not 8 bytes.
        assert_eq!(batcher.cursor(), 7);
    }

    #[test]
    fn page_break_advances_cursor_by_one() {
        let mut batcher = CursorBatcher::new();
        batcher.insert_page_break();
        assert_eq!(batcher.cursor(), 2);
    }

    #[test]
    fn table_charges_text_plus_per_cell_allowance() {
        let mut batcher = CursorBatcher::new();
        batcher.insert_table(vec![
            vec!["ab".into(), "cd".into()],
            vec!["e".into(), "".into()],
        ]);
        // 5 chars of text + 4 cells * 2.
        assert_eq!(batcher.cursor(), 1 + 5 + 8);
    }

    #[test]
    fn offsets_are_monotonic_and_order_preserving() {
        let mut batcher = CursorBatcher::new();
        batcher.insert_text("one", None);
        batcher.insert_page_break();
        batcher.insert_text("two", None);
        let offsets: Vec<usize> = batcher
            .pending
            .iter()
            .map(|op| match op {
                EditOp::InsertText { at, .. }
                | EditOp::InsertPageBreak { at }
                | EditOp::InsertTable { at, .. } => *at,
            })
            .collect();
        assert_eq!(offsets, vec![1, 4, 5]);
    }

    #[test]
    fn batches_preserve_global_order() {
        let mut batcher = CursorBatcher::new();
        for i in 0..BATCH_SIZE + 3 {
            batcher.insert_text(&format!("line {i}\n"), None);
        }
        let batches = batcher.into_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), BATCH_SIZE);
        assert_eq!(batches[1].len(), 3);
        let EditOp::InsertText { text, .. } = &batches[1][0] else {
            panic!("expected text op");
        };
        assert_eq!(text, &format!("line {BATCH_SIZE}\n"));
    }

    #[test]
    fn photo_slots_resolve_to_textual_references_only() {
        let images = vec![ReportImage {
            filename: "ridge.jpg".into(),
            size_bytes: 10,
            mime_type: "image/jpeg".into(),
            storage_url: "https://storage.example.com/ridge.jpg".parse().unwrap(),
            description: Some("Ridge cap displacement".into()),
            category: Some(PhotoCategory::Roof),
            upload_order: 1,
        }];
        let photos = PhotoManifest::resolve(&images);
        let placeholders = IndexMap::new();
        assert_eq!(
            substitute("{{photo_1}}", &placeholders, &photos),
            "Photo 1: Ridge cap displacement"
        );
        // Slots beyond the photo count resolve to empty.
        assert_eq!(substitute("{{photo_2}}", &placeholders, &photos), "");
    }
}
