//! In-memory document service for tests and dry runs.
//!
//! Applies the same offset arithmetic the batcher uses, so any reordered or
//! speculative submission is rejected exactly like a real service tracking
//! document state would reject it.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use super::{BatchAck, CELL_SEPARATOR_ALLOWANCE, DocumentService, EditOp};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("unknown document: {0}")]
    UnknownDocument(String),
    #[error("operation targets offset {at} but document length is {length}")]
    OffsetOutOfBounds { at: usize, length: usize },
    #[error("service lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
struct DocumentState {
    ops: Vec<EditOp>,
    /// Applied length in offset units; the head occupies offset 0.
    length: usize,
}

#[derive(Debug, Default)]
pub struct LocalService {
    documents: Mutex<HashMap<String, DocumentState>>,
    counter: AtomicU64,
}

impl LocalService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations applied to a document so far, in application order.
    pub fn applied_ops(&self, document_id: &str) -> Vec<EditOp> {
        self.documents
            .lock()
            .ok()
            .and_then(|docs| docs.get(document_id).map(|state| state.ops.clone()))
            .unwrap_or_default()
    }
}

fn op_cost(op: &EditOp) -> usize {
    match op {
        EditOp::InsertText { text, .. } => text.chars().count(),
        EditOp::InsertPageBreak { .. } => 1,
        EditOp::InsertTable { rows, .. } => {
            let cells: usize = rows.iter().map(Vec::len).sum();
            let text: usize = rows.iter().flatten().map(|cell| cell.chars().count()).sum();
            text + cells * CELL_SEPARATOR_ALLOWANCE
        }
    }
}

fn op_offset(op: &EditOp) -> usize {
    match op {
        EditOp::InsertText { at, .. }
        | EditOp::InsertPageBreak { at }
        | EditOp::InsertTable { at, .. } => *at,
    }
}

impl DocumentService for LocalService {
    type Error = Error;

    async fn create_document(&self, _title: &str) -> Result<String, Error> {
        let id = format!("local-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        let mut documents = self.documents.lock().map_err(|_| Error::Poisoned)?;
        documents.insert(
            id.clone(),
            DocumentState {
                ops: Vec::new(),
                length: 1,
            },
        );
        Ok(id)
    }

    async fn apply_batch(&self, document_id: &str, ops: &[EditOp]) -> Result<BatchAck, Error> {
        let mut documents = self.documents.lock().map_err(|_| Error::Poisoned)?;
        let state = documents
            .get_mut(document_id)
            .ok_or_else(|| Error::UnknownDocument(document_id.to_owned()))?;
        for op in ops {
            let at = op_offset(op);
            if at == 0 || at > state.length {
                return Err(Error::OffsetOutOfBounds {
                    at,
                    length: state.length,
                });
            }
            state.length += op_cost(op);
            state.ops.push(op.clone());
        }
        Ok(BatchAck { applied: ops.len() })
    }
}
