//! Rendering backends.
//!
//! Two independent implementations of the same logical capability: [`docx`]
//! assembles a local binary container, [`cloud`] drives an external document
//! service with ordered edit batches. They share no state beyond their
//! inputs, so container mutation logic and cursor-offset logic stay
//! decoupled.

use std::sync::LazyLock;

pub mod cloud;
pub mod docx;

/// `{{snake_case_key}}` placeholder tokens in template markup.
pub(crate) static TOKEN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").unwrap());
