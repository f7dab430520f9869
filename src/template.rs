//! Document template and placeholder declarations.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Left,
    Center,
    Right,
    Justify,
}

/// Character/paragraph styling. Every field is optional; absent fields
/// inherit whatever the rendering backend's defaults are.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Style {
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<bool>,
    pub font_size: Option<u32>,
    pub alignment: Option<Alignment>,
    pub space_before: Option<u32>,
    pub space_after: Option<u32>,
    pub font_family: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum Element {
    Text {
        content: String,
        #[serde(default)]
        style: Style,
    },
    List {
        items: Vec<String>,
        #[serde(default)]
        style: Style,
    },
    Table {
        rows: Vec<Vec<String>>,
        #[serde(default)]
        style: Style,
    },
    Subsection {
        title: String,
        elements: Vec<Element>,
    },
}

#[derive(Deserialize, Debug, Clone)]
pub struct Section {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub page_break_before: bool,
    pub elements: Vec<Element>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Template {
    pub sections: Vec<Section>,
}

/// Values computed at render time instead of being read from report data.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DynamicValue {
    CurrentDate,
    WeatherConditions,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderSource {
    /// Dot-delimited path into the canonical report data.
    Path(String),
    Dynamic(DynamicValue),
}

#[derive(Deserialize, Debug, Clone)]
pub struct PlaceholderDef {
    #[serde(flatten)]
    pub source: PlaceholderSource,
    #[serde(default)]
    pub default: Option<String>,
}

/// Declarative placeholder table. Order is preserved so mapping progress is
/// reported in a stable sequence.
#[derive(Deserialize, Debug, Clone)]
pub struct PlaceholderSpec {
    pub placeholders: IndexMap<String, PlaceholderDef>,
}
