//! Report data ingestion.
//!
//! Persisted report records exist under two historically parallel field
//! naming shapes for the observation and discussion sections. The dual
//! naming is resolved exactly once here, at the ingestion boundary; every
//! downstream consumer sees only the canonical [`ReportData`] shape.

use serde::Deserialize;
use tracing::warn;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ProjectInfo {
    pub title: Option<String>,
    pub client_name: Option<String>,
    pub property_address: Option<String>,
    pub inspection_date: Option<String>,
    pub file_number: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AssignmentScope {
    pub purpose: Option<String>,
    pub scope_description: Option<String>,
    pub limitations: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Observations {
    pub building: Option<String>,
    pub exterior: Option<String>,
    pub interior: Option<String>,
    pub site: Option<String>,
}

/// Pre-migration shape of the observations section. Field names differ but
/// the meaning is one-to-one with [`Observations`].
#[derive(Deserialize, Debug, Clone, Default)]
pub struct LegacyObservations {
    pub building_description: Option<String>,
    pub exterior_observations: Option<String>,
    pub interior_observations: Option<String>,
    pub site_observations: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Research {
    pub weather_history: Option<String>,
    pub permits: Option<String>,
    pub documents_reviewed: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Discussion {
    pub analysis: Option<String>,
    pub methodology: Option<String>,
}

/// Pre-migration shape of the discussion section.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct LegacyDiscussion {
    pub discussion: Option<String>,
    pub analysis_method: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Conclusions {
    pub summary: Option<String>,
    pub recommendations: Option<String>,
}

/// Report data as persisted, before shape reconciliation. A record may carry
/// the modern sections, the legacy ones, or both.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RawReportData {
    #[serde(default)]
    pub project: ProjectInfo,
    #[serde(default)]
    pub assignment: AssignmentScope,
    #[serde(default)]
    pub observations: Option<Observations>,
    #[serde(default)]
    pub building_observations: Option<LegacyObservations>,
    #[serde(default)]
    pub research: Research,
    #[serde(default)]
    pub discussion: Option<Discussion>,
    #[serde(default)]
    pub discussion_and_analysis: Option<LegacyDiscussion>,
    #[serde(default)]
    pub conclusions: Conclusions,
}

/// Canonical report shape. The only way to construct one is
/// [`ReportData::reconcile`], so legacy aliases cannot leak past this module.
#[derive(Debug, Clone, Default)]
pub struct ReportData {
    pub project: ProjectInfo,
    pub assignment: AssignmentScope,
    pub observations: Observations,
    pub research: Research,
    pub discussion: Discussion,
    pub conclusions: Conclusions,
}

fn pick(modern: Option<String>, legacy: Option<String>) -> Option<String> {
    match modern {
        Some(v) if !v.trim().is_empty() => Some(v),
        _ => legacy.filter(|v| !v.trim().is_empty()),
    }
}

impl ReportData {
    /// Collapse the dual field-naming shapes into the canonical one. The
    /// modern field wins whenever it is present and non-empty; the legacy
    /// field only fills gaps.
    pub fn reconcile(raw: RawReportData) -> Self {
        let modern = raw.observations.unwrap_or_default();
        let legacy = raw.building_observations.unwrap_or_default();
        let observations = Observations {
            building: pick(modern.building, legacy.building_description),
            exterior: pick(modern.exterior, legacy.exterior_observations),
            interior: pick(modern.interior, legacy.interior_observations),
            site: pick(modern.site, legacy.site_observations),
        };

        let modern = raw.discussion.unwrap_or_default();
        let legacy = raw.discussion_and_analysis.unwrap_or_default();
        let discussion = Discussion {
            analysis: pick(modern.analysis, legacy.discussion),
            methodology: pick(modern.methodology, legacy.analysis_method),
        };

        Self {
            project: raw.project,
            assignment: raw.assignment,
            observations,
            research: raw.research,
            discussion,
            conclusions: raw.conclusions,
        }
    }

    /// Resolve a dot-delimited placeholder path. Whitespace-only values are
    /// treated as absent so the mapper's default substitution kicks in.
    pub fn lookup(&self, path: &str) -> Option<&str> {
        let field = match path {
            "project.title" => &self.project.title,
            "project.client_name" => &self.project.client_name,
            "project.property_address" => &self.project.property_address,
            "project.inspection_date" => &self.project.inspection_date,
            "project.file_number" => &self.project.file_number,
            "assignment.purpose" => &self.assignment.purpose,
            "assignment.scope_description" => &self.assignment.scope_description,
            "assignment.limitations" => &self.assignment.limitations,
            "observations.building" => &self.observations.building,
            "observations.exterior" => &self.observations.exterior,
            "observations.interior" => &self.observations.interior,
            "observations.site" => &self.observations.site,
            "research.weather_history" => &self.research.weather_history,
            "research.permits" => &self.research.permits,
            "research.documents_reviewed" => &self.research.documents_reviewed,
            "discussion.analysis" => &self.discussion.analysis,
            "discussion.methodology" => &self.discussion.methodology,
            "conclusions.summary" => &self.conclusions.summary,
            "conclusions.recommendations" => &self.conclusions.recommendations,
            _ => return None,
        };
        field.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// The five fixed photograph categories. Anything unrecognized folds into
/// `Other` at deserialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum PhotoCategory {
    Building,
    Exterior,
    Interior,
    Roof,
    Other,
}

impl From<String> for PhotoCategory {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "building" => Self::Building,
            "exterior" => Self::Exterior,
            "interior" => Self::Interior,
            "roof" => Self::Roof,
            "other" => Self::Other,
            unknown => {
                warn!(category = unknown, "Unknown photo category, folding into other");
                Self::Other
            }
        }
    }
}

/// A photograph attached to a report. The engine only ever reads these;
/// persisted image records are never mutated here.
#[derive(Deserialize, Debug, Clone)]
pub struct ReportImage {
    pub filename: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub storage_url: url::Url,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<PhotoCategory>,
    pub upload_order: u32,
}
