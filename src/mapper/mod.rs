//! Template data mapping: resolves the declarative placeholder table against
//! canonical report data.
//!
//! The output map is total: every declared key ends up present with a
//! non-empty value, falling back to the per-field default table. Enhancement
//! failures never surface to the caller.

use std::sync::LazyLock;

use chrono::NaiveDate;
use indexmap::IndexMap;
use tracing::warn;

use crate::{
    progress::ProgressSink,
    report::ReportData,
    template::{DynamicValue, PlaceholderSource, PlaceholderSpec},
};

pub mod conditions;
pub mod enhance;

pub use conditions::ConditionsProvider;
pub use enhance::Enhancer;

/// Fixed domain context handed to the enhancement service with every call.
pub const DOMAIN_CONTEXT: &str =
    "forensic building inspection report, third-person professional prose";

static LIST_MARKER: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?m)^\s*(?:[•\-*]|\d+\.)\s+").unwrap());

/// Whether authored text reads as bullet/numbered list fragments rather than
/// finished prose. Only such text is offered to the enhancement service.
pub fn looks_like_list(text: &str) -> bool {
    LIST_MARKER.is_match(text)
}

/// Human-readable stand-ins for fields the author left empty. Keys absent
/// from the table fall through to a generic placeholder.
pub fn field_default(key: &str) -> &'static str {
    match key {
        "report_title" => "[Report Title]",
        "client_name" => "[Client Name]",
        "property_address" => "[Property Address]",
        "inspection_date" => "[Inspection Date]",
        "file_number" => "[File Number]",
        "assignment_purpose" => "[Purpose of Assignment]",
        "weather_conditions" => "Weather conditions were not recorded.",
        _ => "To be determined.",
    }
}

fn long_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn nonempty(value: String) -> Option<String> {
    if value.trim().is_empty() { None } else { Some(value) }
}

#[derive(Debug, Clone)]
pub struct MapperOptions {
    pub ai_enhance: bool,
    /// Injected so two renders of the same input are reproducible.
    pub today: NaiveDate,
}

/// Resolve every declared placeholder. Infallible by contract: anything that
/// cannot be resolved degrades to its default instead of erroring.
pub async fn resolve_placeholders<E, C, P>(
    spec: &PlaceholderSpec,
    report: &ReportData,
    options: &MapperOptions,
    enhancer: &E,
    conditions: &C,
    progress: &P,
) -> IndexMap<String, String>
where
    E: Enhancer,
    C: ConditionsProvider,
    P: ProgressSink,
{
    progress.emit(10, "Report content loaded");

    let total = spec.placeholders.len();
    let mut resolved = IndexMap::with_capacity(total);
    for (index, (key, def)) in spec.placeholders.iter().enumerate() {
        let value = match &def.source {
            PlaceholderSource::Dynamic(DynamicValue::CurrentDate) => {
                Some(long_date(options.today))
            }
            PlaceholderSource::Dynamic(DynamicValue::WeatherConditions) => {
                conditions
                    .conditions(
                        report.lookup("project.property_address"),
                        report.lookup("project.inspection_date"),
                    )
                    .await
            }
            PlaceholderSource::Path(path) => {
                match report.lookup(path).map(str::to_owned) {
                    Some(text)
                        if options.ai_enhance
                            && enhancer.is_configured()
                            && looks_like_list(&text) =>
                    {
                        match enhancer.enhance(&text, key, DOMAIN_CONTEXT).await {
                            Ok(prose) => nonempty(prose).or(Some(text)),
                            Err(error) => {
                                warn!(%error, key, "enhancement failed, keeping authored text");
                                Some(text)
                            }
                        }
                    }
                    other => other,
                }
            }
        };

        let value = value
            .and_then(nonempty)
            .or_else(|| def.default.clone().and_then(nonempty))
            .unwrap_or_else(|| field_default(key).to_owned());
        resolved.insert(key.clone(), value);

        if (index + 1) % 4 == 0 || index + 1 == total {
            let percent = 10 + (35 * (index + 1) / total.max(1)) as u8;
            progress.emit(
                percent,
                &format!("Processed {} of {total} placeholders", index + 1),
            );
        }
    }
    resolved
}
