//! Photograph numbering, inline references and the appendix list.
//!
//! References are ephemeral: they are recomputed on every render from the
//! persisted image list and never written back.

use indexmap::IndexMap;

use crate::report::{PhotoCategory, ReportImage};

/// Appendix text used when a report has no photographs at all.
pub const NO_PHOTOS_SENTINEL: &str = "No photographs were provided for this report.";

/// Placeholder keys whose narrative text gets an inline photo reference
/// appended, keyed by the category that annotates them.
const ANNOTATED_KEYS: [(PhotoCategory, &str); 3] = [
    (PhotoCategory::Building, "building_observations"),
    (PhotoCategory::Exterior, "exterior_observations"),
    (PhotoCategory::Interior, "interior_observations"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRef {
    /// 1-based number, bijective with upload order.
    pub number: u32,
    pub category: PhotoCategory,
    pub caption: String,
}

#[derive(Debug, Clone)]
pub struct PhotoManifest {
    refs: Vec<PhotoRef>,
    by_category: IndexMap<PhotoCategory, Vec<u32>>,
    appendix: String,
}

impl PhotoManifest {
    /// Number the images 1..N by upload order and derive category groupings
    /// and the appendix. Numbering is stable across categories.
    pub fn resolve(images: &[ReportImage]) -> Self {
        let mut ordered: Vec<&ReportImage> = images.iter().collect();
        ordered.sort_by_key(|image| image.upload_order);

        let mut refs = Vec::with_capacity(ordered.len());
        let mut by_category = IndexMap::<PhotoCategory, Vec<u32>>::new();
        for (index, image) in ordered.iter().enumerate() {
            let number = index as u32 + 1;
            let category = image.category.unwrap_or(PhotoCategory::Other);
            let caption = image
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .unwrap_or(&image.filename)
                .to_owned();
            by_category.entry(category).or_default().push(number);
            refs.push(PhotoRef {
                number,
                category,
                caption,
            });
        }

        let appendix = if refs.is_empty() {
            NO_PHOTOS_SENTINEL.to_owned()
        } else {
            refs.iter()
                .map(|r| format!("Photo {}: {}", r.number, r.caption))
                .collect::<Vec<_>>()
                .join("\n")
        };

        Self {
            refs,
            by_category,
            appendix,
        }
    }

    pub fn total(&self) -> usize {
        self.refs.len()
    }

    pub fn refs(&self) -> &[PhotoRef] {
        &self.refs
    }

    /// The reference for the 1-based photo slot, if an image exists there.
    pub fn slot(&self, number: u32) -> Option<&PhotoRef> {
        self.refs.get(number.checked_sub(1)? as usize)
    }

    /// Compact inline suffix for one category's photos. Range compression is
    /// applied across the whole category subset, so a non-contiguous set
    /// still collapses to its lowest and highest number.
    pub fn inline_suffix(&self, category: PhotoCategory) -> String {
        let Some(numbers) = self.by_category.get(&category) else {
            return String::new();
        };
        match numbers.as_slice() {
            [] => String::new(),
            [single] => format!(" (Photo {single})"),
            [first, .., last] => format!(" (Photos {first}-{last})"),
        }
    }

    pub fn appendix(&self) -> &str {
        &self.appendix
    }

    /// Fold photo references into the resolved placeholder map: appends the
    /// inline suffix to each annotated narrative field and publishes the
    /// appendix and total count as derived keys.
    pub fn annotate(&self, placeholders: &mut IndexMap<String, String>) {
        for (category, key) in ANNOTATED_KEYS {
            let suffix = self.inline_suffix(category);
            if suffix.is_empty() {
                continue;
            }
            if let Some(value) = placeholders.get_mut(key) {
                value.push_str(&suffix);
            }
        }
        placeholders.insert("photo_appendix".to_owned(), self.appendix.clone());
        placeholders.insert("photo_count".to_owned(), self.refs.len().to_string());
    }
}
