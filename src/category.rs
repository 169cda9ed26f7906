//! Entity categories and the tagging schema.
//!
//! Categories have two spellings: the English snake_case name used in JSON
//! (reports, manifests, CLI flags) and the Norwegian tag name used inside
//! documents (`<elv navn="…">`). The document syntax is shared with the HTML
//! renderer, so tag names never change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Attribute that carries the entity mention in every marker.
pub const NAME_ATTRIBUTE: &str = "navn";

/// The fixed set of entity categories the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    /// Rivers and streams (`elv`).
    River,
    /// Lakes and reservoirs (`innsjø`).
    Lake,
    /// Power plants and similar installations (`kraftverk`).
    Facility,
    /// Dams (`dam`).
    Dam,
    /// Man-made water conduits: tunnels, pipes, canals (`vannvei`).
    Waterway,
}

impl EntityCategory {
    pub const ALL: [EntityCategory; 5] = [
        EntityCategory::River,
        EntityCategory::Lake,
        EntityCategory::Facility,
        EntityCategory::Dam,
        EntityCategory::Waterway,
    ];

    /// Tag name used in documents.
    pub fn tag(self) -> &'static str {
        match self {
            EntityCategory::River => "elv",
            EntityCategory::Lake => "innsjø",
            EntityCategory::Facility => "kraftverk",
            EntityCategory::Dam => "dam",
            EntityCategory::Waterway => "vannvei",
        }
    }

    /// Look up a category by its document tag (case-insensitive).
    ///
    /// `innsjoe` and `innsjo` are accepted for lakes; models sometimes drop
    /// the `ø`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_lowercase().as_str() {
            "elv" => Some(EntityCategory::River),
            "innsjø" | "innsjoe" | "innsjo" => Some(EntityCategory::Lake),
            "kraftverk" => Some(EntityCategory::Facility),
            "dam" => Some(EntityCategory::Dam),
            "vannvei" => Some(EntityCategory::Waterway),
            _ => None,
        }
    }

    /// English name, as used in JSON.
    pub fn name(self) -> &'static str {
        match self {
            EntityCategory::River => "river",
            EntityCategory::Lake => "lake",
            EntityCategory::Facility => "facility",
            EntityCategory::Dam => "dam",
            EntityCategory::Waterway => "waterway",
        }
    }

    /// Trailing generic words dropped from names before matching, already
    /// in normalised form (see [`crate::catalog::normalize`]).
    ///
    /// Only whole words are dropped: "Luster kraftverk" matches "Luster",
    /// but "Fortunselva" stays as it is.
    pub fn generic_terms(self) -> &'static [&'static str] {
        match self {
            EntityCategory::River => &["elv", "elva", "elven", "elvi", "bekk", "bekken", "vassdrag", "vassdraget"],
            EntityCategory::Lake => &["vatn", "vatnet", "vann", "vannet", "sjoen", "tjern", "tjernet", "magasin", "magasinet"],
            EntityCategory::Facility => &[
                "kraftverk",
                "vannkraftverk",
                "kraftstasjon",
                "kraftanlegg",
                "anlegg",
                "pumpestasjon",
                "minikraftverk",
                "mikrokraftverk",
                "smakraftverk",
            ],
            EntityCategory::Dam => &["dam", "dammen", "damanlegg"],
            EntityCategory::Waterway => &["tunnel", "tunnelen", "kanal", "kanalen", "vannvei", "vannveien"],
        }
    }

    /// Norwegian description used in the tagging prompt.
    pub fn description(self) -> &'static str {
        match self {
            EntityCategory::River => "elv; kan også omtales som bekk eller vassdrag",
            EntityCategory::Lake => "innsjø; kan også omtales som vatn, vann eller magasin",
            EntityCategory::Facility => "kraftverk eller kraftstasjon",
            EntityCategory::Dam => "dam",
            EntityCategory::Waterway => "menneskebygd vei for vann, et rør, en tunnel eller en kanal",
        }
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityCategory {
    type Err = String;

    /// Accepts English names and document tags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        EntityCategory::ALL
            .into_iter()
            .find(|c| c.name() == lower)
            .or_else(|| EntityCategory::from_tag(&lower))
            .ok_or_else(|| {
                format!(
                    "unknown entity category '{s}' (expected one of: {})",
                    EntityCategory::ALL.map(|c| c.name()).join(", ")
                )
            })
    }
}

/// Which categories the tagger asks for and accepts.
///
/// Markers whose tag is outside the schema are reported as
/// [`crate::error::MarkerWarningKind::UnknownCategory`] and left untagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySchema {
    categories: Vec<EntityCategory>,
}

impl Default for CategorySchema {
    fn default() -> Self {
        Self {
            categories: EntityCategory::ALL.to_vec(),
        }
    }
}

impl CategorySchema {
    /// Schema restricted to `categories` (deduplicated, in canonical order).
    pub fn new(categories: impl IntoIterator<Item = EntityCategory>) -> Self {
        let mut categories: Vec<EntityCategory> = categories.into_iter().collect();
        categories.sort_unstable();
        categories.dedup();
        Self { categories }
    }

    pub fn categories(&self) -> &[EntityCategory] {
        &self.categories
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Resolve a document tag against the schema.
    pub fn accept(&self, tag: &str) -> Option<EntityCategory> {
        EntityCategory::from_tag(tag).filter(|c| self.categories.contains(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for c in EntityCategory::ALL {
            assert_eq!(EntityCategory::from_tag(c.tag()), Some(c));
        }
    }

    #[test]
    fn lake_aliases() {
        assert_eq!(EntityCategory::from_tag("innsjoe"), Some(EntityCategory::Lake));
        assert_eq!(EntityCategory::from_tag("INNSJØ"), Some(EntityCategory::Lake));
        assert_eq!(EntityCategory::from_tag("fjell"), None);
    }

    #[test]
    fn from_str_accepts_names_and_tags() {
        assert_eq!("river".parse::<EntityCategory>(), Ok(EntityCategory::River));
        assert_eq!("kraftverk".parse::<EntityCategory>(), Ok(EntityCategory::Facility));
        assert!("mountain".parse::<EntityCategory>().is_err());
    }

    #[test]
    fn serde_uses_english_names() {
        let json = serde_json::to_string(&EntityCategory::Facility).unwrap();
        assert_eq!(json, "\"facility\"");
    }

    #[test]
    fn schema_rejects_disabled_categories() {
        let schema = CategorySchema::new([EntityCategory::Lake, EntityCategory::River, EntityCategory::Lake]);
        assert_eq!(schema.categories(), &[EntityCategory::River, EntityCategory::Lake]);
        assert_eq!(schema.accept("elv"), Some(EntityCategory::River));
        assert_eq!(schema.accept("kraftverk"), None);
    }
}
