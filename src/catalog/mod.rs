//! Reference catalog: indexed, read-only NVE reference data.
//!
//! ## Why a separate index per category?
//!
//! A mention is only ever compared against records of its own category: a
//! lake named "Glomma" must not satisfy `<elv navn="Glomma">`. Splitting the
//! index keeps fuzzy scans short and makes that rule structural.
//!
//! ## Lookup order
//!
//! 1. Exact: records whose match key equals the mention's key, score 1.0.
//! 2. Fuzzy: only when nothing matched exactly. Jaro-Winkler similarity of
//!    the keys, kept when ≥ [`MatchOptions::fuzzy_threshold`].
//!
//! Candidates are ordered by score (descending), then identifier
//! (numerically when both are numbers), then load order. The same catalog
//! always answers the same query the same way.

pub mod load;
pub mod normalize;

pub use load::{CatalogManifest, DatasetFormat, DatasetSpec};

use crate::category::EntityCategory;
use crate::error::CatalogLoadError;
use normalize::match_key;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Default minimum Jaro-Winkler similarity for a fuzzy candidate.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.82;

/// Default cap on returned candidates (top-score ties are never cut).
pub const DEFAULT_MAX_CANDIDATES: usize = 10;

/// A single entry from an external reference dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// Identifier from the source dataset, unique within its category.
    pub id: String,
    /// Canonical name as written in the dataset.
    pub name: String,
    pub category: EntityCategory,
    /// Remaining dataset fields, copied onto resolved tags.
    pub attributes: BTreeMap<String, String>,
}

/// How lookups score and limit candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub fuzzy_threshold: f64,
    pub max_candidates: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

/// How a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// One lookup hit.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub record: &'a ReferenceRecord,
    /// 1.0 for exact hits, Jaro-Winkler similarity otherwise.
    pub score: f64,
    pub kind: MatchKind,
}

#[derive(Debug, Default)]
struct CategoryIndex {
    records: Vec<ReferenceRecord>,
    /// Match key of `records[i]`.
    keys: Vec<String>,
    by_key: HashMap<String, Vec<usize>>,
}

impl CategoryIndex {
    fn push(&mut self, record: ReferenceRecord) {
        let key = match_key(&record.name, record.category);
        let idx = self.records.len();
        self.by_key.entry(key.clone()).or_default().push(idx);
        self.keys.push(key);
        self.records.push(record);
    }
}

/// Indexed reference data for every category.
///
/// Immutable once built; share it across workers with `Arc<Catalog>`.
#[derive(Debug, Default)]
pub struct Catalog {
    indexes: BTreeMap<EntityCategory, CategoryIndex>,
    options: MatchOptions,
}

impl Catalog {
    /// Build a catalog from records already in memory.
    pub fn from_records(records: impl IntoIterator<Item = ReferenceRecord>, options: MatchOptions) -> Self {
        let mut catalog = Self {
            indexes: BTreeMap::new(),
            options,
        };
        for record in records {
            catalog.indexes.entry(record.category).or_default().push(record);
        }
        catalog
    }

    /// Load every dataset listed in `manifest`.
    ///
    /// A dataset feeding several categories is indexed once per category.
    /// This reads files synchronously; async callers should use
    /// [`crate::process::load_catalog`].
    pub fn load(manifest: &CatalogManifest, options: MatchOptions) -> Result<Self, CatalogLoadError> {
        let mut catalog = Self {
            indexes: BTreeMap::new(),
            options,
        };
        for spec in &manifest.datasets {
            if spec.optional && !spec.path.exists() {
                info!("Skipping optional dataset {} (not found)", spec.path.display());
                continue;
            }
            let records = load::read_dataset(spec)?;
            for &category in &spec.categories {
                let index = catalog.indexes.entry(category).or_default();
                for record in &records {
                    index.push(ReferenceRecord {
                        category,
                        ..record.clone()
                    });
                }
            }
        }
        info!(
            "Catalog ready: {}",
            catalog
                .indexes
                .iter()
                .map(|(c, idx)| format!("{c}={}", idx.records.len()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(catalog)
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }

    /// Number of records indexed under `category`.
    pub fn len(&self, category: EntityCategory) -> usize {
        self.indexes.get(&category).map_or(0, |idx| idx.records.len())
    }

    /// Total records across all categories.
    pub fn total_len(&self) -> usize {
        self.indexes.values().map(|idx| idx.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Find candidate records for a mention, best first.
    ///
    /// Returns an empty list when nothing clears the fuzzy threshold or when
    /// the category has no records.
    pub fn lookup(&self, name: &str, category: EntityCategory) -> Vec<Candidate<'_>> {
        let Some(index) = self.indexes.get(&category) else {
            return Vec::new();
        };
        let key = match_key(name, category);
        if key.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<(usize, f64, MatchKind)> = match index.by_key.get(&key) {
            Some(exact) => exact.iter().map(|&i| (i, 1.0, MatchKind::Exact)).collect(),
            None => index
                .keys
                .iter()
                .enumerate()
                .map(|(i, k)| (i, strsim::jaro_winkler(&key, k)))
                .filter(|&(_, score)| score >= self.options.fuzzy_threshold)
                .map(|(i, score)| (i, score, MatchKind::Fuzzy))
                .collect(),
        };

        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| compare_ids(&index.records[a.0].id, &index.records[b.0].id))
                .then_with(|| a.0.cmp(&b.0))
        });

        let top_ties = hits
            .first()
            .map_or(0, |top| hits.iter().take_while(|h| h.1 == top.1).count());
        hits.truncate(self.options.max_candidates.max(top_ties));

        debug!("lookup {category} '{name}' (key '{key}'): {} candidates", hits.len());

        hits.into_iter()
            .map(|(i, score, kind)| Candidate {
                record: &index.records[i],
                score,
                kind,
            })
            .collect()
    }
}

/// Order identifiers numerically when both parse as integers.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
