//! Resolving markers against the reference catalog.
//!
//! Every marker becomes exactly one resolved tag, in document order, with
//! one of four statuses:
//!
//! | candidates                         | status          |
//! |------------------------------------|-----------------|
//! | none                               | `unresolved`    |
//! | one at the top score, exact        | `matched-exact` |
//! | one at the top score, fuzzy        | `matched-fuzzy` |
//! | several tied at the top score      | `ambiguous`     |
//!
//! Resolution never fails: misses and ties are outcomes, reported in the
//! [`ResolutionReport`] for review.

use crate::catalog::{Candidate, Catalog, MatchKind};
use crate::category::EntityCategory;
use crate::output::{
    ProblemMarker, ResolutionReport, ResolutionStatus, ResolvedTag, SmartDocument, StatusCounts,
    HINTS_ATTRIBUTE, RESERVED_ATTRIBUTES,
};
use crate::pipeline::context::DocumentContext;
use crate::pipeline::markers::{Marker, TaggedDocument};
use crate::pipeline::render::render_tag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

const OWNER_ATTRIBUTE: &str = "eier";

/// Smart document plus its report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub document: SmartDocument,
    pub report: ResolutionReport,
}

/// Resolves markers against a borrowed catalog.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    catalog: &'a Catalog,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Replace every marker in `tagged` with a resolved tag.
    pub fn resolve(&self, tagged: &TaggedDocument) -> Resolution {
        let context = DocumentContext::extract(&tagged.plain_text());
        let source = tagged.text();
        let mut text = String::with_capacity(source.len() + tagged.markers().len() * 48);
        let mut tags = Vec::with_capacity(tagged.markers().len());
        let mut counts = StatusCounts::default();
        let mut problems = Vec::new();
        let mut pos = 0;

        for marker in tagged.markers() {
            text.push_str(&source[pos..marker.start]);
            let mut tag = self.resolve_marker(marker);
            fill_owner(&mut tag, &context);
            tag.start = text.len();
            text.push_str(&render_tag(&tag));
            tag.end = text.len();
            pos = marker.end;

            counts.record(tag.status);
            if !tag.status.is_match() {
                problems.push(ProblemMarker {
                    index: marker.index,
                    surface: marker.surface.clone(),
                    category: marker.category,
                    status: tag.status,
                    candidate_ids: tag.candidate_ids.clone(),
                    line: marker.line,
                });
            }
            tags.push(tag);
        }
        text.push_str(&source[pos..]);

        info!(
            "Resolved {} markers: {} exact, {} fuzzy, {} ambiguous, {} unresolved",
            tags.len(),
            counts.matched_exact,
            counts.matched_fuzzy,
            counts.ambiguous,
            counts.unresolved
        );

        Resolution {
            report: ResolutionReport {
                total_markers: tags.len(),
                counts,
                problems,
                warnings: tagged.warnings().to_vec(),
                context,
            },
            document: SmartDocument { text, tags },
        }
    }

    /// Decide one marker. Spans are filled in by the caller.
    pub fn resolve_marker(&self, marker: &Marker) -> ResolvedTag {
        let candidates = self.catalog.lookup(&marker.surface, marker.category);
        let hints = carried_hints(marker);

        let mut tag = ResolvedTag {
            marker_index: marker.index,
            surface: marker.surface.clone(),
            category: marker.category,
            status: ResolutionStatus::Unresolved,
            record_id: None,
            matched_name: None,
            score: None,
            candidate_ids: Vec::new(),
            attributes: BTreeMap::new(),
            hints,
            start: 0,
            end: 0,
        };

        let top = top_tier(&candidates);
        match top {
            [] => {}
            [only] => {
                tag.status = match only.kind {
                    MatchKind::Exact => ResolutionStatus::MatchedExact,
                    MatchKind::Fuzzy => ResolutionStatus::MatchedFuzzy,
                };
                tag.record_id = Some(only.record.id.clone());
                tag.matched_name = Some(only.record.name.clone());
                tag.score = Some(only.score);
                tag.attributes = only.record.attributes.clone();
            }
            tied => {
                tag.status = ResolutionStatus::Ambiguous;
                tag.candidate_ids = tied.iter().map(|c| c.record.id.clone()).collect();
            }
        }

        debug!(
            "marker {} {} '{}' → {} ({} candidates)",
            marker.index,
            marker.category,
            marker.surface,
            tag.status,
            candidates.len()
        );
        tag
    }
}

/// Give a power plant tag the document owner when neither the marker nor
/// the matched record names one.
fn fill_owner(tag: &mut ResolvedTag, context: &DocumentContext) {
    let Some(ref eier) = context.eier else { return };
    if tag.category != EntityCategory::Facility
        || tag.hints.contains_key(OWNER_ATTRIBUTE)
        || tag.attributes.contains_key(OWNER_ATTRIBUTE)
    {
        return;
    }
    tag.hints.insert(OWNER_ATTRIBUTE.to_string(), eier.clone());
}

/// Marker attributes that are hints rather than resolver output.
///
/// A matched tag from an earlier resolution also carries its record's
/// attributes; only the keys listed under `hints` came from the marker.
fn carried_hints(marker: &Marker) -> BTreeMap<String, String> {
    let attrs = &marker.attributes;
    let previous = attrs.get("resolution").map(String::as_str);
    let listed: Option<Vec<&str>> = match previous {
        Some(status) if status.starts_with("matched") => Some(
            attrs
                .get(HINTS_ATTRIBUTE)
                .map(|keys| keys.split(',').map(str::trim).collect())
                .unwrap_or_default(),
        ),
        _ => None,
    };
    attrs
        .iter()
        .filter(|(k, _)| !RESERVED_ATTRIBUTES.contains(&k.as_str()))
        .filter(|(k, _)| listed.as_ref().map_or(true, |keys| keys.contains(&k.as_str())))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// The leading run of candidates sharing the best score.
fn top_tier<'c, 'r>(candidates: &'c [Candidate<'r>]) -> &'c [Candidate<'r>] {
    let Some(first) = candidates.first() else {
        return candidates;
    };
    let n = candidates.iter().take_while(|c| c.score == first.score).count();
    &candidates[..n]
}
