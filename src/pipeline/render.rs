//! Rendering resolved tags back into document text.
//!
//! A resolved tag uses the same grammar as a marker, so smart documents
//! parse with [`crate::pipeline::markers`] and downstream renderers only
//! need one tag syntax:
//!
//! ```text
//! <elv navn="Glomma" resolution="matched-exact" ref_id="2" ref_navn="Glomma" score="1.000" vassdragNr="002.Z">
//! <innsjø navn="Langvatnet" resolution="ambiguous" candidates="387,1201">
//! <elv navn="Fjellbekken" resolution="unresolved">
//! <elv navn="Glåma" resolution="matched-fuzzy" ref_id="2" ref_navn="Glomma" score="0.858" hints="kommune" kommune="Elverum" vassdragNr="002.Z">
//! ```
//!
//! Resolver-owned attributes come first in a fixed order; the rest follow
//! sorted by key.

use crate::category::NAME_ATTRIBUTE;
use crate::output::{ResolvedTag, HINTS_ATTRIBUTE, RESERVED_ATTRIBUTES};
use std::collections::BTreeMap;

/// Render one resolved tag.
pub fn render_tag(tag: &ResolvedTag) -> String {
    let mut out = String::with_capacity(64 + tag.surface.len());
    out.push('<');
    out.push_str(tag.category.tag());
    push_attr(&mut out, NAME_ATTRIBUTE, &tag.surface);
    push_attr(&mut out, "resolution", tag.status.as_str());

    if let Some(ref id) = tag.record_id {
        push_attr(&mut out, "ref_id", id);
    }
    if let Some(ref name) = tag.matched_name {
        push_attr(&mut out, "ref_navn", name);
    }
    if let Some(score) = tag.score {
        push_attr(&mut out, "score", &format!("{score:.3}"));
    }
    if !tag.candidate_ids.is_empty() {
        push_attr(&mut out, "candidates", &tag.candidate_ids.join(","));
    }
    let hint_keys = carried_hint_keys(tag);
    if !hint_keys.is_empty() {
        push_attr(&mut out, HINTS_ATTRIBUTE, &hint_keys.join(","));
    }

    for (key, value) in merged_attributes(tag) {
        push_attr(&mut out, key, value);
    }
    out.push('>');
    out
}

/// Marker hints overlaid by record attributes; resolver-owned keys dropped.
fn merged_attributes(tag: &ResolvedTag) -> BTreeMap<&str, &str> {
    tag.hints
        .iter()
        .chain(tag.attributes.iter())
        .filter(|(k, _)| !RESERVED_ATTRIBUTES.contains(&k.as_str()))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

/// Keys of marker hints still visible on a matched tag.
///
/// A matched tag mixes hints with record attributes. Listing the hint keys
/// lets a later resolution tell them apart. Unmatched tags carry no record
/// attributes, so everything on them is a hint and nothing is listed.
fn carried_hint_keys(tag: &ResolvedTag) -> Vec<&str> {
    if tag.record_id.is_none() {
        return Vec::new();
    }
    tag.hints
        .keys()
        .filter(|k| !RESERVED_ATTRIBUTES.contains(&k.as_str()) && !tag.attributes.contains_key(*k))
        .map(String::as_str)
        .collect()
}

fn push_attr(out: &mut String, key: &str, value: &str) {
    out.push_str(&format!(" {key}=\"{}\"", escape_attribute(value)));
}

/// Escape a value for use inside `"…"`.
///
/// `&` first so existing references are not double-decoded; line breaks
/// become spaces since a marker never spans lines.
pub fn escape_attribute(value: &str) -> String {
    let single_line: String = value
        .trim()
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    single_line
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::EntityCategory;
    use crate::output::ResolutionStatus;

    fn tag(status: ResolutionStatus) -> ResolvedTag {
        ResolvedTag {
            marker_index: 0,
            surface: "Glomma".into(),
            category: EntityCategory::River,
            status,
            record_id: None,
            matched_name: None,
            score: None,
            candidate_ids: vec![],
            attributes: BTreeMap::new(),
            hints: BTreeMap::new(),
            start: 0,
            end: 0,
        }
    }

    #[test]
    fn renders_match_with_sorted_attributes() {
        let mut t = tag(ResolutionStatus::MatchedFuzzy);
        t.record_id = Some("2".into());
        t.matched_name = Some("Glomma".into());
        t.score = Some(0.857_83);
        t.attributes.insert("vassdragNr".into(), "002.Z".into());
        t.attributes.insert("kommune".into(), "Fredrikstad".into());
        t.hints.insert("kommune".into(), "Sarpsborg".into());
        t.hints.insert("resolution".into(), "stale".into());
        assert_eq!(
            render_tag(&t),
            "<elv navn=\"Glomma\" resolution=\"matched-fuzzy\" ref_id=\"2\" ref_navn=\"Glomma\" \
             score=\"0.858\" kommune=\"Fredrikstad\" vassdragNr=\"002.Z\">"
        );
    }

    #[test]
    fn lists_hint_keys_on_matched_tags_only() {
        let mut t = tag(ResolutionStatus::MatchedExact);
        t.record_id = Some("2".into());
        t.matched_name = Some("Glomma".into());
        t.score = Some(1.0);
        t.attributes.insert("vassdragNr".into(), "002.Z".into());
        t.attributes.insert("kommune".into(), "Fredrikstad".into());
        t.hints.insert("kommune".into(), "Sarpsborg".into());
        t.hints.insert("eier".into(), "Glommens og Laagens Brukseierforening".into());
        assert_eq!(
            render_tag(&t),
            "<elv navn=\"Glomma\" resolution=\"matched-exact\" ref_id=\"2\" ref_navn=\"Glomma\" \
             score=\"1.000\" hints=\"eier\" eier=\"Glommens og Laagens Brukseierforening\" \
             kommune=\"Fredrikstad\" vassdragNr=\"002.Z\">"
        );

        let mut u = tag(ResolutionStatus::Unresolved);
        u.hints.insert("kommune".into(), "Vik".into());
        assert_eq!(render_tag(&u), "<elv navn=\"Glomma\" resolution=\"unresolved\" kommune=\"Vik\">");
    }

    #[test]
    fn renders_ambiguous_candidates() {
        let mut t = tag(ResolutionStatus::Ambiguous);
        t.category = EntityCategory::Lake;
        t.surface = "Langvatnet".into();
        t.candidate_ids = vec!["387".into(), "1201".into()];
        assert_eq!(
            render_tag(&t),
            "<innsjø navn=\"Langvatnet\" resolution=\"ambiguous\" candidates=\"387,1201\">"
        );
    }

    #[test]
    fn escapes_values() {
        assert_eq!(escape_attribute("A & \"B\" <C>"), "A &amp; &quot;B&quot; &lt;C&gt;");
        assert_eq!(escape_attribute(" linje\nto "), "linje to");
    }

    #[test]
    fn escaped_values_parse_back() {
        let raw = "Dam \"Nord\" & <Sør>";
        let escaped = escape_attribute(raw);
        assert_eq!(crate::pipeline::markers::unescape(&escaped), raw);
    }
}
