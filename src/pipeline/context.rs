//! Document context from the header of a concession document.
//!
//! Concession letters open with the applicant and the municipality the
//! application concerns:
//!
//! ```text
//! Agder Energi Vannkraft AS — Postboks 603
//! Søknad om utbygging av Vassfossen kraftverk i Froland kommune i Agder fylke
//! ```
//!
//! The context is recorded in the report and fills in `eier` on power
//! plant tags that have none. It never affects which record a tag matches.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lines searched for the municipality.
const MUNICIPALITY_LINES: usize = 30;

/// Lines searched for the owner.
const OWNER_LINES: usize = 10;

/// A place name: one to three capitalised words.
const PLACE: &str = r"(\p{Lu}[\p{L}-]*(?:[ \t]+\p{Lu}[\p{L}-]*){0,2})";

/// Municipality patterns, most specific first.
static MUNICIPALITY: Lazy<Vec<Regex>> = Lazy::new(|| {
    let kommune = "(?:kommune|Kommune|KOMMUNE)";
    let fylke = "(?:[ \t]+(?:fylke|Fylke|FYLKE))?";
    [
        format!(r"\bi[ \t]+{PLACE}[ \t]+{kommune}[ \t]+i[ \t]+{PLACE}{fylke}"),
        format!(r"\bi[ \t]+{PLACE}[ \t]+{kommune}\b"),
        format!(r"(?:Kommune|KOMMUNE):[ \t]*{PLACE}"),
        format!(r"{PLACE}[ \t]+{kommune}\b"),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// A line naming a company, ending in its legal form.
static OWNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*([\p{L}\p{N}][\p{L}\p{N}_ .&;-]*?[ \t](?:ASA|AS|ANS|SA|BA|KS|DA|FKF|IKF|KF|HF|SF|RF|OF|NUF))[ \t]*(?:—|-[ \t]|Postboks|,|$)",
    )
    .unwrap()
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Where a document is from and who wrote it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kommune: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fylke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eier: Option<String>,
}

impl DocumentContext {
    /// Read the context from the start of `text` (markers already replaced
    /// by their mentions).
    pub fn extract(text: &str) -> Self {
        let header: Vec<&str> = text.lines().take(MUNICIPALITY_LINES).map(str::trim).collect();
        let joined = WHITESPACE.replace_all(&header.join(" "), " ").into_owned();

        let mut context = Self::default();
        if let Some(caps) = MUNICIPALITY.iter().find_map(|re| re.captures(&joined)) {
            context.kommune = caps.get(1).map(|m| place_name(m.as_str()));
            context.fylke = caps.get(2).map(|m| place_name(m.as_str()));
        }

        let first_lines = header.iter().take(OWNER_LINES).copied().collect::<Vec<_>>().join("\n");
        context.eier = OWNER
            .captures(&first_lines)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string());

        debug!(
            "Document context: kommune={:?} fylke={:?} eier={:?}",
            context.kommune, context.fylke, context.eier
        );
        context
    }

    pub fn is_empty(&self) -> bool {
        self.kommune.is_none() && self.fylke.is_none() && self.eier.is_none()
    }
}

/// Title-case words written in capitals ("FROLAND" → "Froland").
fn place_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            if word.chars().any(char::is_lowercase) {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Agder Energi Vannkraft AS — Postboks 603, 4809 Arendal\n\
Norges vassdrags- og energidirektorat\n\
\n\
Søknad om tillatelse til utbygging av Vassfossen kraftverk\n\
i Froland kommune i Agder fylke\n\
\n\
Vassfossen kraftverk skal utnytte fallet i Mykleåna.\n";

    #[test]
    fn reads_owner_and_municipality_from_header() {
        let ctx = DocumentContext::extract(HEADER);
        assert_eq!(ctx.eier.as_deref(), Some("Agder Energi Vannkraft AS"));
        assert_eq!(ctx.kommune.as_deref(), Some("Froland"));
        assert_eq!(ctx.fylke.as_deref(), Some("Agder"));
    }

    #[test]
    fn capitalised_header_is_title_cased() {
        let ctx = DocumentContext::extract("FROLAND KOMMUNE\nPlanutvalget\n");
        assert_eq!(ctx.kommune.as_deref(), Some("Froland"));
        assert!(ctx.fylke.is_none());
        assert!(ctx.eier.is_none());
    }

    #[test]
    fn labelled_municipality_is_found() {
        let ctx = DocumentContext::extract("Sak 12/345\nKommune: Luster\n");
        assert_eq!(ctx.kommune.as_deref(), Some("Luster"));
    }

    #[test]
    fn owner_below_the_first_lines_is_ignored() {
        let mut text = "linje\n".repeat(OWNER_LINES);
        text.push_str("Statkraft Energi AS\n");
        assert!(DocumentContext::extract(&text).eier.is_none());
    }

    #[test]
    fn ordinary_prose_has_no_context() {
        let ctx = DocumentContext::extract("Vannføringen økes om våren, og da stiger magasinet.\n");
        assert!(ctx.is_empty());
    }
}
