//! Prompts for the entity-tagging completion call.
//!
//! Centralising the prompt text here keeps the tagger free of wording and
//! lets tests inspect exactly what the model is told.
//!
//! The instructions are Norwegian because the documents are: the model is
//! asked to return the input verbatim with each named entity replaced by a
//! marker such as `<elv navn="Fortunselva">`. The system prompt is derived
//! from the [`CategorySchema`], so disabling a category also removes it from
//! the instructions. Callers can replace the whole system prompt via
//! [`crate::config::PipelineConfig::system_prompt`].

use crate::category::CategorySchema;

/// Line placed before the document in the user message.
pub const DOCUMENT_START: &str = "--- START OF MARKDOWN CONTENT ---";

/// Line placed after the document in the user message.
pub const DOCUMENT_END: &str = "--- END OF MARKDOWN CONTENT ---";

const PREAMBLE: &str = "Du er en ekspert i å identifisere viktige entiteter i markdown-dokumenter om vassdragskonsesjoner.";

const RULES: &str = r#"Du skal returnere ALL tekst du mottar, uendret, men erstatte hver navngitt entitet med en tag.
Eksempel: "Dette er en konsesjon for Luster kraftverk til å drive i Fortunselva." blir til "Dette er en konsesjon for <kraftverk navn="Luster kraftverk"> til å drive i <elv navn="Fortunselva">."

Presiseringer:
- Tagg bare navngitte entiteter. "elva" eller "kraftverket" uten navn skal ikke tagges.
- Attributtet navn skal inneholde navnet slik det står i teksten.
- Står det to entiteter etter hverandre skilt med / er det to tags <..>/<...>.
- En tag skal stå på én linje og avsluttes med >.
- Ikke endre, oversett eller korriger annen tekst, tabeller eller overskrifter.
- Returner KUN den taggede markdown-teksten, uten introduksjon, forklaring eller annen tekst rundt. Ikke pakk inn svaret i ```markdown ... ```."#;

/// System prompt for `schema`.
pub fn build_system_prompt(schema: &CategorySchema) -> String {
    let names: Vec<&str> = schema.categories().iter().map(|c| c.tag()).collect();
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(PREAMBLE);
    prompt.push_str("\nEntitetstyper som skal tagges: ");
    prompt.push_str(&names.join(", "));
    prompt.push_str(".\n\nTags:\n");
    for &category in schema.categories() {
        prompt.push_str(&format!(
            "- <{} navn=\"...\">: {}\n",
            category.tag(),
            category.description()
        ));
    }
    prompt.push('\n');
    prompt.push_str(RULES);
    prompt
}

/// User message wrapping one chunk of the document.
pub fn document_message(content: &str) -> String {
    format!(
        "Her er teksten i markdown-format som du skal tagge på denne måten:\n{DOCUMENT_START}\n{content}\n{DOCUMENT_END}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::EntityCategory;

    #[test]
    fn prompt_lists_every_schema_category() {
        let prompt = build_system_prompt(&CategorySchema::default());
        for c in EntityCategory::ALL {
            assert!(prompt.contains(&format!("<{} navn=", c.tag())), "missing {c}");
        }
        assert!(prompt.contains("Fortunselva"));
    }

    #[test]
    fn prompt_omits_disabled_categories() {
        let prompt = build_system_prompt(&CategorySchema::new([EntityCategory::River]));
        assert!(prompt.contains("<elv navn="));
        assert!(!prompt.contains("<dam navn="));
    }

    #[test]
    fn document_is_delimited() {
        let msg = document_message("Tekst");
        assert!(msg.contains(&format!("{DOCUMENT_START}\nTekst\n{DOCUMENT_END}")));
    }
}
