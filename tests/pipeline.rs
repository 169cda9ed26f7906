//! Integration tests for the file-level pipeline.
//!
//! A scripted completion service stands in for the LLM so these run
//! offline. It replaces known names with markers and refuses any document
//! containing "AVVIS".

use async_trait::async_trait;
use smartdok::{
    process_batch, resolve_file, Catalog, Completion, CompletionRequest, CompletionService, EntityCategory,
    MatchOptions, Pipeline, PipelineConfig, ReferenceRecord, ResolutionReport, ServiceError, SmartDocError,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedTagger {
    calls: AtomicUsize,
}

const NAMES: &[(&str, &str)] = &[
    ("Glomma", "elv"),
    ("Glåma", "elv"),
    ("Langvatnet", "innsjø"),
    ("Fjellbekken", "elv"),
    ("Luster kraftverk", "kraftverk"),
    // Not a category; the marker is malformed.
    ("Galdhøpiggen", "fjell"),
];

#[async_trait]
impl CompletionService for ScriptedTagger {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.document.contains("AVVIS") {
            return Err(ServiceError::Rejected {
                service: "scripted".into(),
                detail: "content policy".into(),
            });
        }
        let mut text = request.document.clone();
        for (name, tag) in NAMES {
            text = text.replace(name, &format!("<{tag} navn=\"{name}\">"));
        }
        Ok(Completion {
            text,
            input_tokens: 100,
            output_tokens: 120,
        })
    }
}

fn record(id: &str, name: &str, category: EntityCategory) -> ReferenceRecord {
    ReferenceRecord {
        id: id.into(),
        name: name.into(),
        category,
        attributes: BTreeMap::new(),
    }
}

fn catalog() -> Catalog {
    let mut glomma = record("2", "Glomma", EntityCategory::River);
    glomma.attributes.insert("vassdragNr".into(), "002.Z".into());
    Catalog::from_records(
        vec![
            glomma,
            record("1201", "Langvatnet", EntityCategory::Lake),
            record("387", "Langvatnet", EntityCategory::Lake),
            record("577", "Luster", EntityCategory::Facility),
        ],
        MatchOptions::default(),
    )
}

fn pipeline(config: PipelineConfig) -> (Pipeline, Arc<ScriptedTagger>) {
    let service = Arc::new(ScriptedTagger::default());
    let pipeline = Pipeline::new(config, service.clone(), Arc::new(catalog()));
    (pipeline, service)
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn read_report(path: &Path) -> ResolutionReport {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

const DOCUMENT: &str = "Søknad om regulering av Glomma.\n\n\
Tappingen fra Langvatnet skal økes, og Fjellbekken overføres.\n\n\
Luster kraftverk får ny turbin. Glåma nevnes også.\n";

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn process_file_writes_all_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "konsesjon.md", DOCUMENT);
    let (pipeline, _) = pipeline(PipelineConfig::default());

    let summary = pipeline.process_file(&input).await.unwrap();

    assert_eq!(summary.smart_document, dir.path().join("konsesjon.nsd"));
    assert_eq!(summary.tagged.as_deref(), Some(dir.path().join("konsesjon.sd").as_path()));
    assert!(!summary.reused_tagging);

    let counts = &summary.report.counts;
    assert_eq!(summary.report.total_markers, 5);
    assert_eq!(counts.matched_exact, 2, "Glomma and Luster kraftverk");
    assert_eq!(counts.matched_fuzzy, 1, "Glåma");
    assert_eq!(counts.ambiguous, 1, "Langvatnet");
    assert_eq!(counts.unresolved, 1, "Fjellbekken");
    assert_eq!(summary.report.problems.len(), 2);

    let nsd = std::fs::read_to_string(&summary.smart_document).unwrap();
    assert!(nsd.contains(r#"<elv navn="Glomma" resolution="matched-exact" ref_id="2""#));
    assert!(nsd.contains(r#"vassdragNr="002.Z""#));
    assert!(nsd.contains(r#"candidates="387,1201""#));
    assert!(nsd.contains(r#"og <elv navn="Fjellbekken" resolution="unresolved"> overføres"#));

    let sd = std::fs::read_to_string(dir.path().join("konsesjon.sd")).unwrap();
    assert!(sd.contains(r#"regulering av <elv navn="Glomma">."#));
    assert!(!sd.contains("resolution="));

    let report = read_report(&summary.report_path);
    assert_eq!(report, summary.report);
}

#[tokio::test]
async fn existing_tagging_is_reused_unless_forced() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "dok.md", DOCUMENT);

    let (first, service) = pipeline(PipelineConfig::default());
    first.process_file(&input).await.unwrap();
    let calls_after_first = service.calls.load(Ordering::SeqCst);
    assert!(calls_after_first > 0);

    let summary = first.process_file(&input).await.unwrap();
    assert!(summary.reused_tagging);
    assert_eq!(service.calls.load(Ordering::SeqCst), calls_after_first);
    assert_eq!(summary.report.total_markers, 5);

    let forced = PipelineConfig::builder().force(true).build().unwrap();
    let (second, service) = pipeline(forced);
    let summary = second.process_file(&input).await.unwrap();
    assert!(!summary.reused_tagging);
    assert!(service.calls.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn marker_warnings_survive_reuse_and_resolve_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "fjell.md", "Utsikt mot Galdhøpiggen fra Glomma.");
    let (pipeline, service) = pipeline(PipelineConfig::default());

    let fresh = pipeline.process_file(&input).await.unwrap();
    assert_eq!(fresh.report.warnings.len(), 1);
    let sd = std::fs::read_to_string(dir.path().join("fjell.sd")).unwrap();
    assert!(sd.contains(r#"<fjell navn="Galdhøpiggen">"#), "got {sd}");

    let calls = service.calls.load(Ordering::SeqCst);
    let reused = pipeline.process_file(&input).await.unwrap();
    assert!(reused.reused_tagging);
    assert_eq!(service.calls.load(Ordering::SeqCst), calls);
    assert_eq!(reused.report.warnings, fresh.report.warnings);

    let resolved = resolve_file(dir.path().join("fjell.sd"), &catalog(), &PipelineConfig::default())
        .await
        .unwrap();
    assert_eq!(resolved.report.warnings, fresh.report.warnings);
    assert_eq!(resolved.report.counts, fresh.report.counts);
}

#[tokio::test]
async fn failed_tagging_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "avvist.md", "AVVIS: Glomma.");
    let (pipeline, service) = pipeline(PipelineConfig::default());

    let err = pipeline.process_file(&input).await.unwrap_err();

    assert!(matches!(err, SmartDocError::Stage { .. }), "got {err}");
    assert_eq!(service.calls.load(Ordering::SeqCst), 1, "rejections are not retried");
    assert!(!dir.path().join("avvist.sd").exists());
    assert!(!dir.path().join("avvist.report.json").exists());
    assert!(!dir.path().join("avvist.nsd").exists());
}

#[tokio::test]
async fn output_dir_redirects_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "dok.md", "Glomma.");
    let out = dir.path().join("ut");
    let config = PipelineConfig::builder()
        .output_dir(&out)
        .write_intermediate(false)
        .build()
        .unwrap();
    let (pipeline, _) = pipeline(config);

    let summary = pipeline.process_file(&input).await.unwrap();

    assert_eq!(summary.smart_document, out.join("dok.nsd"));
    assert!(out.join("dok.report.json").exists());
    assert!(!out.join("dok.sd").exists());
    assert!(summary.tagged.is_none());
}

#[tokio::test]
async fn resolve_file_needs_no_service() {
    let dir = tempfile::tempdir().unwrap();
    let tagged = write(
        dir.path(),
        "gammel.sd",
        "Reguleringen av <elv navn=\"Glomma\"> og <innsjø navn=\"Mjøsa\">.",
    );
    let config = PipelineConfig::default();

    let summary = resolve_file(&tagged, &catalog(), &config).await.unwrap();

    assert_eq!(summary.report.total_markers, 2);
    assert_eq!(summary.report.counts.matched_exact, 1);
    assert_eq!(summary.report.counts.unresolved, 1);
    assert_eq!(summary.tagging.chunks, 0);
    assert!(dir.path().join("gammel.nsd").exists());
}

#[tokio::test]
async fn malformed_markers_become_warnings() {
    let dir = tempfile::tempdir().unwrap();
    let tagged = write(
        dir.path(),
        "rotete.sd",
        "<elv navn=\"Glomma\"> og <elv navn=\"Otra\" uten slutt\nNeste linje.",
    );

    let summary = resolve_file(&tagged, &catalog(), &PipelineConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.report.total_markers, 1);
    assert_eq!(summary.report.warnings.len(), 1);
    let nsd = std::fs::read_to_string(&summary.smart_document).unwrap();
    assert!(nsd.ends_with(" og Otra\nNeste linje."), "got {nsd}");
}

#[tokio::test]
async fn batch_keeps_going_past_failures() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        write(dir.path(), "a.md", "Glomma."),
        write(dir.path(), "b.md", "AVVIS."),
        write(dir.path(), "c.md", "Langvatnet."),
    ];
    let config = PipelineConfig::builder().concurrency(2).build().unwrap();
    let (pipeline, _) = pipeline(config);

    let outcomes = process_batch(&pipeline, inputs).await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_ok());
    assert!(!outcomes[1].is_ok());
    let c = outcomes[2].result.as_ref().unwrap();
    assert_eq!(c.report.counts.ambiguous, 1);
    assert!(dir.path().join("a.nsd").exists());
    assert!(!dir.path().join("b.nsd").exists());
}
