//! Behavior-driven tests for layout drift detection
//!
//! These tests verify HOW a changed upstream page is caught before it
//! reaches a parser, and what the caller sees when it is.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gleaner_core::{
    DatasetPlan, ErrorCategory, ExecutionContext, FallbackOrchestrator, FeatureWeights, FetchError,
    FingerprintMonitor, GateOutcome, Parsed, Query, RawDocument, Source, ValidationError, Verdict,
    Warning,
};
use support::{document, fast_spec, id, open_store, source, PriceRow, ScriptedFetcher};
use tempfile::tempdir;
use time::macros::date;

const BASELINE_PAGE: &str = r#"<html><head><title>Daily Prices</title></head><body>
<div id="content" class="main"><h1>Corn prices</h1>
<table class="prices"><thead><tr><th>State</th><th>Price</th></tr></thead>
<tbody><tr><td>IA</td><td>4.12</td></tr></tbody></table></div></body></html>"#;

/// Same layout, restyled: every class renamed.
const RESTYLED_PAGE: &str = r#"<html><head><title>Daily Prices</title></head><body>
<div id="content" class="layout"><h1>Corn prices</h1>
<table class="grid"><thead><tr><th>State</th><th>Price</th></tr></thead>
<tbody><tr><td>IA</td><td>4.12</td></tr></tbody></table></div></body></html>"#;

/// What an expired session serves instead of the data.
const LOGIN_PAGE: &str = r#"<html><head><title>Sign in</title></head><body>
<form id="login"><input name="user"><input name="password"><button>Go</button></form>
</body></html>"#;

fn rows() -> Vec<PriceRow> {
    vec![PriceRow::new("IA", 4.12, date!(2025 - 10 - 01))]
}

fn html(page: &str) -> RawDocument {
    RawDocument::from_text(page).with_content_type("text/html; charset=utf-8")
}

/// Parser that ignores the markup and counts its invocations.
fn counting_source(name: &str, priority: u32, page: &str, calls: Arc<AtomicUsize>) -> Source<PriceRow> {
    let parser = move |_: &RawDocument| -> Result<Parsed<PriceRow>, FetchError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Parsed::complete(rows()))
    };
    Source::new(
        fast_spec(name, priority).with_fingerprint_gate(true),
        ScriptedFetcher::always(Ok(html(page))),
        Arc::new(parser),
    )
}

fn corn() -> Query {
    Query::new("corn_prices")
        .expect("query")
        .with_param("crop", "corn")
}

// =============================================================================
// Fingerprint: scoring
// =============================================================================

#[test]
fn a_page_matches_its_own_baseline_exactly() {
    // Given: A baseline captured from a page
    let temp = tempdir().expect("tempdir");
    let monitor = FingerprintMonitor::new(temp.path());
    monitor
        .capture_baseline(&id("usda"), &html(BASELINE_PAGE))
        .expect("capture");

    // When: The same layout is scored, with more data rows
    let longer = BASELINE_PAGE.replace(
        "<tr><td>IA</td><td>4.12</td></tr>",
        "<tr><td>IA</td><td>4.12</td></tr><tr><td>IL</td><td>4.20</td></tr>",
    );
    let fingerprint = monitor
        .score(&id("usda"), &html(&longer))
        .expect("score")
        .expect("baseline exists");

    // Then: Similarity is exactly one and the document proceeds
    assert_eq!(fingerprint.similarity, 1.0);
    assert_eq!(fingerprint.verdict, Verdict::Proceed);
    assert!(fingerprint.baseline_ref.starts_with("usda@"));
}

#[test]
fn a_restyled_page_warns_and_an_unrelated_page_is_rejected() {
    // Given: A baseline
    let temp = tempdir().expect("tempdir");
    let monitor = FingerprintMonitor::new(temp.path());
    monitor
        .capture_baseline(&id("usda"), &html(BASELINE_PAGE))
        .expect("capture");

    // When: A restyled page is gated
    let outcome = monitor
        .gate(&id("usda"), &html(RESTYLED_PAGE))
        .expect("restyle is not fatal");

    // Then: It passes with a warning
    let fingerprint = match outcome {
        GateOutcome::Warn(fingerprint) => fingerprint,
        other => panic!("expected a warning, got {other:?}"),
    };
    assert!((fingerprint.similarity - 0.80).abs() < 1e-9);

    // When: A login page is gated
    let error = monitor
        .gate(&id("usda"), &html(LOGIN_PAGE))
        .expect_err("login page must be rejected");

    // Then: It is rejected as a parse-class error
    assert_eq!(error.category(), ErrorCategory::Parse);
    assert!(matches!(
        error,
        FetchError::FingerprintMismatch { similarity, threshold, .. }
            if similarity < 0.70 && threshold == 0.70
    ));
}

#[test]
fn sources_without_a_baseline_are_not_gated() {
    let temp = tempdir().expect("tempdir");
    let monitor = FingerprintMonitor::new(temp.path());

    let outcome = monitor.gate(&id("conab"), &html(LOGIN_PAGE)).expect("gate");

    assert_eq!(outcome, GateOutcome::NoBaseline);
}

#[test]
fn baselines_persist_and_scoring_never_rewrites_them() {
    // Given: A baseline captured by one monitor
    let temp = tempdir().expect("tempdir");
    FingerprintMonitor::new(temp.path())
        .capture_baseline(&id("usda"), &html(BASELINE_PAGE))
        .expect("capture");
    let file = temp.path().join("usda.json");
    let before = std::fs::read_to_string(&file).expect("baseline file");

    // When: A fresh monitor scores a drifted page against it
    let monitor = FingerprintMonitor::new(temp.path());
    let fingerprint = monitor
        .score(&id("usda"), &html(RESTYLED_PAGE))
        .expect("score")
        .expect("loaded from disk");

    // Then: The baseline on disk is unchanged
    assert_eq!(fingerprint.verdict, Verdict::Warn);
    assert_eq!(std::fs::read_to_string(&file).expect("baseline file"), before);
}

#[test]
fn feature_weights_must_sum_to_one() {
    let temp = tempdir().expect("tempdir");
    let weights = FeatureWeights {
        header_text: 0.5,
        structure_hash: 0.5,
        class_presence: 0.5,
        key_identifiers: 0.0,
        element_counts: 0.0,
    };

    let result = FingerprintMonitor::new(temp.path()).with_weights(weights);

    assert!(matches!(result, Err(ValidationError::InvalidWeights { .. })));
}

// =============================================================================
// Fingerprint: inside the fallback chain
// =============================================================================

#[tokio::test]
async fn moderate_drift_attaches_a_layout_warning() {
    // Given: A gated source whose page was restyled since its baseline
    let (_temp, cache) = open_store().await;
    let baselines = tempdir().expect("tempdir");
    let monitor = Arc::new(FingerprintMonitor::new(baselines.path()));
    monitor
        .capture_baseline(&id("usda"), &html(BASELINE_PAGE))
        .expect("capture");
    let parses = Arc::new(AtomicUsize::new(0));
    let plan = DatasetPlan::new(
        "corn_prices",
        vec![counting_source("usda", 1, RESTYLED_PAGE, parses.clone())],
    )
    .expect("plan");

    // When: The dataset is requested
    let fetched = FallbackOrchestrator::new(cache)
        .with_fingerprint_monitor(monitor)
        .fetch(&plan, &corn(), &ExecutionContext::live())
        .await
        .expect("warned but served");

    // Then: The data is returned with a layout warning
    assert_eq!(fetched.records, rows());
    assert_eq!(parses.load(Ordering::SeqCst), 1);
    assert!(fetched.provenance.warnings.iter().any(|warning| matches!(
        warning,
        Warning::LayoutChange { source, similarity } if *source == id("usda") && *similarity < 0.85
    )));
}

#[tokio::test]
async fn severe_drift_skips_the_parser_and_falls_back() {
    // Given: A gated primary now serving a login page and an ungated secondary
    let (_temp, cache) = open_store().await;
    let baselines = tempdir().expect("tempdir");
    let monitor = Arc::new(FingerprintMonitor::new(baselines.path()));
    monitor
        .capture_baseline(&id("usda"), &html(BASELINE_PAGE))
        .expect("capture");
    let parses = Arc::new(AtomicUsize::new(0));
    let plan = DatasetPlan::new(
        "corn_prices",
        vec![
            counting_source("usda", 1, LOGIN_PAGE, parses.clone()),
            source(fast_spec("conab", 2), ScriptedFetcher::always(Ok(document(&rows())))),
        ],
    )
    .expect("plan");

    // When: The dataset is requested
    let fetched = FallbackOrchestrator::new(cache)
        .with_fingerprint_monitor(monitor)
        .fetch(&plan, &corn(), &ExecutionContext::live())
        .await
        .expect("secondary serves");

    // Then: The primary's parser never ran and the rejection is on record
    assert_eq!(parses.load(Ordering::SeqCst), 0);
    let rejected = &fetched.provenance.attempted[0];
    assert_eq!(rejected.source_name, id("usda"));
    assert_eq!(rejected.error_category, Some(ErrorCategory::Parse));
    assert!(rejected.message.as_deref().is_some_and(|message| message.contains("drifted")));
    assert_eq!(fetched.provenance.selected_source, id("conab"));
    assert!(!fetched.provenance.has_warning("warning.layout_change"));
}
