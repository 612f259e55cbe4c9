// tests/pipeline_scenarios.rs
//
// End-to-end runs of the trust pipeline against fake LLM/search clients.

mod common;

use common::*;
use event_verifier::agent::SearchHit;
use event_verifier::quality::QualityScorer;
use event_verifier::{Confidence, FailurePolicy};
use std::sync::Arc;

fn titles(events: &[event_verifier::VerifiedEvent]) -> Vec<String> {
    events.iter().map(|e| e.event.title.clone()).collect()
}

#[tokio::test]
async fn scenario_trusted_without_description_skips_everything() {
    let llm = Arc::new(FakeLlm::answering(CONFIRMED));
    let search = Arc::new(FakeSearch::new(SearchMode::Empty));
    let (p, _) = pipeline(&test_config(), llm.clone(), search.clone());

    let mut ev = candidate("Arena Show", "ticketmaster");
    ev.description.clear();
    let out = p.run(vec![ev], None).await;

    assert_eq!(out.events.len(), 1);
    assert!(out.events[0].verification.is_none());
    assert_eq!(out.report.verifier.skipped_trusted, 1);
    assert_eq!(out.report.verifier.checked, 0);
    // Never reached the quality gate.
    assert_eq!(out.report.quality.passed + out.report.quality.rejected, 0);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn scenario_happy_hour_from_deny_listed_source_never_reaches_llm() {
    let llm = Arc::new(FakeLlm::answering(CONFIRMED));
    let search = Arc::new(FakeSearch::new(SearchMode::Empty));
    let (p, _) = pipeline(&test_config(), llm.clone(), search.clone());

    let ev = candidate("Happy Hour at Spillover", "recurring_templates");
    assert_eq!(p.scorer().score_event(&ev), 0);

    let out = p.run(vec![ev], None).await;
    assert!(out.events.is_empty());
    assert_eq!(out.report.quality.rejected, 1);
    assert_eq!(llm.calls(), 0);
    assert_eq!(search.calls(), 0);
}

#[tokio::test]
async fn scenario_named_performer_with_long_description_scores_95() {
    let llm = Arc::new(FakeLlm::answering(CONFIRMED));
    let (p, _) = pipeline(
        &test_config(),
        llm,
        Arc::new(FakeSearch::new(SearchMode::Empty)),
    );

    let mut ev = candidate("Jazz Night with the Miami Quartet", "local blog");
    ev.description = "a".repeat(150);
    let scorer: &QualityScorer = p.scorer();
    let q = scorer.score_explained(&ev);
    assert_eq!(q.tier, Confidence::Medium);
    assert_eq!(q.score, 95);
}

#[tokio::test]
async fn scenario_second_run_within_ttl_is_all_cache_hits() {
    let llm = Arc::new(FakeLlm::answering(CONFIRMED));
    let search = Arc::new(FakeSearch::new(SearchMode::Hits(vec![SearchHit {
        title: "Ball & Chain events".into(),
        snippet: "Salsa social every Saturday".into(),
    }])));
    let (p, _) = pipeline(&test_config(), llm.clone(), search.clone());

    let first = p.run(medium_batch(20), None).await;
    assert_eq!(first.report.verifier.checked, 20);
    assert_eq!(first.report.verifier.cache_hits, 0);
    let llm_calls = llm.calls();
    let searches = search.calls();
    assert_eq!(searches, 20);

    let second = p.run(medium_batch(20), None).await;
    assert_eq!(second.report.verifier.cache_hits, 20);
    assert_eq!(second.report.verifier.verified, 20);
    assert_eq!(llm.calls(), llm_calls);
    assert_eq!(search.calls(), searches);
    assert_eq!(first.events, second.events);
}

#[tokio::test]
async fn scenario_search_timeout_keeps_candidate_unverified() {
    let llm = Arc::new(FakeLlm::with(|_| NO_CORROBORATION.to_string()));
    let search = Arc::new(FakeSearch::new(SearchMode::Timeout));
    let (p, _) = pipeline(&test_config(), llm, search.clone());

    let out = p.run(vec![candidate("Rooftop Cumbia", "local blog")], None).await;

    assert_eq!(search.calls(), 1);
    assert_eq!(out.events.len(), 1);
    let v = out.events[0].verification.as_ref().unwrap();
    assert!(!v.verified);
    assert!(!v.cancelled);
    assert_eq!(out.report.verifier.unverified, 1);
    assert_eq!(out.report.verifier.removed, 0);
    assert_eq!(out.report.verifier.agent_failures, 0);
}

#[tokio::test]
async fn only_high_confidence_cancellations_are_removed() {
    let llm = Arc::new(FakeLlm::with(|prompt| {
        if prompt.contains("Gone Show") {
            CANCELLED_HIGH.to_string()
        } else if prompt.contains("Rumored Show") {
            CANCELLED_MEDIUM.to_string()
        } else {
            NO_CORROBORATION.to_string()
        }
    }));
    let (p, _) = pipeline(
        &test_config(),
        llm,
        Arc::new(FakeSearch::new(SearchMode::Empty)),
    );

    let out = p
        .run(
            vec![
                candidate("Gone Show", "local blog"),
                candidate("Rumored Show", "local blog"),
                candidate("Quiet Show", "local blog"),
            ],
            None,
        )
        .await;

    let r = out.report.verifier;
    assert_eq!(r.cancelled, 2);
    assert_eq!(r.removed, 1);
    assert_eq!(titles(&out.events), vec!["Rumored Show", "Quiet Show"]);
}

#[tokio::test]
async fn accounting_identity_and_output_order() {
    let llm = Arc::new(FakeLlm::answering(CONFIRMED));
    let (p, _) = pipeline(
        &test_config(),
        llm,
        Arc::new(FakeSearch::new(SearchMode::Empty)),
    );

    let mut input = vec![
        candidate("Blog 0", "local blog"),
        candidate("Arena 1", "ticketmaster"),
        candidate("Blog 2", "local blog"),
        candidate("Blog 3", "local blog"),
        candidate("Club 4", "RA"),
        candidate("Blog 5", "local blog"),
    ];
    input.push(candidate("Blog 6", "local blog"));

    let out = p.verify_event_batch(input, 3).await;
    let r = out.report;
    assert_eq!(r.total, 7);
    assert_eq!(r.skipped_trusted, 2);
    assert_eq!(r.checked, 3);
    assert_eq!(r.deferred, 2);
    assert_eq!(r.checked + r.skipped_trusted + r.deferred, r.total);
    assert_eq!(
        titles(&out.events),
        vec!["Arena 1", "Club 4", "Blog 0", "Blog 2", "Blog 3", "Blog 5", "Blog 6"]
    );
    // Deferred items pass through untouched.
    assert!(out.events[5].verification.is_none());
    assert!(out.events[6].verification.is_none());
}

#[tokio::test]
async fn zero_budget_defers_everything() {
    let llm = Arc::new(FakeLlm::answering(CONFIRMED));
    let (p, _) = pipeline(
        &test_config(),
        llm.clone(),
        Arc::new(FakeSearch::new(SearchMode::Empty)),
    );
    let out = p.run(medium_batch(4), Some(0)).await;
    assert_eq!(out.report.verifier.deferred, 4);
    assert_eq!(out.report.verifier.checked, 0);
    assert_eq!(out.events.len(), 4);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn unparseable_verdict_fails_open_and_is_not_cached() {
    let llm = Arc::new(FakeLlm::answering("I think this event is probably real."));
    let (p, cache) = pipeline(
        &test_config(),
        llm.clone(),
        Arc::new(FakeSearch::new(SearchMode::Empty)),
    );

    let out = p.run(vec![candidate("Mystery Set", "local blog")], None).await;
    let v = out.events[0].verification.as_ref().unwrap();
    assert!(v.verified);
    assert_eq!(v.confidence, Confidence::Low);
    assert_eq!(v.reasoning, "parse error");
    assert_eq!(out.report.verifier.agent_failures, 1);
    assert_eq!(cache.stats().entries, 0);

    // Retried next run.
    let before = llm.calls();
    let _ = p.run(vec![candidate("Mystery Set", "local blog")], None).await;
    assert!(llm.calls() > before);
}

#[tokio::test]
async fn provider_outage_under_closed_policy_keeps_candidates_unverified() {
    let mut cfg = test_config();
    cfg.failure_policy = FailurePolicy::Closed;
    let (p, _) = pipeline(
        &cfg,
        Arc::new(BrokenLlm),
        Arc::new(FakeSearch::new(SearchMode::Empty)),
    );

    let out = p.run(medium_batch(3), None).await;
    assert_eq!(out.events.len(), 3);
    assert_eq!(out.report.verifier.unverified, 3);
    assert_eq!(out.report.verifier.agent_failures, 3);
    assert_eq!(out.report.verifier.removed, 0);
    for e in &out.events {
        let v = e.verification.as_ref().unwrap();
        assert!(!v.verified);
        assert_eq!(v.reasoning, "provider error");
    }
}

#[tokio::test]
async fn batch_id_is_reported_and_stable() {
    let llm = Arc::new(FakeLlm::answering(CONFIRMED));
    let (p, _) = pipeline(
        &test_config(),
        llm,
        Arc::new(FakeSearch::new(SearchMode::Empty)),
    );
    let a = p.run(medium_batch(2), None).await;
    let b = p.run(medium_batch(2), None).await;
    assert_eq!(a.report.batch_id.len(), 12);
    assert_eq!(a.report.batch_id, b.report.batch_id);
}
