use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use gridrag_answer::policy::SAFETY_CRITICAL;
use gridrag_answer::{AnswerComposer, RolePolicy};
use gridrag_core::config::ComposerSettings;
use gridrag_core::error::{Backend, CompositionError};
use gridrag_core::traits::Generator;
use gridrag_core::types::{
    Authority, Candidate, Chunk, ChunkMetadata, GenerationRequest, IndexedChunk, Provenance, RiskLevel,
};

/// Generator returning a canned reply and recording what it was asked.
struct ScriptedGenerator {
    reply: std::result::Result<String, String>,
    delay: Duration,
    calls: AtomicUsize,
    last: Mutex<Option<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self { reply: Ok(reply.to_string()), delay: Duration::ZERO, calls: AtomicUsize::new(0), last: Mutex::new(None) })
    }

    fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self { reply: Err(reason.to_string()), delay: Duration::ZERO, calls: AtomicUsize::new(0), last: Mutex::new(None) })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self { reply: Ok("late [S1].".to_string()), delay, calls: AtomicUsize::new(0), last: Mutex::new(None) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> GenerationRequest {
        self.last.lock().unwrap().clone().expect("generator was called")
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(reason) => bail!("{reason}"),
        }
    }
}

fn candidate(seq: u64, title: &str, text: &str, score: f32) -> Candidate {
    candidate_with(seq, title, text, score, Authority::Standard)
}

fn candidate_with(seq: u64, title: &str, text: &str, score: f32, authority: Authority) -> Candidate {
    let source_id = title.to_lowercase().replace(' ', "-");
    let chunk = Chunk {
        id: format!("{source_id}@v1:0"),
        document_id: format!("{source_id}@v1"),
        ordinal: 0,
        text: text.to_string(),
        overlap_bytes: 0,
        token_count: text.split_whitespace().count(),
        metadata: ChunkMetadata {
            source_id,
            title: title.to_string(),
            authority,
            version: 1,
            ingested_at: Utc::now(),
            section: Some("Procedure".to_string()),
            page: Some(4),
            byte_start: 0,
            byte_end: text.len(),
        },
    };
    Candidate {
        chunk: Arc::new(IndexedChunk { seq, chunk }),
        score,
        dense_score: Some(score),
        sparse_score: Some(score),
        provenance: Provenance::Both,
    }
}

fn composer(generator: Arc<ScriptedGenerator>, policy: RolePolicy) -> AnswerComposer {
    AnswerComposer::new(generator, policy, ComposerSettings::default(), Duration::from_secs(5))
}

fn shutdown_candidates() -> Vec<Candidate> {
    vec![
        candidate(0, "Transformer SOP 138", "Open breaker 52A and confirm the trip indication before isolating the 138kV transformer.", 0.92),
        candidate(1, "Grounding Guide", "Apply portable protective grounds on all three phases after verifying de-energization.", 0.81),
    ]
}

#[tokio::test]
async fn nothing_above_threshold_never_calls_generator() {
    let generator = ScriptedGenerator::replying("unused");
    let composer = composer(generator.clone(), RolePolicy::unrestricted());
    let candidates = vec![
        candidate(0, "Recipes", "Bake the bread at 200 degrees.", 0.41),
        candidate(1, "Parking", "Visitor parking is behind building C.", 0.74),
    ];

    let err = composer.compose("What is the quantum chromodynamics coupling constant?", &candidates, "operator").await.unwrap_err();
    match err {
        CompositionError::InsufficientEvidence { best_score } => assert!((best_score - 0.74).abs() < 1e-6),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(generator.calls(), 0);

    let err = composer.compose("anything", &[], "operator").await.unwrap_err();
    assert_eq!(err, CompositionError::InsufficientEvidence { best_score: 0.0 });
}

#[tokio::test]
async fn cited_answer_for_safety_critical_query() {
    let generator = ScriptedGenerator::replying("Open breaker 52A and confirm the trip [S1]. Then apply grounds on all phases [S2].");
    let composer = composer(generator.clone(), RolePolicy::unrestricted());

    let answer = composer.compose("138kV transformer emergency shutdown", &shutdown_candidates(), "engineer").await.unwrap();
    assert_eq!(answer.risk_level, RiskLevel::Critical);
    assert!(answer.warnings.is_empty(), "{:?}", answer.warnings);
    assert_eq!(answer.citations.len(), 2);
    assert_eq!(answer.citations[0].document_title, "Transformer SOP 138");
    assert_eq!(answer.citations[0].section_reference.as_deref(), Some("Procedure, p. 4"));
    assert!((answer.confidence - (0.92 + 0.81) / 2.0).abs() < 1e-5);
    assert_eq!(answer.metadata.candidates_admitted, 2);

    let request = generator.last_request();
    assert!(request.instructions.contains("safety-critical"));
    assert!(request.context.starts_with("[S1] Transformer SOP 138 | Procedure, p. 4 | transformer-sop-138@v1:0"));
    assert!(request.context.contains("[S2] Grounding Guide"));
    assert_eq!(request.query, "138kV transformer emergency shutdown");
}

#[tokio::test]
async fn restricted_role_is_refused_before_generation() {
    let generator = ScriptedGenerator::replying("unused");
    let policy = RolePolicy::unrestricted().with_rule(SAFETY_CRITICAL, ["engineer", "field_tech"]);
    let composer = composer(generator.clone(), policy);

    let err = composer.compose("138kV transformer emergency shutdown", &shutdown_candidates(), "intern").await.unwrap_err();
    assert_eq!(err, CompositionError::AccessDenied { role: "intern".into(), category: SAFETY_CRITICAL.into() });

    // the query gate runs before admission
    let weak = vec![candidate(0, "Notes", "unrelated", 0.1)];
    let err = composer.compose("emergency evacuation route", &weak, "intern").await.unwrap_err();
    assert!(matches!(err, CompositionError::AccessDenied { .. }));
    assert_eq!(generator.calls(), 0);

    assert!(composer.compose("138kV transformer emergency shutdown", &shutdown_candidates(), "Field_Tech").await.is_ok());
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn restricted_evidence_class_is_refused() {
    let generator = ScriptedGenerator::replying("unused");
    let policy = RolePolicy::unrestricted().with_rule("authority.critical", ["engineer"]);
    let composer = composer(generator.clone(), policy);
    let candidates = vec![
        candidate(0, "Spare Parts", "Spare bushings are stored in warehouse 2.", 0.9),
        candidate_with(1, "Protection Settings", "Relay 87T pickup is 0.3 pu.", 0.8, Authority::Critical),
    ];

    let err = composer.compose("where are spare bushings stored", &candidates, "contractor").await.unwrap_err();
    assert_eq!(err, CompositionError::AccessDenied { role: "contractor".into(), category: "authority.critical".into() });
    assert_eq!(generator.calls(), 0);

    // below-threshold evidence is not admitted, so it cannot trigger the gate
    let mut candidates = candidates;
    candidates[1].score = 0.5;
    assert!(composer.compose("where are spare bushings stored", &candidates, "contractor").await.is_ok());
}

#[tokio::test]
async fn fabricated_citation_lowers_confidence() {
    let generator = ScriptedGenerator::replying(
        "Apply grounds on all phases [S2]. Open breaker 52A first [S1]. Torque the lugs to 45 Nm [S9].",
    );
    let composer = composer(generator, RolePolicy::unrestricted());

    let answer = composer.compose("transformer shutdown", &shutdown_candidates(), "engineer").await.unwrap();
    assert!(answer.confidence <= 0.3);
    assert_eq!(answer.warnings.len(), 1);
    assert!(answer.warnings[0].contains("[S9]"));
    let ids: Vec<&str> = answer.citations.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["grounding-guide@v1:0", "transformer-sop-138@v1:0"]);
}

#[tokio::test]
async fn uncited_claim_is_flagged_but_uncertainty_is_not() {
    let generator = ScriptedGenerator::replying("Open breaker 52A [S1]. The lug torque is not specified in the provided context.");
    let composer = composer(generator, RolePolicy::unrestricted());
    let answer = composer.compose("transformer shutdown", &shutdown_candidates(), "engineer").await.unwrap();
    assert!(answer.warnings.is_empty(), "{:?}", answer.warnings);
    assert!((answer.confidence - 0.92).abs() < 1e-5);

    let generator = ScriptedGenerator::replying("Open breaker 52A [S1]. Torque the lugs to 45 Nm.");
    let composer = self::composer(generator, RolePolicy::unrestricted());
    let answer = composer.compose("transformer shutdown", &shutdown_candidates(), "engineer").await.unwrap();
    assert_eq!(answer.warnings.len(), 1);
    assert!(answer.warnings[0].starts_with("uncited claim"));
    assert!(answer.confidence <= 0.3);
}

#[tokio::test]
async fn hedge_word_in_uncited_claim_is_still_flagged() {
    let generator = ScriptedGenerator::replying(
        "Open breaker 52A first [S1]. Insufficient grounding is acceptable for the first ten minutes of the procedure.",
    );
    let composer = composer(generator, RolePolicy::unrestricted());

    let answer = composer.compose("transformer shutdown", &shutdown_candidates(), "engineer").await.unwrap();

    assert_eq!(answer.warnings.len(), 1);
    assert!(answer.warnings[0].starts_with("uncited claim"));
    assert!(answer.confidence <= 0.3);
}

#[tokio::test]
async fn empty_generation_has_zero_confidence() {
    let generator = ScriptedGenerator::replying("   ");
    let composer = composer(generator, RolePolicy::unrestricted());
    let answer = composer.compose("transformer shutdown", &shutdown_candidates(), "engineer").await.unwrap();
    assert_eq!(answer.text, "");
    assert_eq!(answer.confidence, 0.0);
    assert!(answer.citations.is_empty());
    assert!(!answer.warnings.is_empty());
}

#[tokio::test]
async fn context_budget_drops_lowest_ranked_whole_chunks() {
    let generator = ScriptedGenerator::replying("Step one [S1].");
    let settings = ComposerSettings { context_token_budget: 12, ..ComposerSettings::default() };
    let composer = AnswerComposer::new(generator.clone(), RolePolicy::unrestricted(), settings, Duration::from_secs(5));
    let candidates = vec![
        candidate(0, "First", "one two three four five six seven eight", 0.95),
        candidate(1, "Second", "alpha beta gamma delta epsilon zeta", 0.9),
        candidate(2, "Third", "red green", 0.85),
    ];

    let answer = composer.compose("breaker inspection", &candidates, "engineer").await.unwrap();
    let context = generator.last_request().context;
    assert!(context.contains("one two three four five six seven eight"));
    assert!(!context.contains("[S2]"));
    assert!(!context.contains("red green"));
    assert_eq!(answer.metadata.candidates_admitted, 3);

    // an oversized top chunk is kept whole
    let big = "word ".repeat(40);
    let candidates = vec![candidate(0, "Manual", &big, 0.95), candidate(1, "Second", "short text", 0.9)];
    composer.compose("breaker inspection", &candidates, "engineer").await.unwrap();
    let context = generator.last_request().context;
    assert!(context.contains(big.trim()));
    assert!(!context.contains("[S2]"));
}

#[tokio::test]
async fn generator_failures_are_retryable_unavailability() {
    let composer = composer(ScriptedGenerator::failing("connection refused"), RolePolicy::unrestricted());
    let err = composer.compose("transformer shutdown", &shutdown_candidates(), "engineer").await.unwrap_err();
    match err {
        CompositionError::GenerationUnavailable { backend, reason, timed_out } => {
            assert_eq!(backend, Backend::Generation);
            assert!(reason.contains("connection refused"));
            assert!(!timed_out);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let slow = ScriptedGenerator::slow(Duration::from_secs(5));
    let composer =
        AnswerComposer::new(slow.clone(), RolePolicy::unrestricted(), ComposerSettings::default(), Duration::from_millis(20));
    let err = composer.compose("transformer shutdown", &shutdown_candidates(), "engineer").await.unwrap_err();
    assert!(matches!(err, CompositionError::GenerationUnavailable { timed_out: true, .. }));
    assert_eq!(slow.calls(), 1);
}
