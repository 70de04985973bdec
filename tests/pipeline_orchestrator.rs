mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use daily_feedback::cache::{ArtifactCache, CacheError, Fingerprint, MemoryArtifactCache};
use daily_feedback::gateway::ProviderError;
use daily_feedback::report::{
    Artifact, InvocationAdapter, InvocationError, NoopObserver, Orchestrator, PipelineError, PipelineRun,
    RecordType, StageId, StageStatus, Tier, UnavailableCause,
};
use daily_feedback::schema;
use serde_json::{json, Value};

use common::{date, every_type, full_payload, record, stage_of, FakeGateway, RecordingObserver};

const PRIMARY: &str = "openai/gpt-4.1-mini";
const FALLBACK: &str = "openai/gpt-4o-mini";

fn orchestrator(gateway: &Arc<FakeGateway>, cache: &Arc<MemoryArtifactCache>) -> Orchestrator {
    let adapter = InvocationAdapter::new(gateway.clone(), PRIMARY)
        .with_fallback(Some(FALLBACK.to_string()));
    Orchestrator::new(adapter, cache.clone())
}

fn emotion_only() -> Vec<daily_feedback::report::Record> {
    vec![record(RecordType::Emotion, "09:00", "nervous, then relieved")]
}

#[tokio::test]
async fn single_emotion_record_standard_tier_scenario() {
    let gateway = Arc::new(FakeGateway::well_behaved());
    let cache = Arc::new(MemoryArtifactCache::new());
    let observer = RecordingObserver::default();

    let run = PipelineRun::for_date(&emotion_only(), date(), Tier::Standard);
    let report = orchestrator(&gateway, &cache)
        .run(run, &observer)
        .await
        .unwrap();

    assert_eq!(report.day_of_week, "Friday");
    for stage in [StageId::Daily, StageId::Vision, StageId::Insight, StageId::Feedback] {
        assert!(report.stage(stage).is_none(), "{stage} should be skipped");
    }
    assert!(report.summary_report.is_some());
    assert!(report.closing_report.is_some());

    let emotion = report.emotion_report.as_ref().unwrap();
    assert_eq!(emotion["dominant_emotion"], "sample text");
    assert_eq!(emotion["ai_mood_valence"], Value::Null);
    assert_eq!(emotion["ai_mood_arousal"], Value::Null);
    assert_eq!(emotion["emotion_timeline"], Value::Null);

    assert_eq!(
        gateway.stages_called(),
        vec![StageId::Summary, StageId::Emotion, StageId::Closing]
    );

    let events = observer.events();
    assert_eq!(events.len(), 7);
    for (idx, event) in events.iter().enumerate() {
        assert_eq!(event.stage_index, idx + 1);
        assert_eq!(event.total_stages, 7);
        assert_eq!(event.stage_name, StageId::ALL[idx]);
    }
    assert_eq!(events[1].status, StageStatus::Skipped);
    assert_eq!(events[2].status, StageStatus::Generated);
    assert_eq!(events[2].token_usage.map(|u| u.input_tokens), Some(100));
}

#[tokio::test]
async fn repeated_run_is_served_from_cache() {
    let gateway = Arc::new(FakeGateway::well_behaved());
    let cache = Arc::new(MemoryArtifactCache::new());
    let orchestrator = orchestrator(&gateway, &cache);

    let first = orchestrator
        .run(PipelineRun::for_date(&every_type(), date(), Tier::Premium), &NoopObserver)
        .await
        .unwrap();
    assert_eq!(gateway.call_count(), 7);

    let observer = RecordingObserver::default();
    let second = orchestrator
        .run(PipelineRun::for_date(&every_type(), date(), Tier::Premium), &observer)
        .await
        .unwrap();

    assert_eq!(gateway.call_count(), 7);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert!(observer
        .events()
        .iter()
        .all(|e| e.status == StageStatus::Cached && e.token_usage.is_none()));
    assert_eq!(cache.stats().hits, 7);
}

#[tokio::test]
async fn standard_tier_never_sees_premium_fields_and_tiers_do_not_share_entries() {
    let gateway = Arc::new(FakeGateway::well_behaved());
    let cache = Arc::new(MemoryArtifactCache::new());
    let orchestrator = orchestrator(&gateway, &cache);

    let premium = orchestrator
        .run(PipelineRun::for_date(&every_type(), date(), Tier::Premium), &NoopObserver)
        .await
        .unwrap();
    let standard = orchestrator
        .run(PipelineRun::for_date(&every_type(), date(), Tier::Standard), &NoopObserver)
        .await
        .unwrap();

    // The standard run could not reuse premium artifacts.
    assert_eq!(gateway.call_count(), 14);

    for (stage, fields) in schema::PREMIUM_FIELDS {
        let standard_artifact = standard.stage(stage).unwrap();
        let premium_artifact = premium.stage(stage).unwrap();
        for field in fields {
            assert_eq!(standard_artifact[*field], Value::Null, "{stage}.{field}");
            assert_ne!(premium_artifact[*field], Value::Null, "{stage}.{field}");
        }
    }
}

#[tokio::test]
async fn artifacts_match_the_resolved_field_list() {
    let gateway = Arc::new(FakeGateway::new(Box::new(|req| {
        let mut payload = full_payload(req);
        payload["unexpected_extra"] = json!("drop me");
        Ok(payload.to_string())
    })));
    let cache = Arc::new(MemoryArtifactCache::new());

    let report = orchestrator(&gateway, &cache)
        .run(PipelineRun::for_date(&every_type(), date(), Tier::Standard), &NoopObserver)
        .await
        .unwrap();

    for stage in StageId::ALL {
        let artifact = report.stage(stage).unwrap();
        let keys: Vec<&str> = artifact.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            schema::resolve(stage, Tier::Standard).required_fields(),
            "{stage}"
        );
    }
}

#[tokio::test]
async fn wrapped_responses_are_unwrapped_inside_the_pipeline() {
    let gateway = Arc::new(FakeGateway::new(Box::new(|req| {
        let payload = full_payload(req);
        let framed = match stage_of(req) {
            StageId::Summary => json!({ "summary_report": payload }),
            StageId::Emotion => json!({ "status": "ok", "result": payload }),
            _ => payload,
        };
        Ok(format!("Here is the report:\n```json\n{framed}\n```"))
    })));
    let cache = Arc::new(MemoryArtifactCache::new());

    let report = orchestrator(&gateway, &cache)
        .run(PipelineRun::for_date(&emotion_only(), date(), Tier::Premium), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(report.summary_report.unwrap()["overall_score"], 1);
    assert_eq!(report.emotion_report.unwrap()["ai_mood_valence"], 1.0);
}

#[tokio::test]
async fn stages_never_overlap() {
    let gateway = Arc::new(FakeGateway::well_behaved().with_delay(Duration::from_millis(10)));
    let cache = Arc::new(MemoryArtifactCache::new());

    orchestrator(&gateway, &cache)
        .run(PipelineRun::for_date(&every_type(), date(), Tier::Premium), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(gateway.call_count(), 7);
    assert_eq!(gateway.max_in_flight(), 1);
    assert_eq!(gateway.stages_called(), StageId::ALL.to_vec());
}

#[tokio::test]
async fn concurrent_runs_share_one_cache_safely() {
    let gateway = Arc::new(FakeGateway::well_behaved().with_delay(Duration::from_millis(5)));
    let cache = Arc::new(MemoryArtifactCache::new());
    let orchestrator = Arc::new(orchestrator(&gateway, &cache));

    let mut handles = Vec::new();
    for tier in [Tier::Standard, Tier::Premium] {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .run(PipelineRun::for_date(&every_type(), date(), tier), &NoopObserver)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(cache.len(), 14);
}

#[tokio::test]
async fn identical_concurrent_runs_generate_each_stage_once() {
    let gateway = Arc::new(FakeGateway::well_behaved().with_delay(Duration::from_millis(20)));
    let cache = Arc::new(MemoryArtifactCache::new());
    let orchestrator = Arc::new(orchestrator(&gateway, &cache));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .run(PipelineRun::for_date(&every_type(), date(), Tier::Premium), &NoopObserver)
                .await
        }));
    }
    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(gateway.call_count(), 7);
    assert_eq!(cache.len(), 7);
    assert_eq!(cache.stats().hits, 7);
    assert_eq!(reports[0], reports[1]);
}

#[tokio::test]
async fn failed_call_leaves_the_stage_to_the_waiting_run() {
    let failed_once = AtomicBool::new(false);
    let gateway = Arc::new(
        FakeGateway::new(Box::new(move |req| {
            if !failed_once.swap(true, Ordering::SeqCst) {
                return Err(ProviderError::rate_limited_local(Duration::from_secs(5)));
            }
            Ok(full_payload(req).to_string())
        }))
        .with_delay(Duration::from_millis(20)),
    );
    let cache = Arc::new(MemoryArtifactCache::new());
    let orchestrator = Arc::new(orchestrator(&gateway, &cache));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .run(PipelineRun::for_date(&every_type(), date(), Tier::Premium), &NoopObserver)
                .await
        }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    let failures: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage(), Some(StageId::Summary));
    // The failed summary call, then one full run.
    assert_eq!(gateway.call_count(), 8);
    assert_eq!(cache.len(), 7);
}

/// Accepts every artifact and remembers none of them.
struct ForgetfulCache;

#[async_trait]
impl ArtifactCache for ForgetfulCache {
    async fn lookup(&self, _fingerprint: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
        Ok(None)
    }

    async fn store(&self, _fingerprint: &Fingerprint, _artifact: &Artifact) -> Result<(), CacheError> {
        Ok(())
    }
}

#[tokio::test]
async fn cache_that_drops_entries_only_costs_repeat_calls() {
    let gateway = Arc::new(FakeGateway::well_behaved());
    let adapter = InvocationAdapter::new(gateway.clone(), PRIMARY);
    let orchestrator = Orchestrator::new(adapter, Arc::new(ForgetfulCache));

    for _ in 0..2 {
        let report = orchestrator
            .run(PipelineRun::for_date(&every_type(), date(), Tier::Standard), &NoopObserver)
            .await
            .unwrap();
        assert!(report.closing_report.is_some());
    }
    assert_eq!(gateway.call_count(), 14);
}

#[tokio::test]
async fn stage_failure_aborts_the_run_and_keeps_earlier_artifacts_cached() {
    let gateway = Arc::new(FakeGateway::new(Box::new(|req| {
        if stage_of(req) == StageId::Emotion {
            return Err(ProviderError::rate_limited_local(Duration::from_secs(30)));
        }
        Ok(full_payload(req).to_string())
    })));
    let cache = Arc::new(MemoryArtifactCache::new());
    let observer = RecordingObserver::default();

    let err = orchestrator(&gateway, &cache)
        .run(PipelineRun::for_date(&every_type(), date(), Tier::Standard), &observer)
        .await
        .unwrap_err();

    match &err {
        PipelineError::Stage {
            stage: StageId::Emotion,
            source: InvocationError::QuotaExceeded { retry_after },
        } => assert_eq!(*retry_after, Duration::from_secs(30)),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status_code(), 429);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));

    // Quota errors are never retried, and nothing after the failing stage ran.
    assert_eq!(gateway.attempts(), 3);
    assert_eq!(
        gateway.stages_called(),
        vec![StageId::Summary, StageId::Daily, StageId::Emotion]
    );
    assert_eq!(observer.events().len(), 2);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn unparseable_content_is_a_malformed_payload() {
    let gateway = Arc::new(FakeGateway::new(Box::new(|_| {
        Ok("I'm sorry, here is some prose instead.".to_string())
    })));
    let cache = Arc::new(MemoryArtifactCache::new());

    let err = orchestrator(&gateway, &cache)
        .run(PipelineRun::for_date(&emotion_only(), date(), Tier::Standard), &NoopObserver)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Stage {
            stage: StageId::Summary,
            source: InvocationError::MalformedPayload(_),
        }
    ));
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn empty_content_is_an_empty_response() {
    let gateway = Arc::new(FakeGateway::new(Box::new(|_| Ok(String::new()))));
    let cache = Arc::new(MemoryArtifactCache::new());

    let err = orchestrator(&gateway, &cache)
        .run(PipelineRun::for_date(&emotion_only(), date(), Tier::Standard), &NoopObserver)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Stage {
            source: InvocationError::EmptyResponse,
            ..
        }
    ));
}

#[tokio::test]
async fn rejected_model_falls_back_once() {
    let gateway = Arc::new(FakeGateway::new(Box::new(|req| {
        if req.model.model_id() == PRIMARY {
            return Err(ProviderError::model_not_found(PRIMARY, None));
        }
        Ok(full_payload(req).to_string())
    })));
    let cache = Arc::new(MemoryArtifactCache::new());

    orchestrator(&gateway, &cache)
        .run(PipelineRun::for_date(&emotion_only(), date(), Tier::Standard), &NoopObserver)
        .await
        .unwrap();

    let models: Vec<String> = gateway
        .calls()
        .iter()
        .map(|c| c.model.model_id().to_string())
        .collect();
    assert_eq!(models.len(), 6);
    for pair in models.chunks(2) {
        assert_eq!(pair, [PRIMARY.to_string(), FALLBACK.to_string()]);
    }
}

#[tokio::test]
async fn rejected_model_without_fallback_fails_the_stage() {
    let gateway = Arc::new(FakeGateway::new(Box::new(|_| {
        Err(ProviderError::model_not_found(PRIMARY, None))
    })));
    let cache = Arc::new(MemoryArtifactCache::new());
    let adapter = InvocationAdapter::new(gateway.clone(), PRIMARY).with_fallback(None);

    let err = Orchestrator::new(adapter, cache)
        .run(PipelineRun::for_date(&emotion_only(), date(), Tier::Standard), &NoopObserver)
        .await
        .unwrap_err();

    match err {
        PipelineError::Stage {
            source: InvocationError::ModelUnavailable { model, cause },
            ..
        } => {
            assert_eq!(model, PRIMARY);
            assert_eq!(cause, UnavailableCause::Rejected);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(gateway.attempts(), 1);
}

#[tokio::test]
async fn timed_out_call_is_not_retried_on_fallback() {
    let gateway = Arc::new(FakeGateway::well_behaved().with_delay(Duration::from_millis(500)));
    let cache = Arc::new(MemoryArtifactCache::new());
    let adapter = InvocationAdapter::new(gateway.clone(), PRIMARY)
        .with_fallback(Some(FALLBACK.to_string()))
        .with_call_timeout(Duration::from_millis(20));

    let err = Orchestrator::new(adapter, cache)
        .run(PipelineRun::for_date(&emotion_only(), date(), Tier::Standard), &NoopObserver)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Stage {
            source: InvocationError::ModelUnavailable {
                cause: UnavailableCause::TimedOut,
                ..
            },
            ..
        }
    ));
    assert_eq!(gateway.attempts(), 1);
}

#[tokio::test]
async fn no_records_on_the_date_is_not_found() {
    let gateway = Arc::new(FakeGateway::well_behaved());
    let cache = Arc::new(MemoryArtifactCache::new());
    let other_day = chrono::NaiveDate::from_ymd_opt(2025, 1, 11).unwrap();

    let err = orchestrator(&gateway, &cache)
        .run(PipelineRun::for_date(&emotion_only(), other_day, Tier::Standard), &NoopObserver)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoRecordsForDate { date } if date == other_day));
    assert_eq!(err.status_code(), 404);
    assert_eq!(gateway.attempts(), 0);
}

#[tokio::test]
async fn requests_carry_instruction_fingerprint_and_attribution() {
    let gateway = Arc::new(FakeGateway::well_behaved());
    let cache = Arc::new(MemoryArtifactCache::new());

    let run = PipelineRun::for_date(&emotion_only(), date(), Tier::Standard).with_user("user-42");
    let run_id = run.id;
    orchestrator(&gateway, &cache)
        .run(run, &NoopObserver)
        .await
        .unwrap();

    for call in gateway.calls() {
        let stage = stage_of(&call);
        let system = &call.messages[0].content;
        assert_eq!(
            call.cache_key.as_deref(),
            Some(Fingerprint::instruction(stage, system).as_str())
        );
        assert_eq!(call.attribution.user_id.as_deref(), Some("user-42"));
        assert_eq!(call.attribution.run_id, Some(run_id));
        assert_eq!(call.max_tokens, Some(2048));
        assert_eq!(call.response_schema.as_ref().map(|s| s.strict), Some(true));
    }
}

#[tokio::test]
async fn closing_stage_reads_redacted_prior_artifacts() {
    let gateway = Arc::new(FakeGateway::well_behaved());
    let cache = Arc::new(MemoryArtifactCache::new());

    orchestrator(&gateway, &cache)
        .run(PipelineRun::for_date(&emotion_only(), date(), Tier::Standard), &NoopObserver)
        .await
        .unwrap();

    let calls = gateway.calls();
    let closing = calls.last().unwrap();
    assert_eq!(stage_of(closing), StageId::Closing);
    let user = &closing.messages[1].content;
    assert!(user.contains("&quot;ai_mood_valence&quot;:null"));
    assert!(user.contains("<daily_report>\nnull\n</daily_report>"));
    assert!(!user.contains("nervous, then relieved"));
}

#[tokio::test]
async fn changed_records_miss_the_cache() {
    let gateway = Arc::new(FakeGateway::well_behaved());
    let cache = Arc::new(MemoryArtifactCache::new());
    let orchestrator = orchestrator(&gateway, &cache);

    orchestrator
        .run(PipelineRun::for_date(&emotion_only(), date(), Tier::Standard), &NoopObserver)
        .await
        .unwrap();

    let mut records = emotion_only();
    records.push(record(RecordType::Daily, "18:00", "cooked dinner"));
    orchestrator
        .run(PipelineRun::for_date(&records, date(), Tier::Standard), &NoopObserver)
        .await
        .unwrap();

    // Emotion prompt is unchanged; summary, daily and closing are new.
    assert_eq!(gateway.call_count(), 3 + 3);
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    let emotion_fp = {
        let run = PipelineRun::for_date(&records, date(), Tier::Standard);
        let def = daily_feedback::report::stage(StageId::Emotion);
        let prompt = def.build_prompt(&run, &[]);
        Fingerprint::result(StageId::Emotion, &prompt.system, &prompt.user, Tier::Standard)
    };
    assert!(cache.lookup(&emotion_fp).await.unwrap().is_some());
}
