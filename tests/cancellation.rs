//! Staleness and retry behavior: late responses for superseded or
//! discarded work must never mutate the model, and the retry budget is
//! enforced per stage.

use crux_core::testing::AppTester;
use serde_json::json;

use shared::capabilities::camera::CapturedImage;
use shared::capabilities::http::{HttpError, HttpResponse, HttpResult};
use shared::capabilities::timer::{TimerFired, TimerOperation};
use shared::model::{CaptureState, SessionState};
use shared::registry::OpCategory;
use shared::services::ApiConfig;
use shared::{App, Effect, ErrorKind, Event, Model};

fn config() -> ApiConfig {
    ApiConfig {
        base_url: "https://styling.example.com".into(),
        api_key: "anon-key".into(),
        access_token: "user-jwt".into(),
        user_id: "user-1".into(),
    }
}

fn booted() -> (AppTester<App, Effect>, Model) {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    app.update(Event::Started { config: config() }, &mut model);
    (app, model)
}

fn json_ok(body: serde_json::Value) -> Box<HttpResult> {
    Box::new(Ok(HttpResponse::new(
        200,
        serde_json::to_vec(&body).unwrap(),
    )))
}

fn status(code: u16) -> Box<HttpResult> {
    Box::new(Ok(HttpResponse::new(code, b"{}".to_vec())))
}

fn capture(app: &AppTester<App, Effect>, model: &mut Model) {
    app.update(Event::ShutterPressed, model);
    let timer_id = match model.capture {
        CaptureState::Holding { timer_id } => timer_id,
        ref other => panic!("expected Holding, got {other:?}"),
    };
    app.update(Event::CaptureHoldElapsed(TimerFired { id: timer_id }), model);
    app.update(
        Event::PhotoCaptured {
            result: Box::new(Ok(CapturedImage {
                base64: "aGVsbG8=".into(),
                width: 720,
                height: 1280,
            })),
        },
        model,
    );
}

/// Drives capture and upload; leaves the session in Analyzing with the
/// analysis request outstanding.
fn into_analyzing(app: &AppTester<App, Effect>, model: &mut Model) {
    capture(app, model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Analysis).unwrap();
    app.update(
        Event::PhotoUploaded {
            session_id,
            token,
            result: status(200),
        },
        model,
    );
    assert_eq!(model.session.state, SessionState::Analyzing);
}

fn scheduled_delay_ms(effects: &[Effect]) -> Option<u64> {
    effects.iter().find_map(|e| match e {
        Effect::Timer(request) => match &request.operation {
            TimerOperation::Start { millis, .. } => Some(*millis),
        },
        _ => None,
    })
}

#[test]
fn test_discarded_session_ignores_late_analysis() {
    let (app, mut model) = booted();
    into_analyzing(&app, &mut model);
    let old_session = model.session.id;
    let old_token = model.registry.current(OpCategory::Analysis).unwrap();

    app.update(Event::SessionDiscarded, &mut model);
    assert_eq!(model.session.state, SessionState::Idle);
    let snapshot_session = model.session.id;

    // The analysis for the discarded session resolves late.
    let update = app.update(
        Event::AnalysisReceived {
            session_id: old_session,
            token: old_token,
            result: json_ok(json!({
                "outfitName": "Smart Casual",
                "shortDescription": "Clean lines",
                "isValidPhoto": true,
                "rating": 8
            })),
        },
        &mut model,
    );

    assert_eq!(model.session.state, SessionState::Idle);
    assert_eq!(model.session.id, snapshot_session);
    assert!(model.session.recommendations.is_empty());
    assert!(model.active_error.is_none());
    assert!(update.effects.is_empty(), "a stale drop makes no effects");
}

#[test]
fn test_new_capture_supersedes_prior_pipeline() {
    let (app, mut model) = booted();
    into_analyzing(&app, &mut model);
    let first_session = model.session.id;
    let first_token = model.registry.current(OpCategory::Analysis).unwrap();

    // User bails out and shoots again.
    app.update(Event::SessionDiscarded, &mut model);
    capture(&app, &mut model);
    let second_session = model.session.id;
    assert_ne!(first_session, second_session);
    assert_ne!(
        model.registry.current(OpCategory::Analysis),
        Some(first_token)
    );

    // First pipeline's upload response straggles in.
    app.update(
        Event::PhotoUploaded {
            session_id: first_session,
            token: first_token,
            result: status(200),
        },
        &mut model,
    );

    // The superseding session is untouched.
    assert_eq!(model.session.id, second_session);
    assert_eq!(model.session.state, SessionState::Uploading);
}

#[test]
fn test_rate_limited_twice_then_success_uses_three_attempts() {
    let (app, mut model) = booted();
    into_analyzing(&app, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Analysis).unwrap();

    // First failure: backoff 2^1 seconds.
    let update = app.update(
        Event::AnalysisReceived {
            session_id,
            token,
            result: status(429),
        },
        &mut model,
    );
    assert_eq!(scheduled_delay_ms(&update.effects), Some(2000));
    assert_eq!(model.session.state, SessionState::Analyzing, "spinner stays up");

    let update = app.update(Event::RetryDelayElapsed { category: OpCategory::Analysis, token }, &mut model);
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Http(_))));
    assert_eq!(model.in_flight[&OpCategory::Analysis].attempt, 2);

    // Second failure: backoff 2^2 seconds.
    let update = app.update(
        Event::AnalysisReceived {
            session_id,
            token,
            result: status(429),
        },
        &mut model,
    );
    assert_eq!(scheduled_delay_ms(&update.effects), Some(4000));

    app.update(Event::RetryDelayElapsed { category: OpCategory::Analysis, token }, &mut model);
    assert_eq!(model.in_flight[&OpCategory::Analysis].attempt, 3);

    // Third attempt succeeds.
    app.update(
        Event::AnalysisReceived {
            session_id,
            token,
            result: json_ok(json!({
                "outfitName": "Smart Casual",
                "shortDescription": "Clean lines",
                "isValidPhoto": true,
                "rating": 8
            })),
        },
        &mut model,
    );
    assert!(matches!(model.session.state, SessionState::Ready(_)));
}

#[test]
fn test_third_failure_exhausts_the_budget() {
    let (app, mut model) = booted();
    into_analyzing(&app, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Analysis).unwrap();

    for _ in 0..2 {
        app.update(
            Event::AnalysisReceived {
                session_id,
                token,
                result: status(503),
            },
            &mut model,
        );
        app.update(
            Event::RetryDelayElapsed {
                category: OpCategory::Analysis,
                token,
            },
            &mut model,
        );
    }

    let update = app.update(
        Event::AnalysisReceived {
            session_id,
            token,
            result: status(503),
        },
        &mut model,
    );

    assert_eq!(
        model.session.state,
        SessionState::AnalysisFailed(ErrorKind::ServiceUnavailable)
    );
    assert!(scheduled_delay_ms(&update.effects).is_none(), "no fourth attempt");
    assert!(!model.in_flight.contains_key(&OpCategory::Analysis));
}

#[test]
fn test_unauthorized_fails_without_any_retry() {
    let (app, mut model) = booted();
    into_analyzing(&app, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Analysis).unwrap();

    let update = app.update(
        Event::AnalysisReceived {
            session_id,
            token,
            result: status(401),
        },
        &mut model,
    );

    assert_eq!(
        model.session.state,
        SessionState::AnalysisFailed(ErrorKind::Config)
    );
    assert!(scheduled_delay_ms(&update.effects).is_none());
    let error = app.view(&model).error.expect("config error surfaced");
    assert_eq!(error.code, "CONFIG_ERROR");
}

#[test]
fn test_stale_retry_timer_is_silent() {
    let (app, mut model) = booted();
    into_analyzing(&app, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Analysis).unwrap();

    app.update(
        Event::AnalysisReceived {
            session_id,
            token,
            result: status(429),
        },
        &mut model,
    );

    // Discarding tears the token down while the backoff is pending.
    app.update(Event::SessionDiscarded, &mut model);

    let update = app.update(
        Event::RetryDelayElapsed {
            category: OpCategory::Analysis,
            token,
        },
        &mut model,
    );

    assert!(update.effects.is_empty(), "abandoned retry re-sends nothing");
    assert_eq!(model.session.state, SessionState::Idle);
}

#[test]
fn test_upload_failure_is_single_attempt() {
    let (app, mut model) = booted();
    capture(&app, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Analysis).unwrap();

    let update = app.update(
        Event::PhotoUploaded {
            session_id,
            token,
            result: Box::new(Err(HttpError::ConnectionError {
                message: "refused".into(),
            })),
        },
        &mut model,
    );

    assert_eq!(
        model.session.state,
        SessionState::AnalysisFailed(ErrorKind::Network)
    );
    assert!(scheduled_delay_ms(&update.effects).is_none(), "uploads never retry");
    let error = app.view(&model).error.expect("network error surfaced");
    assert_eq!(error.code, "NETWORK_ERROR");
}

#[test]
fn test_reentrant_press_is_ignored_while_holding() {
    let (app, mut model) = booted();

    app.update(Event::ShutterPressed, &mut model);
    let armed = model.capture;

    let update = app.update(Event::ShutterPressed, &mut model);

    assert_eq!(model.capture, armed, "second press changes nothing");
    assert!(!update.effects.iter().any(|e| matches!(e, Effect::Timer(_))));
}

#[test]
fn test_press_is_ignored_while_processing() {
    let (app, mut model) = booted();
    into_analyzing(&app, &mut model);

    let update = app.update(Event::ShutterPressed, &mut model);

    assert_eq!(model.capture, CaptureState::Idle);
    assert!(!update.effects.iter().any(|e| matches!(e, Effect::Timer(_))));
}

#[test]
fn test_stale_hold_timer_does_not_open_camera() {
    let (app, mut model) = booted();

    app.update(Event::ShutterPressed, &mut model);
    let first_id = match model.capture {
        CaptureState::Holding { timer_id } => timer_id,
        ref other => panic!("expected Holding, got {other:?}"),
    };
    app.update(Event::ShutterReleased, &mut model);

    // Re-arm; the new hold allocates a fresh id.
    app.update(Event::ShutterPressed, &mut model);
    let second_id = match model.capture {
        CaptureState::Holding { timer_id } => timer_id,
        ref other => panic!("expected Holding, got {other:?}"),
    };
    assert_ne!(first_id, second_id);

    let update = app.update(Event::CaptureHoldElapsed(TimerFired { id: first_id }), &mut model);
    assert!(matches!(model.capture, CaptureState::Holding { .. }));
    assert!(!update.effects.iter().any(|e| matches!(e, Effect::Camera(_))));
}
