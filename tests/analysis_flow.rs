use crux_core::testing::AppTester;
use serde_json::json;

use shared::capabilities::camera::CapturedImage;
use shared::capabilities::http::{HttpResponse, HttpResult};
use shared::capabilities::timer::TimerFired;
use shared::model::{CaptureState, Phase, SessionState};
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

fn photo() -> Box<shared::capabilities::camera::CameraResult> {
    Box::new(Ok(CapturedImage {
        base64: "aGVsbG8gd29ybGQ=".into(),
        width: 720,
        height: 1280,
    }))
}

/// Press-hold through to a delivered photo; leaves the session Uploading.
fn capture(app: &AppTester<App, Effect>, model: &mut Model) {
    app.update(Event::ShutterPressed, model);
    let timer_id = match model.capture {
        CaptureState::Holding { timer_id } => timer_id,
        ref other => panic!("expected Holding, got {other:?}"),
    };
    app.update(Event::CaptureHoldElapsed(TimerFired { id: timer_id }), model);
    app.update(Event::PhotoCaptured { result: photo() }, model);
}

/// Full drive to an analyzed outfit. Returns nothing; assert on `model`.
fn analyze(app: &AppTester<App, Effect>, model: &mut Model) {
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
    app.update(
        Event::AnalysisReceived {
            session_id,
            token,
            result: json_ok(json!({
                "outfitName": "Smart Casual",
                "shortDescription": "Clean lines with muted colors",
                "isValidPhoto": true,
                "rating": 8
            })),
        },
        model,
    );
}

fn recommendations_body() -> serde_json::Value {
    json!({
        "recommendations": [
            {
                "name": "Linen Overshirt",
                "brand": "Arket",
                "description": "Boxy fit",
                "price": "$89",
                "imageUrl": "https://img.example.com/1.jpg",
                "purchaseUrl": "https://shop.example.com/1",
                "category": "tops"
            },
            {
                "name": "Wide Chinos",
                "brand": "Uniqlo",
                "description": "Pleated front",
                "price": "$49",
                "imageUrl": "https://img.example.com/2.jpg",
                "purchaseUrl": "https://shop.example.com/2"
            },
            {
                "name": "Suede Loafers",
                "brand": "Vagabond",
                "description": "Almond toe",
                "price": "$140",
                "imageUrl": "https://img.example.com/3.jpg",
                "purchaseUrl": "https://shop.example.com/3"
            }
        ]
    })
}

#[test]
fn test_bad_configuration_refuses_everything() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    app.update(
        Event::Started {
            config: ApiConfig {
                api_key: "".into(),
                ..config()
            },
        },
        &mut model,
    );

    let view = app.view(&model);
    let error = view.error.expect("config error surfaced");
    assert_eq!(error.code, "CONFIG_ERROR");

    // Capture is refused until a valid config lands.
    let update = app.update(Event::ShutterPressed, &mut model);
    assert_eq!(model.capture, CaptureState::Idle);
    assert!(!update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Timer(_))));
}

#[test]
fn test_hold_to_capture_arms_timer_and_haptics() {
    let (app, mut model) = booted();

    let update = app.update(Event::ShutterPressed, &mut model);

    assert!(matches!(model.capture, CaptureState::Holding { .. }));
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Timer(_))));
    assert!(update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Haptics(_))));
    assert!(app.view(&model).capture_hold_active);
}

#[test]
fn test_early_release_aborts_capture() {
    let (app, mut model) = booted();

    app.update(Event::ShutterPressed, &mut model);
    let timer_id = match model.capture {
        CaptureState::Holding { timer_id } => timer_id,
        ref other => panic!("expected Holding, got {other:?}"),
    };
    app.update(Event::ShutterReleased, &mut model);
    assert_eq!(model.capture, CaptureState::Idle);

    // The released hold's timer still fires; nothing may happen.
    let update = app.update(Event::CaptureHoldElapsed(TimerFired { id: timer_id }), &mut model);
    assert_eq!(model.capture, CaptureState::Idle);
    assert!(!update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Camera(_))));
}

#[test]
fn test_completed_hold_opens_camera() {
    let (app, mut model) = booted();

    app.update(Event::ShutterPressed, &mut model);
    let timer_id = match model.capture {
        CaptureState::Holding { timer_id } => timer_id,
        ref other => panic!("expected Holding, got {other:?}"),
    };
    let update = app.update(Event::CaptureHoldElapsed(TimerFired { id: timer_id }), &mut model);

    assert!(matches!(model.capture, CaptureState::AwaitingCamera { .. }));
    assert!(update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Camera(_))));
}

#[test]
fn test_happy_path_lands_ready_with_no_recommendations() {
    let (app, mut model) = booted();

    analyze(&app, &mut model);

    assert!(matches!(model.session.state, SessionState::Ready(_)));
    assert!(model.session.photo_url.is_some());
    assert!(model.session.recommendations.is_empty());

    let view = app.view(&model);
    assert_eq!(view.phase, Phase::Ready);
    let outfit = view.outfit.expect("outfit view");
    assert_eq!(outfit.name, "Smart Casual");
    assert_eq!(outfit.rating, 8);
    assert!(outfit.can_generate);
    assert!(!outfit.can_regenerate);
    assert!(view.recommendations.is_empty());
    assert!(view.error.is_none());
}

#[test]
fn test_invalid_photo_resets_after_timer_and_keeps_nothing() {
    let (app, mut model) = booted();
    capture(&app, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Analysis).unwrap();
    app.update(
        Event::PhotoUploaded {
            session_id,
            token,
            result: status(200),
        },
        &mut model,
    );

    app.update(
        Event::AnalysisReceived {
            session_id,
            token,
            result: json_ok(json!({
                "outfitName": "",
                "shortDescription": "",
                "isValidPhoto": false
            })),
        },
        &mut model,
    );

    assert_eq!(model.session.state, SessionState::InvalidPhoto);
    assert!(model.session.photo.is_none(), "photo must not be retained");
    assert_eq!(app.view(&model).phase, Phase::InvalidPhoto);

    let reset_id = model.reset_timer.expect("reset timer armed");
    app.update(Event::InvalidPhotoTimerElapsed(TimerFired { id: reset_id }), &mut model);

    assert_eq!(model.session.state, SessionState::Idle);
    assert_ne!(model.session.id, session_id, "reset starts a fresh session");
}

#[test]
fn test_fractional_rating_fails_validation() {
    let (app, mut model) = booted();
    capture(&app, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Analysis).unwrap();
    app.update(
        Event::PhotoUploaded {
            session_id,
            token,
            result: status(200),
        },
        &mut model,
    );

    app.update(
        Event::AnalysisReceived {
            session_id,
            token,
            result: json_ok(json!({
                "outfitName": "Smart Casual",
                "shortDescription": "Clean lines",
                "isValidPhoto": true,
                "rating": 7.5
            })),
        },
        &mut model,
    );

    assert_eq!(
        model.session.state,
        SessionState::AnalysisFailed(ErrorKind::Validation)
    );
    let error = app.view(&model).error.expect("validation error surfaced");
    assert_eq!(error.code, "VALIDATION_ERROR");
}

#[test]
fn test_string_rating_fails_validation() {
    let (app, mut model) = booted();
    capture(&app, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Analysis).unwrap();
    app.update(
        Event::PhotoUploaded {
            session_id,
            token,
            result: status(200),
        },
        &mut model,
    );

    app.update(
        Event::AnalysisReceived {
            session_id,
            token,
            result: json_ok(json!({
                "outfitName": "Smart Casual",
                "shortDescription": "Clean lines",
                "isValidPhoto": true,
                "rating": "8"
            })),
        },
        &mut model,
    );

    assert_eq!(
        model.session.state,
        SessionState::AnalysisFailed(ErrorKind::Validation)
    );
}

#[test]
fn test_generate_recommendations_happy_path() {
    let (app, mut model) = booted();
    analyze(&app, &mut model);

    let update = app.update(Event::GenerateRecommendations, &mut model);
    assert!(matches!(
        model.session.state,
        SessionState::GeneratingRecommendations(_)
    ));
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Http(_))));

    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Recommendations).unwrap();
    app.update(
        Event::RecommendationsReceived {
            session_id,
            token,
            result: json_ok(recommendations_body()),
        },
        &mut model,
    );

    assert!(matches!(model.session.state, SessionState::Ready(_)));
    assert_eq!(model.session.recommendations.len(), 3);
    assert_eq!(model.session.generation_count, 1);

    let view = app.view(&model);
    assert_eq!(view.recommendations.len(), 3);
    assert_eq!(view.recommendations[0].category, "tops");
    assert_eq!(view.recommendations[1].category, "other");
    let outfit = view.outfit.unwrap();
    assert!(!outfit.can_generate);
    assert!(outfit.can_regenerate);
}

#[test]
fn test_regeneration_replaces_wholesale_and_clears_favorites() {
    let (app, mut model) = booted();
    analyze(&app, &mut model);

    app.update(Event::GenerateRecommendations, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Recommendations).unwrap();
    app.update(
        Event::RecommendationsReceived {
            session_id,
            token,
            result: json_ok(recommendations_body()),
        },
        &mut model,
    );

    app.update(Event::FavoriteToggled { index: 0 }, &mut model);
    assert!(!model.favorites.is_empty());

    app.update(Event::RegenerateRecommendations, &mut model);
    let token = model.registry.current(OpCategory::Recommendations).unwrap();
    app.update(
        Event::RecommendationsReceived {
            session_id,
            token,
            result: json_ok(json!({
                "recommendations": [{
                    "name": "Denim Jacket",
                    "brand": "Levi's",
                    "description": "Oversized",
                    "price": "$98",
                    "imageUrl": "https://img.example.com/9.jpg",
                    "purchaseUrl": "https://shop.example.com/9"
                }]
            })),
        },
        &mut model,
    );

    assert_eq!(model.session.recommendations.len(), 1);
    assert_eq!(model.session.recommendations[0].name, "Denim Jacket");
    assert!(model.favorites.is_empty(), "regeneration clears favorites");
    assert_eq!(model.session.generation_count, 2);

    // Budget spent: one regeneration only.
    let outfit = app.view(&model).outfit.unwrap();
    assert!(!outfit.can_regenerate);
    app.update(Event::RegenerateRecommendations, &mut model);
    assert!(matches!(model.session.state, SessionState::Ready(_)));
}

#[test]
fn test_oversized_recommendation_list_is_rejected() {
    let (app, mut model) = booted();
    analyze(&app, &mut model);
    app.update(Event::GenerateRecommendations, &mut model);

    let item = json!({
        "name": "X", "brand": "Y", "description": "Z",
        "price": "$1", "imageUrl": "https://i/x.jpg", "purchaseUrl": "https://s/x"
    });
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Recommendations).unwrap();
    app.update(
        Event::RecommendationsReceived {
            session_id,
            token,
            result: json_ok(json!({ "recommendations": vec![item; 6] })),
        },
        &mut model,
    );

    assert!(matches!(
        model.session.state,
        SessionState::RecommendationsFailed(_, ErrorKind::Validation)
    ));
    // The analysis survives a recommendation failure.
    assert!(app.view(&model).outfit.is_some());
}

#[test]
fn test_empty_recommendation_list_is_rejected() {
    let (app, mut model) = booted();
    analyze(&app, &mut model);
    app.update(Event::GenerateRecommendations, &mut model);

    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Recommendations).unwrap();
    app.update(
        Event::RecommendationsReceived {
            session_id,
            token,
            result: json_ok(json!({ "recommendations": [] })),
        },
        &mut model,
    );

    assert!(matches!(
        model.session.state,
        SessionState::RecommendationsFailed(_, ErrorKind::Validation)
    ));
}

#[test]
fn test_failed_first_generation_can_be_retried() {
    let (app, mut model) = booted();
    analyze(&app, &mut model);

    app.update(Event::GenerateRecommendations, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Recommendations).unwrap();
    app.update(
        Event::RecommendationsReceived {
            session_id,
            token,
            result: json_ok(json!({ "recommendations": [] })),
        },
        &mut model,
    );
    assert!(matches!(
        model.session.state,
        SessionState::RecommendationsFailed(..)
    ));
    assert_eq!(model.session.generation_count, 0);

    // The generate action comes back; the count only advances on success.
    let outfit = app.view(&model).outfit.unwrap();
    assert!(outfit.can_generate);
    assert!(!outfit.can_regenerate);

    let update = app.update(Event::GenerateRecommendations, &mut model);
    assert!(matches!(
        model.session.state,
        SessionState::GeneratingRecommendations(_)
    ));
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Http(_))));

    let token = model.registry.current(OpCategory::Recommendations).unwrap();
    app.update(
        Event::RecommendationsReceived {
            session_id,
            token,
            result: json_ok(recommendations_body()),
        },
        &mut model,
    );
    assert!(matches!(model.session.state, SessionState::Ready(_)));
    assert_eq!(model.session.generation_count, 1);
}

#[test]
fn test_recommendation_persist_skipped_without_analysis_id() {
    let (app, mut model) = booted();
    analyze(&app, &mut model);
    assert!(model.session.analysis_id.is_none());

    app.update(Event::GenerateRecommendations, &mut model);
    let session_id = model.session.id;
    let token = model.registry.current(OpCategory::Recommendations).unwrap();
    let update = app.update(
        Event::RecommendationsReceived {
            session_id,
            token,
            result: json_ok(recommendations_body()),
        },
        &mut model,
    );

    // Recommendations land, but no persistence call goes out.
    assert_eq!(model.session.recommendations.len(), 3);
    assert!(!update.effects.iter().any(|e| matches!(e, Effect::Http(_))));
}

#[test]
fn test_recommendation_persist_fires_once_analysis_id_arrived() {
    let (app, mut model) = booted();
    analyze(&app, &mut model);
    let session_id = model.session.id;

    app.update(
        Event::AnalysisRecordSaved {
            session_id,
            result: json_ok(json!([{ "id": "analysis-42" }])),
        },
        &mut model,
    );
    assert_eq!(model.session.analysis_id.as_deref(), Some("analysis-42"));

    app.update(Event::GenerateRecommendations, &mut model);
    let token = model.registry.current(OpCategory::Recommendations).unwrap();
    let update = app.update(
        Event::RecommendationsReceived {
            session_id,
            token,
            result: json_ok(recommendations_body()),
        },
        &mut model,
    );

    assert!(update.effects.iter().any(|e| matches!(e, Effect::Http(_))));
}

#[test]
fn test_rename_rejects_invalid_names() {
    let (app, mut model) = booted();
    analyze(&app, &mut model);

    app.update(
        Event::OutfitRenamed {
            name: "Fall Fit 2024!".into(),
        },
        &mut model,
    );

    let error = app.view(&model).error.expect("rename rejected");
    assert_eq!(error.code, "VALIDATION_ERROR");
    // The displayed name is untouched.
    assert_eq!(app.view(&model).outfit.unwrap().name, "Smart Casual");
}

#[test]
fn test_rename_trims_and_applies_valid_names() {
    let (app, mut model) = booted();
    analyze(&app, &mut model);

    app.update(
        Event::OutfitRenamed {
            name: "  Muted Minimal  ".into(),
        },
        &mut model,
    );

    assert_eq!(app.view(&model).outfit.unwrap().name, "Muted Minimal");
}

#[test]
fn test_gallery_pick_skips_the_hold() {
    let (app, mut model) = booted();

    let update = app.update(Event::GalleryPickRequested, &mut model);

    assert!(matches!(model.capture, CaptureState::AwaitingCamera { .. }));
    assert!(update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Camera(_))));
    assert!(!update.effects.iter().any(|e| matches!(e, Effect::Timer(_))));
}

#[test]
fn test_dismissed_picker_is_silent() {
    let (app, mut model) = booted();
    app.update(Event::GalleryPickRequested, &mut model);

    app.update(
        Event::PhotoCaptured {
            result: Box::new(Err(
                shared::capabilities::camera::CameraError::PickerCancelled,
            )),
        },
        &mut model,
    );

    assert_eq!(model.capture, CaptureState::Idle);
    assert_eq!(model.session.state, SessionState::Idle);
    assert!(app.view(&model).error.is_none());
}

#[test]
fn test_discard_returns_to_idle_from_any_point() {
    let (app, mut model) = booted();
    analyze(&app, &mut model);
    let old_session = model.session.id;

    app.update(Event::SessionDiscarded, &mut model);

    assert_eq!(model.session.state, SessionState::Idle);
    assert_ne!(model.session.id, old_session);
    assert!(model.session.photo.is_none());
    assert_eq!(app.view(&model).phase, Phase::Idle);
}
