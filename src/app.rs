//! The update loop: every gesture, shell response and timer expiry lands
//! here. Handlers check staleness before committing anything, so a
//! superseded or discarded session can never be mutated by a late
//! response.

use tracing::{debug, warn};

use crate::capabilities::camera::{CameraError, CaptureConfig};
use crate::capabilities::haptics::HapticPattern;
use crate::capabilities::http::{HttpRequest, HttpResult};
use crate::capabilities::Capabilities;
use crate::event::Event;
use crate::favorites::{ItemKey, ToggleAction};
use crate::model::{
    CaptureSource, CaptureState, ErrorView, InFlightOp, Model, OutfitView, PendingCall, Phase,
    PhotoCapture, RecommendationView, SessionState, TryOnState, TryOnView, VideoState, ViewModel,
};
use crate::registry::{OpCategory, StaleGuard};
use crate::retry::{FailureClass, RetryDecision, RetryPolicy};
use crate::services::{
    self, ServiceClient, OUTFIT_PHOTOS_BUCKET, TRY_ON_RESULTS_BUCKET,
};
use crate::{
    AppError, AppResult, ErrorKind, SessionId, CAPTURE_HOLD_MS, INVALID_PHOTO_RESET_MS,
};

/// Failures surfaced by a pipeline stage all read the same way to the
/// user; the kind picks the copy.
fn stage_error(kind: ErrorKind) -> AppError {
    let message = match kind {
        ErrorKind::Network => "network failure",
        ErrorKind::RateLimited => "rate limited by the styling service",
        ErrorKind::ServiceUnavailable => "styling service unavailable",
        ErrorKind::Config => "authentication or configuration failure",
        ErrorKind::Validation => {
            "The styling service returned an unexpected response. Please try again."
        }
        ErrorKind::InvalidPhoto => "no outfit detected in the photo",
        ErrorKind::Cancelled => "cancelled",
    };
    AppError::new(kind, message)
}

#[derive(Default)]
pub struct App;

impl App {
    fn require_client(&self, model: &mut Model) -> Option<ServiceClient> {
        let client = model.services.clone();
        if client.is_none() {
            warn!("operation refused: core not configured");
            model.active_error =
                Some(AppError::new(ErrorKind::Config, "Missing credentials").with_internal(
                    "operation requested before configuration was accepted",
                ));
        }
        client
    }

    fn is_stale(&self, model: &Model, category: OpCategory, token: crate::registry::OpToken,
        session_id: SessionId) -> bool {
        let guard = StaleGuard::new(category, token, session_id);
        if guard.is_live(&model.registry, model.session.id) {
            false
        } else {
            debug!(
                category = category.name(),
                session = %session_id,
                "dropping stale response"
            );
            true
        }
    }

    /// Issues a fresh token, records the in-flight op and fires the call.
    fn start_stage(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        category: OpCategory,
        call: PendingCall,
    ) {
        let session_id = model.session.id;
        let token = model.registry.issue(category);
        model.in_flight.insert(
            category,
            InFlightOp {
                token,
                session_id,
                attempt: 1,
                call: call.clone(),
            },
        );
        self.dispatch_call(model, caps, category, token, session_id, call);
    }

    /// Builds and sends the request for one attempt of a stage.
    fn dispatch_call(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        category: OpCategory,
        token: crate::registry::OpToken,
        session_id: SessionId,
        call: PendingCall,
    ) {
        let Some(client) = model.services.clone() else {
            self.abort_stage(model, category, ErrorKind::Config);
            return;
        };

        let built: AppResult<HttpRequest> = match &call {
            PendingCall::Analyze => match model.session.photo.as_ref() {
                Some(photo) => client.analyze(&photo.base64, model.profile.as_ref()),
                None => Err(stage_error(ErrorKind::Validation)
                    .with_internal("analyze dispatched without a photo")),
            },
            PendingCall::Search => match model.session.state.analysis() {
                Some(analysis) => client.search(analysis, model.profile.as_ref()),
                None => Err(stage_error(ErrorKind::Validation)
                    .with_internal("search dispatched without an analysis")),
            },
            PendingCall::TryOn { garment_url } => match model.session.photo.as_ref() {
                Some(photo) => client.try_on(&photo.base64, garment_url),
                None => Err(stage_error(ErrorKind::Validation)
                    .with_internal("try-on dispatched without a photo")),
            },
            PendingCall::GenerateVideo { image_path } => client.generate_video(image_path),
        };

        match built {
            Ok(request) => {
                let make_event = move |result: HttpResult| {
                    let result = Box::new(result);
                    match category {
                        OpCategory::Analysis => Event::AnalysisReceived {
                            session_id,
                            token,
                            result,
                        },
                        OpCategory::Recommendations => Event::RecommendationsReceived {
                            session_id,
                            token,
                            result,
                        },
                        OpCategory::TryOn => Event::TryOnReceived {
                            session_id,
                            token,
                            result,
                        },
                        OpCategory::VideoGeneration => Event::VideoReceived {
                            session_id,
                            token,
                            result,
                        },
                    }
                };
                caps.http.send(request, make_event);
            }
            Err(e) => {
                warn!(category = category.name(), error = %e, "could not build stage request");
                self.abort_stage(model, category, e.kind);
            }
        }
    }

    /// Runs the retry policy for a failed attempt. Returns the terminal
    /// error kind once the stage is abandoned; `None` while a retry is
    /// pending (or the failure was silent).
    fn handle_stage_failure(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        category: OpCategory,
        class: FailureClass,
    ) -> Option<ErrorKind> {
        let Some(entry) = model.in_flight.get(&category) else {
            debug!(category = category.name(), "failure for unknown operation; dropping");
            return None;
        };
        let token = entry.token;
        let attempt = entry.attempt;

        match RetryPolicy::default().decide(class, attempt) {
            RetryDecision::Retry { delay_ms } => {
                debug!(
                    category = category.name(),
                    attempt,
                    delay_ms,
                    "scheduling retry"
                );
                let id = model.next_timer_id();
                caps.timer.start(id, delay_ms, move |_| Event::RetryDelayElapsed {
                    category,
                    token,
                });
                None
            }
            RetryDecision::Fail(kind) => {
                model.in_flight.remove(&category);
                model.registry.cancel(category);
                if kind == ErrorKind::Cancelled {
                    debug!(category = category.name(), "stage cancelled; staying silent");
                    None
                } else {
                    warn!(
                        category = category.name(),
                        attempt,
                        kind = kind.code(),
                        "stage failed terminally"
                    );
                    Some(kind)
                }
            }
        }
    }

    /// Terminal failure without consulting the retry policy.
    fn abort_stage(&self, model: &mut Model, category: OpCategory, kind: ErrorKind) {
        model.in_flight.remove(&category);
        model.registry.cancel(category);
        self.surface_failure(model, category, kind);
    }

    /// Applies a terminal stage failure to the visible state.
    fn surface_failure(&self, model: &mut Model, category: OpCategory, kind: ErrorKind) {
        if kind == ErrorKind::Cancelled {
            return;
        }
        match category {
            OpCategory::Analysis => {
                model.transition(SessionState::AnalysisFailed(kind));
            }
            OpCategory::Recommendations => {
                if let Some(analysis) = model.session.state.analysis().cloned() {
                    model.transition(SessionState::RecommendationsFailed(analysis, kind));
                }
            }
            OpCategory::TryOn => {
                model.try_on = TryOnState::Idle;
                model.active_error = Some(stage_error(kind));
            }
            OpCategory::VideoGeneration => {
                if let TryOnState::Ready { video, .. } = &mut model.try_on {
                    *video = VideoState::Failed;
                }
                model.active_error = Some(stage_error(kind));
            }
        }
    }

    /// First pipeline step for a fresh capture: push the photo to durable
    /// storage under the Analysis token.
    fn start_upload(&self, model: &mut Model, caps: &Capabilities) {
        let Some(client) = model.services.clone() else {
            model.reset_session();
            model.active_error = Some(AppError::new(ErrorKind::Config, "Missing credentials"));
            return;
        };
        let session_id = model.session.id;
        let token = model.registry.issue(OpCategory::Analysis);
        let path = client.new_object_path();
        model.session.storage_path = Some(path.clone());

        let built = match model.session.photo.as_ref() {
            Some(photo) => services::decode_photo(&photo.base64)
                .and_then(|bytes| client.upload(OUTFIT_PHOTOS_BUCKET, &path, bytes)),
            None => Err(stage_error(ErrorKind::Validation)
                .with_internal("upload requested without a photo")),
        };

        match built {
            Ok(request) => {
                caps.http.send(request, move |result| Event::PhotoUploaded {
                    session_id,
                    token,
                    result: Box::new(result),
                });
            }
            Err(e) => {
                warn!(error = %e, "could not start photo upload");
                self.abort_stage(model, OpCategory::Analysis, e.kind);
            }
        }
    }

    fn handle_photo_captured(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        result: crate::capabilities::camera::CameraResult,
    ) {
        let source = match model.capture {
            CaptureState::AwaitingCamera { source } => source,
            _ => CaptureSource::Camera,
        };
        model.capture = CaptureState::Idle;

        match result {
            Ok(image) => {
                let photo = PhotoCapture {
                    base64: image.base64,
                    width: image.width,
                    height: image.height,
                    source,
                };
                let session_id = model.supersede_session(photo);
                debug!(session = %session_id, ?source, "capture accepted; uploading");
                self.start_upload(model, caps);
            }
            Err(CameraError::PickerCancelled) => {
                debug!("gallery pick dismissed");
            }
            Err(e) => {
                warn!(error = %e, "capture failed");
                model.active_error = Some(e.into());
            }
        }
        caps.render.render();
    }

    fn handle_upload_result(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        session_id: SessionId,
        token: crate::registry::OpToken,
        result: HttpResult,
    ) {
        if self.is_stale(model, OpCategory::Analysis, token, session_id) {
            return;
        }
        let Some(client) = model.services.clone() else {
            return;
        };

        match result {
            Ok(response) if response.is_success() => {
                if let Some(path) = model.session.storage_path.clone() {
                    model.session.photo_url =
                        Some(client.public_url(OUTFIT_PHOTOS_BUCKET, &path));
                }
                model.transition(SessionState::Analyzing);
                model.in_flight.insert(
                    OpCategory::Analysis,
                    InFlightOp {
                        token,
                        session_id,
                        attempt: 1,
                        call: PendingCall::Analyze,
                    },
                );
                self.dispatch_call(
                    model,
                    caps,
                    OpCategory::Analysis,
                    token,
                    session_id,
                    PendingCall::Analyze,
                );
            }
            // Uploads are single-attempt; any failure ends the pipeline.
            Ok(response) => {
                let kind = FailureClass::of_status(response.status).kind();
                warn!(status = response.status, "photo upload rejected");
                self.abort_stage(model, OpCategory::Analysis, kind);
            }
            Err(e) => {
                warn!(error = %e, "photo upload failed");
                let kind = FailureClass::of_transport(&e).kind();
                self.abort_stage(model, OpCategory::Analysis, kind);
            }
        }
        caps.render.render();
    }

    fn handle_analysis_result(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        session_id: SessionId,
        token: crate::registry::OpToken,
        result: HttpResult,
    ) {
        if self.is_stale(model, OpCategory::Analysis, token, session_id) {
            return;
        }

        match result {
            Ok(response) if response.is_success() => {
                model.in_flight.remove(&OpCategory::Analysis);
                model.registry.cancel(OpCategory::Analysis);
                match services::parse_analysis(&response) {
                    Ok(services::AnalysisOutcome::InvalidPhoto) => {
                        debug!(session = %session_id, "no outfit in photo");
                        model.transition(SessionState::InvalidPhoto);
                        // The photo is never retained past this point.
                        model.session.photo = None;
                        let id = model.next_timer_id();
                        model.reset_timer = Some(id);
                        caps.timer
                            .start(id, INVALID_PHOTO_RESET_MS, Event::InvalidPhotoTimerElapsed);
                    }
                    Ok(services::AnalysisOutcome::Valid(analysis)) => {
                        model.transition(SessionState::Ready(analysis.clone()));
                        self.persist_analysis(model, caps, session_id, &analysis);
                    }
                    Err(e) => {
                        warn!(error = %e, "analysis response failed validation");
                        self.surface_failure(model, OpCategory::Analysis, e.kind);
                    }
                }
            }
            Ok(response) => {
                let class = FailureClass::of_status(response.status);
                if let Some(kind) = self.handle_stage_failure(model, caps, OpCategory::Analysis, class)
                {
                    self.surface_failure(model, OpCategory::Analysis, kind);
                }
            }
            Err(e) => {
                let class = FailureClass::of_transport(&e);
                if let Some(kind) = self.handle_stage_failure(model, caps, OpCategory::Analysis, class)
                {
                    self.surface_failure(model, OpCategory::Analysis, kind);
                }
            }
        }
        caps.render.render();
    }

    /// Fire-and-forget insert of the analysis row. Its id is attached to
    /// the session later, and only if the session is still current.
    fn persist_analysis(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        session_id: SessionId,
        analysis: &crate::model::AnalysisResult,
    ) {
        let Some(client) = model.services.clone() else {
            return;
        };
        match model
            .session
            .photo_url
            .as_deref()
            .map(|url| client.insert_analysis(url, analysis))
        {
            Some(Ok(request)) => {
                caps.http.send(request, move |result| Event::AnalysisRecordSaved {
                    session_id,
                    result: Box::new(result),
                });
            }
            Some(Err(e)) => warn!(error = %e, "could not build analysis insert"),
            None => warn!("photo url missing; skipping analysis insert"),
        }
    }

    fn handle_recommendations_result(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        session_id: SessionId,
        token: crate::registry::OpToken,
        result: HttpResult,
    ) {
        if self.is_stale(model, OpCategory::Recommendations, token, session_id) {
            return;
        }

        match result {
            Ok(response) if response.is_success() => {
                model.in_flight.remove(&OpCategory::Recommendations);
                model.registry.cancel(OpCategory::Recommendations);
                match services::parse_recommendations(&response) {
                    Ok(items) => {
                        let Some(analysis) = model.session.state.analysis().cloned() else {
                            return;
                        };
                        let regenerated = model.session.generation_count >= 1;
                        // Wholesale replacement, never a merge.
                        model.session.recommendations = items;
                        if regenerated {
                            model.favorites.clear();
                        }
                        model.session.generation_count += 1;
                        if model.session.favorites_namespace.is_none() {
                            model.session.favorites_namespace =
                                Some(analysis.outfit_name.clone());
                        }
                        model.transition(SessionState::Ready(analysis));
                        self.persist_recommendations(model, caps);
                    }
                    Err(e) => {
                        warn!(error = %e, "recommendations failed validation");
                        self.surface_failure(model, OpCategory::Recommendations, e.kind);
                    }
                }
            }
            Ok(response) => {
                let class = FailureClass::of_status(response.status);
                if let Some(kind) =
                    self.handle_stage_failure(model, caps, OpCategory::Recommendations, class)
                {
                    self.surface_failure(model, OpCategory::Recommendations, kind);
                }
            }
            Err(e) => {
                let class = FailureClass::of_transport(&e);
                if let Some(kind) =
                    self.handle_stage_failure(model, caps, OpCategory::Recommendations, class)
                {
                    self.surface_failure(model, OpCategory::Recommendations, kind);
                }
            }
        }
        caps.render.render();
    }

    /// Persisted only when the analysis row id has already arrived;
    /// otherwise skipped silently, not failed.
    fn persist_recommendations(&self, model: &mut Model, caps: &Capabilities) {
        let Some(client) = model.services.clone() else {
            return;
        };
        let Some(analysis_id) = model.session.analysis_id.clone() else {
            debug!("analysis id absent; skipping recommendation persist");
            return;
        };
        match client.insert_recommendations(&analysis_id, &model.session.recommendations) {
            Ok(request) => {
                caps.http.send(request, |result| Event::RecommendationsSaved {
                    result: Box::new(result),
                });
            }
            Err(e) => warn!(error = %e, "could not build recommendations insert"),
        }
    }

    fn handle_favorite_toggled(&self, model: &mut Model, caps: &Capabilities, index: usize) {
        let Some(client) = self.require_client(model) else {
            caps.render.render();
            return;
        };
        let Some(namespace) = model
            .session
            .favorites_namespace
            .clone()
            .or_else(|| model.session.state.analysis().map(|a| a.outfit_name.clone()))
        else {
            debug!("favorite toggle without an analysis; ignoring");
            return;
        };
        let Some(item) = model.session.recommendations.get(index).cloned() else {
            debug!(index, "favorite toggle out of bounds; ignoring");
            return;
        };

        let key = ItemKey::for_recommendation(&namespace, index);
        let session_id = model.session.id;
        match model.favorites.toggle(&key) {
            ToggleAction::Ignored => {
                debug!(%key, "favorite toggle ignored; already in flight");
            }
            ToggleAction::StartAdd => match client.add_favorite(&item) {
                Ok(request) => {
                    let key_for_event = key.clone();
                    caps.http.send(request, move |result| Event::FavoriteAddResolved {
                        session_id,
                        key: key_for_event,
                        result: Box::new(result),
                    });
                    caps.render.render();
                }
                Err(e) => {
                    model.favorites.rollback_add(&key);
                    model.active_error = Some(e);
                    caps.render.render();
                }
            },
            ToggleAction::StartRemove { id } => match client.remove_favorite(&id) {
                Ok(request) => {
                    let key_for_event = key.clone();
                    let removed_id = id;
                    caps.http.send(request, move |result| {
                        Event::FavoriteRemoveResolved {
                            session_id,
                            key: key_for_event,
                            removed_id,
                            result: Box::new(result),
                        }
                    });
                    caps.render.render();
                }
                Err(e) => {
                    model.favorites.rollback_remove(&key, id);
                    model.active_error = Some(e);
                    caps.render.render();
                }
            },
        }
    }

    fn handle_favorite_add_resolved(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        session_id: SessionId,
        key: &ItemKey,
        result: HttpResult,
    ) {
        if session_id != model.session.id {
            // The map this toggle belonged to is already gone.
            model.favorites.clear_in_flight(key);
            return;
        }
        match result {
            Ok(response) if response.is_success() => {
                match services::parse_inserted_id(&response) {
                    Ok(id) => model.favorites.resolve_add(key, id),
                    Err(e) => {
                        warn!(error = %e, "favorite insert returned no id; rolling back");
                        model.favorites.rollback_add(key);
                        model.active_error = Some(e);
                    }
                }
            }
            Ok(response) => {
                warn!(status = response.status, %key, "favorite add rejected");
                model.favorites.rollback_add(key);
                model.active_error =
                    Some(stage_error(FailureClass::of_status(response.status).kind()));
            }
            Err(e) => {
                warn!(error = %e, %key, "favorite add failed");
                model.favorites.rollback_add(key);
                model.active_error = Some(stage_error(FailureClass::of_transport(&e).kind()));
            }
        }
        caps.render.render();
    }

    fn handle_favorite_remove_resolved(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        session_id: SessionId,
        key: &ItemKey,
        removed_id: String,
        result: HttpResult,
    ) {
        if session_id != model.session.id {
            model.favorites.clear_in_flight(key);
            return;
        }
        match result {
            Ok(response) if response.is_success() => {
                model.favorites.resolve_remove(key);
            }
            Ok(response) => {
                warn!(status = response.status, %key, "favorite delete rejected");
                model.favorites.rollback_remove(key, removed_id);
                model.active_error =
                    Some(stage_error(FailureClass::of_status(response.status).kind()));
            }
            Err(e) => {
                warn!(error = %e, %key, "favorite delete failed");
                model.favorites.rollback_remove(key, removed_id);
                model.active_error = Some(stage_error(FailureClass::of_transport(&e).kind()));
            }
        }
        caps.render.render();
    }

    fn handle_try_on_result(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        session_id: SessionId,
        token: crate::registry::OpToken,
        result: HttpResult,
    ) {
        if self.is_stale(model, OpCategory::TryOn, token, session_id) {
            return;
        }
        let TryOnState::Generating { garment_url } = model.try_on.clone() else {
            debug!("try-on response outside Generating; dropping");
            return;
        };

        match result {
            Ok(response) if response.is_success() => {
                match services::parse_try_on(&response) {
                    Ok(image) => {
                        // Retry budget is spent; the storage write that
                        // follows is single-attempt.
                        model.in_flight.remove(&OpCategory::TryOn);
                        let Some(client) = model.services.clone() else {
                            return;
                        };
                        let path = client.new_object_path();
                        let built = services::decode_photo(&image.base64).and_then(|bytes| {
                            client.upload(TRY_ON_RESULTS_BUCKET, &path, bytes)
                        });
                        match built {
                            Ok(request) => {
                                model.try_on = TryOnState::UploadingResult {
                                    garment_url,
                                    image,
                                    storage_path: path,
                                };
                                caps.http.send(request, move |result| {
                                    Event::TryOnResultUploaded {
                                        session_id,
                                        token,
                                        result: Box::new(result),
                                    }
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, "could not store try-on composite");
                                self.abort_stage(model, OpCategory::TryOn, e.kind);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "try-on response failed validation");
                        self.abort_stage(model, OpCategory::TryOn, e.kind);
                    }
                }
            }
            Ok(response) => {
                let class = FailureClass::of_status(response.status);
                if let Some(kind) = self.handle_stage_failure(model, caps, OpCategory::TryOn, class)
                {
                    self.surface_failure(model, OpCategory::TryOn, kind);
                }
            }
            Err(e) => {
                let class = FailureClass::of_transport(&e);
                if let Some(kind) = self.handle_stage_failure(model, caps, OpCategory::TryOn, class)
                {
                    self.surface_failure(model, OpCategory::TryOn, kind);
                }
            }
        }
        caps.render.render();
    }

    fn handle_try_on_uploaded(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        session_id: SessionId,
        token: crate::registry::OpToken,
        result: HttpResult,
    ) {
        if self.is_stale(model, OpCategory::TryOn, token, session_id) {
            return;
        }
        let TryOnState::UploadingResult {
            garment_url,
            image,
            storage_path,
        } = model.try_on.clone()
        else {
            return;
        };
        model.registry.cancel(OpCategory::TryOn);

        match result {
            Ok(response) if response.is_success() => {
                model.try_on = TryOnState::Ready {
                    garment_url: garment_url.clone(),
                    image,
                    storage_path: storage_path.clone(),
                    video: VideoState::NotStarted,
                };
                if let Some(client) = model.services.clone() {
                    match client.save_try_on(&storage_path, &garment_url) {
                        Ok(request) => {
                            caps.http.send(request, |result| Event::TryOnRecordSaved {
                                result: Box::new(result),
                            });
                        }
                        Err(e) => warn!(error = %e, "could not build try-on record insert"),
                    }
                }
            }
            Ok(response) => {
                warn!(status = response.status, "try-on result upload rejected");
                model.try_on = TryOnState::Idle;
                model.active_error =
                    Some(stage_error(FailureClass::of_status(response.status).kind()));
            }
            Err(e) => {
                warn!(error = %e, "try-on result upload failed");
                model.try_on = TryOnState::Idle;
                model.active_error = Some(stage_error(FailureClass::of_transport(&e).kind()));
            }
        }
        caps.render.render();
    }

    fn handle_video_result(
        &self,
        model: &mut Model,
        caps: &Capabilities,
        session_id: SessionId,
        token: crate::registry::OpToken,
        result: HttpResult,
    ) {
        if self.is_stale(model, OpCategory::VideoGeneration, token, session_id) {
            return;
        }

        match result {
            Ok(response) if response.is_success() => {
                model.in_flight.remove(&OpCategory::VideoGeneration);
                model.registry.cancel(OpCategory::VideoGeneration);
                match services::parse_video(&response) {
                    Ok(url) => {
                        if let TryOnState::Ready { video, .. } = &mut model.try_on {
                            *video = VideoState::Ready { url };
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "video response failed validation");
                        self.surface_failure(model, OpCategory::VideoGeneration, e.kind);
                    }
                }
            }
            Ok(response) => {
                let class = FailureClass::of_status(response.status);
                if let Some(kind) =
                    self.handle_stage_failure(model, caps, OpCategory::VideoGeneration, class)
                {
                    self.surface_failure(model, OpCategory::VideoGeneration, kind);
                }
            }
            Err(e) => {
                let class = FailureClass::of_transport(&e);
                if let Some(kind) =
                    self.handle_stage_failure(model, caps, OpCategory::VideoGeneration, class)
                {
                    self.surface_failure(model, OpCategory::VideoGeneration, kind);
                }
            }
        }
        caps.render.render();
    }

    fn handle_rename(&self, model: &mut Model, caps: &Capabilities, name: &str) {
        let trimmed = name.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= crate::MAX_OUTFIT_NAME_LEN
            && trimmed.chars().all(|c| c.is_ascii_alphabetic() || c == ' ');
        if !valid {
            model.active_error = Some(AppError::new(
                ErrorKind::Validation,
                "Outfit names can only contain letters and spaces, up to 30 characters.",
            ));
            caps.render.render();
            return;
        }

        match &mut model.session.state {
            SessionState::Ready(result)
            | SessionState::GeneratingRecommendations(result)
            | SessionState::RecommendationsFailed(result, _) => {
                result.outfit_name = trimmed.to_string();
            }
            _ => {
                debug!("rename outside a result state; ignoring");
                return;
            }
        }

        if let (Some(client), Some(analysis_id)) =
            (model.services.clone(), model.session.analysis_id.clone())
        {
            match client.rename_analysis(&analysis_id, trimmed) {
                Ok(request) => {
                    caps.http.send(request, |result| Event::OutfitNameSaved {
                        result: Box::new(result),
                    });
                }
                Err(e) => warn!(error = %e, "could not build rename request"),
            }
        } else {
            debug!("analysis id absent; rename stays local");
        }
        caps.render.render();
    }

    fn log_persistence_outcome(&self, what: &'static str, result: &HttpResult) {
        match result {
            Ok(response) if response.is_success() => {
                debug!(what, "background persist succeeded");
            }
            Ok(response) => {
                warn!(what, status = response.status, "background persist rejected");
            }
            Err(e) => {
                warn!(what, error = %e, "background persist failed");
            }
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        debug!(event = event.name(), "update");
        match event {
            Event::Started { config } => {
                match ServiceClient::new(config) {
                    Ok(client) => {
                        match client.fetch_profile() {
                            Ok(request) => {
                                caps.http.send(request, |result| Event::ProfileLoaded {
                                    result: Box::new(result),
                                });
                            }
                            Err(e) => warn!(error = %e, "could not build profile request"),
                        }
                        model.services = Some(client);
                        model.active_error = None;
                    }
                    Err(e) => {
                        warn!(error = %e, "configuration rejected");
                        model.active_error = Some(e);
                    }
                }
                caps.render.render();
            }

            Event::ProfileLoaded { result } => match *result {
                Ok(response) if response.is_success() => {
                    match services::parse_profile(&response) {
                        Ok(Some(profile)) => model.profile = Some(profile),
                        Ok(None) => debug!("no style profile on record"),
                        Err(e) => warn!(error = %e, "profile failed validation"),
                    }
                }
                Ok(response) => warn!(status = response.status, "profile fetch rejected"),
                Err(e) => warn!(error = %e, "profile fetch failed"),
            },

            Event::ShutterPressed => {
                if self.require_client(model).is_none() {
                    caps.render.render();
                    return;
                }
                if model.is_processing() || !matches!(model.capture, CaptureState::Idle) {
                    debug!("shutter press ignored; busy");
                    return;
                }
                let timer_id = model.next_timer_id();
                model.capture = CaptureState::Holding { timer_id };
                caps.timer
                    .start(timer_id, CAPTURE_HOLD_MS, Event::CaptureHoldElapsed);
                caps.haptics.start(HapticPattern::HoldTick);
                caps.render.render();
            }

            Event::ShutterReleased => {
                if let CaptureState::Holding { .. } = model.capture {
                    // Early release: the armed timer id dies with this
                    // state and its expiry will be ignored.
                    model.capture = CaptureState::Idle;
                    caps.haptics.stop();
                    caps.render.render();
                }
            }

            Event::CaptureHoldElapsed(fired) => match model.capture {
                CaptureState::Holding { timer_id } if timer_id == fired.id => {
                    model.capture = CaptureState::AwaitingCamera {
                        source: CaptureSource::Camera,
                    };
                    caps.haptics.stop();
                    caps.haptics.start(HapticPattern::CaptureConfirm);
                    caps.camera
                        .capture_photo(CaptureConfig::default(), |result| Event::PhotoCaptured {
                            result: Box::new(result),
                        });
                    caps.render.render();
                }
                _ => debug!("stale hold timer; ignoring"),
            },

            Event::GalleryPickRequested => {
                if self.require_client(model).is_none() {
                    caps.render.render();
                    return;
                }
                if model.is_processing() || !matches!(model.capture, CaptureState::Idle) {
                    debug!("gallery pick ignored; busy");
                    return;
                }
                model.capture = CaptureState::AwaitingCamera {
                    source: CaptureSource::Gallery,
                };
                caps.camera.pick_from_gallery(|result| Event::PhotoCaptured {
                    result: Box::new(result),
                });
                caps.render.render();
            }

            Event::PhotoCaptured { result } => {
                self.handle_photo_captured(model, caps, *result);
            }

            Event::PhotoUploaded {
                session_id,
                token,
                result,
            } => {
                self.handle_upload_result(model, caps, session_id, token, *result);
            }

            Event::AnalysisReceived {
                session_id,
                token,
                result,
            } => {
                self.handle_analysis_result(model, caps, session_id, token, *result);
            }

            Event::AnalysisRecordSaved { session_id, result } => {
                if session_id != model.session.id {
                    debug!("analysis record saved for a dead session; dropping id");
                    return;
                }
                match *result {
                    Ok(response) if response.is_success() => {
                        match services::parse_inserted_id(&response) {
                            Ok(id) => {
                                debug!(analysis_id = %id, "analysis id attached");
                                model.session.analysis_id = Some(id);
                            }
                            Err(e) => warn!(error = %e, "analysis insert returned no id"),
                        }
                    }
                    Ok(response) => {
                        warn!(status = response.status, "analysis insert rejected");
                    }
                    Err(e) => warn!(error = %e, "analysis insert failed"),
                }
            }

            Event::InvalidPhotoTimerElapsed(fired) => {
                if model.reset_timer == Some(fired.id)
                    && matches!(model.session.state, SessionState::InvalidPhoto)
                {
                    model.reset_session();
                    caps.render.render();
                } else {
                    debug!("stale invalid-photo timer; ignoring");
                }
            }

            Event::GenerateRecommendations => {
                if !model.session.can_generate() {
                    debug!("generate refused; wrong state");
                    return;
                }
                let Some(analysis) = model.session.state.analysis().cloned() else {
                    return;
                };
                model.transition(SessionState::GeneratingRecommendations(analysis));
                self.start_stage(model, caps, OpCategory::Recommendations, PendingCall::Search);
                caps.render.render();
            }

            Event::RegenerateRecommendations => {
                if !model.session.can_regenerate() {
                    debug!("regenerate refused; budget spent or wrong state");
                    return;
                }
                let Some(analysis) = model.session.state.analysis().cloned() else {
                    return;
                };
                model.transition(SessionState::GeneratingRecommendations(analysis));
                self.start_stage(model, caps, OpCategory::Recommendations, PendingCall::Search);
                caps.render.render();
            }

            Event::RecommendationsReceived {
                session_id,
                token,
                result,
            } => {
                self.handle_recommendations_result(model, caps, session_id, token, *result);
            }

            Event::RecommendationsSaved { result } => {
                self.log_persistence_outcome("recommendations", &result);
            }

            Event::OutfitRenamed { name } => {
                self.handle_rename(model, caps, &name);
            }

            Event::OutfitNameSaved { result } => {
                self.log_persistence_outcome("outfit_name", &result);
            }

            Event::FavoriteToggled { index } => {
                self.handle_favorite_toggled(model, caps, index);
            }

            Event::FavoriteAddResolved {
                session_id,
                key,
                result,
            } => {
                self.handle_favorite_add_resolved(model, caps, session_id, &key, *result);
            }

            Event::FavoriteRemoveResolved {
                session_id,
                key,
                removed_id,
                result,
            } => {
                self.handle_favorite_remove_resolved(
                    model, caps, session_id, &key, removed_id, *result,
                );
            }

            Event::TryOnRequested { garment_url } => {
                if self.require_client(model).is_none() {
                    caps.render.render();
                    return;
                }
                if model.session.photo.is_none() {
                    debug!("try-on without a session photo; ignoring");
                    return;
                }
                if matches!(
                    model.try_on,
                    TryOnState::Generating { .. } | TryOnState::UploadingResult { .. }
                ) {
                    debug!("try-on already running; ignoring");
                    return;
                }
                model.try_on = TryOnState::Generating {
                    garment_url: garment_url.clone(),
                };
                self.start_stage(
                    model,
                    caps,
                    OpCategory::TryOn,
                    PendingCall::TryOn { garment_url },
                );
                caps.render.render();
            }

            Event::TryOnReceived {
                session_id,
                token,
                result,
            } => {
                self.handle_try_on_result(model, caps, session_id, token, *result);
            }

            Event::TryOnResultUploaded {
                session_id,
                token,
                result,
            } => {
                self.handle_try_on_uploaded(model, caps, session_id, token, *result);
            }

            Event::TryOnRecordSaved { result } => {
                self.log_persistence_outcome("try_on_record", &result);
            }

            Event::TryOnClosed => {
                model.registry.cancel(OpCategory::TryOn);
                model.registry.cancel(OpCategory::VideoGeneration);
                model.in_flight.remove(&OpCategory::TryOn);
                model.in_flight.remove(&OpCategory::VideoGeneration);
                model.try_on = TryOnState::Idle;
                caps.render.render();
            }

            Event::GenerateVideoRequested => {
                let TryOnState::Ready {
                    storage_path,
                    video,
                    ..
                } = &model.try_on
                else {
                    debug!("video request without a composite; ignoring");
                    return;
                };
                if matches!(video, VideoState::Generating | VideoState::Ready { .. }) {
                    debug!("video already running or done; ignoring");
                    return;
                }
                let image_path = storage_path.clone();
                if let TryOnState::Ready { video, .. } = &mut model.try_on {
                    *video = VideoState::Generating;
                }
                self.start_stage(
                    model,
                    caps,
                    OpCategory::VideoGeneration,
                    PendingCall::GenerateVideo { image_path },
                );
                caps.render.render();
            }

            Event::VideoReceived {
                session_id,
                token,
                result,
            } => {
                self.handle_video_result(model, caps, session_id, token, *result);
            }

            Event::RetryDelayElapsed { category, token } => {
                if !model.registry.is_current(category, token) {
                    debug!(category = category.name(), "retry abandoned; token superseded");
                    return;
                }
                let Some(entry) = model.in_flight.get_mut(&category) else {
                    return;
                };
                if entry.token != token {
                    return;
                }
                entry.attempt += 1;
                let session_id = entry.session_id;
                let call = entry.call.clone();
                debug!(
                    category = category.name(),
                    attempt = entry.attempt,
                    "retrying stage"
                );
                self.dispatch_call(model, caps, category, token, session_id, call);
            }

            Event::SessionDiscarded | Event::ScreenClosed => {
                model.reset_session();
                caps.render.render();
            }

            Event::ErrorDismissed => {
                model.active_error = None;
                caps.render.render();
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        let phase = match &model.session.state {
            SessionState::Idle => Phase::Idle,
            SessionState::Capturing => Phase::Capturing,
            SessionState::Uploading => Phase::Uploading,
            SessionState::Analyzing => Phase::Analyzing,
            SessionState::InvalidPhoto => Phase::InvalidPhoto,
            SessionState::AnalysisFailed(_) => Phase::AnalysisFailed,
            SessionState::Ready(_) => Phase::Ready,
            SessionState::GeneratingRecommendations(_) => Phase::GeneratingRecommendations,
            SessionState::RecommendationsFailed(..) => Phase::RecommendationsFailed,
        };

        let analysis = model.session.state.analysis();
        let outfit = analysis.map(|a| OutfitView {
            name: a.outfit_name.clone(),
            rating: a.rating,
            description: a.short_description.clone(),
            can_generate: model.session.can_generate(),
            can_regenerate: model.session.can_regenerate(),
        });

        let namespace = model
            .session
            .favorites_namespace
            .clone()
            .or_else(|| analysis.map(|a| a.outfit_name.clone()));
        let recommendations = model
            .session
            .recommendations
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let key = namespace
                    .as_deref()
                    .map(|ns| ItemKey::for_recommendation(ns, index));
                RecommendationView {
                    name: item.name.clone(),
                    brand: item.brand.clone(),
                    description: item.description.clone(),
                    price: item.price.clone(),
                    image_url: item.image_url.clone(),
                    purchase_url: item.purchase_url.clone(),
                    category: item.category.clone(),
                    is_favorite: key
                        .as_ref()
                        .is_some_and(|k| model.favorites.is_favorite(k)),
                    favorite_pending: key
                        .as_ref()
                        .is_some_and(|k| model.favorites.is_pending(k)),
                }
            })
            .collect();

        let try_on = match &model.try_on {
            TryOnState::Idle => TryOnView::default(),
            TryOnState::Generating { .. } | TryOnState::UploadingResult { .. } => TryOnView {
                visible: true,
                loading: true,
                ..TryOnView::default()
            },
            TryOnState::Ready { image, video, .. } => TryOnView {
                visible: true,
                loading: false,
                data_uri: Some(image.data_uri.clone()),
                video_loading: matches!(video, VideoState::Generating),
                video_url: match video {
                    VideoState::Ready { url } => Some(url.clone()),
                    _ => None,
                },
                video_failed: matches!(video, VideoState::Failed),
            },
        };

        let error = model
            .active_error
            .as_ref()
            .filter(|e| e.kind != ErrorKind::Cancelled)
            .map(|e| ErrorView {
                code: e.code().to_string(),
                message: e.user_facing_message(),
            })
            .or_else(|| match &model.session.state {
                SessionState::AnalysisFailed(kind)
                | SessionState::RecommendationsFailed(_, kind)
                    if *kind != ErrorKind::Cancelled =>
                {
                    let err = stage_error(*kind);
                    Some(ErrorView {
                        code: err.code().to_string(),
                        message: err.user_facing_message(),
                    })
                }
                _ => None,
            });

        ViewModel {
            phase,
            capture_hold_active: matches!(model.capture, CaptureState::Holding { .. }),
            outfit,
            recommendations,
            try_on,
            error,
        }
    }
}
