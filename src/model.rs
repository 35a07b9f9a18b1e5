//! Domain state. Everything the shells render is derived from `Model`;
//! everything that mutates it goes through `App::update`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::capabilities::timer::TimerId;
use crate::favorites::FavoritesManager;
use crate::registry::{CancellationRegistry, OpCategory, OpToken};
use crate::services::ServiceClient;
use crate::{AppError, ErrorKind, SessionId, MAX_REGENERATIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureSource {
    Camera,
    Gallery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoCapture {
    /// Base64 JPEG, exactly as the shell delivered it.
    pub base64: String,
    pub width: u32,
    pub height: u32,
    pub source: CaptureSource,
}

/// Style profile used to personalize analysis and product search.
/// Loaded best-effort; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub age_range: Option<String>,
    #[serde(default)]
    pub style_preference: Option<String>,
    #[serde(default)]
    pub budget_range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub outfit_name: String,
    /// Always an integer in 1..=10; anything else was rejected upstream.
    pub rating: u8,
    pub short_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub name: String,
    pub brand: String,
    pub description: String,
    pub price: String,
    pub image_url: String,
    pub purchase_url: String,
    /// Product category used to group saved items; `"other"` when the
    /// search service omits it.
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryOnImage {
    pub base64: String,
    pub data_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Capturing,
    Uploading,
    Analyzing,
    InvalidPhoto,
    AnalysisFailed(ErrorKind),
    Ready(AnalysisResult),
    GeneratingRecommendations(AnalysisResult),
    RecommendationsFailed(AnalysisResult, ErrorKind),
}

impl SessionState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Uploading => "uploading",
            Self::Analyzing => "analyzing",
            Self::InvalidPhoto => "invalid_photo",
            Self::AnalysisFailed(_) => "analysis_failed",
            Self::Ready(_) => "ready",
            Self::GeneratingRecommendations(_) => "generating_recommendations",
            Self::RecommendationsFailed(..) => "recommendations_failed",
        }
    }

    /// States during which new captures are refused.
    #[must_use]
    pub const fn is_processing(&self) -> bool {
        matches!(
            self,
            Self::Capturing
                | Self::Uploading
                | Self::Analyzing
                | Self::GeneratingRecommendations(_)
        )
    }

    /// The analysis result currently on display, if any.
    #[must_use]
    pub const fn analysis(&self) -> Option<&AnalysisResult> {
        match self {
            Self::Ready(result)
            | Self::GeneratingRecommendations(result)
            | Self::RecommendationsFailed(result, _) => Some(result),
            _ => None,
        }
    }

    #[must_use]
    pub fn can_transition(&self, next: &Self) -> bool {
        use SessionState as S;
        // Discard is legal from anywhere.
        if matches!(next, S::Idle) {
            return true;
        }
        matches!(
            (self, next),
            (S::Idle, S::Capturing | S::Uploading)
                | (S::Capturing, S::Uploading)
                | (S::Uploading, S::Analyzing | S::AnalysisFailed(_))
                | (
                    S::Analyzing,
                    S::Ready(_) | S::InvalidPhoto | S::AnalysisFailed(_)
                )
                | (S::Ready(_), S::GeneratingRecommendations(_))
                | (
                    S::GeneratingRecommendations(_),
                    S::Ready(_) | S::RecommendationsFailed(..)
                )
                | (S::RecommendationsFailed(..), S::GeneratingRecommendations(_))
        )
    }
}

/// One photo's trip through the pipeline. A new capture never reuses a
/// session; it supersedes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub photo: Option<PhotoCapture>,
    pub state: SessionState,
    /// Durable public URL of the uploaded photo; set before analysis
    /// results become observable.
    pub photo_url: Option<String>,
    pub storage_path: Option<String>,
    /// Attached asynchronously by the fire-and-forget analysis insert.
    pub analysis_id: Option<String>,
    pub recommendations: Vec<RecommendationItem>,
    /// 0 = never generated, 1 = first generation, 2 = regenerated.
    pub generation_count: u32,
    /// Outfit name at the time recommendations first arrived. Favorite
    /// keys derive from this so a later rename cannot orphan them.
    pub favorites_namespace: Option<String>,
}

impl Session {
    #[must_use]
    pub fn idle(id: SessionId) -> Self {
        Self {
            id,
            photo: None,
            state: SessionState::Idle,
            photo_url: None,
            storage_path: None,
            analysis_id: None,
            recommendations: Vec::new(),
            generation_count: 0,
            favorites_namespace: None,
        }
    }

    /// A failed first generation offers the same generate action again;
    /// the count only advances on success.
    #[must_use]
    pub fn can_generate(&self) -> bool {
        matches!(
            self.state,
            SessionState::Ready(_) | SessionState::RecommendationsFailed(..)
        ) && self.generation_count == 0
    }

    #[must_use]
    pub fn can_regenerate(&self) -> bool {
        matches!(
            self.state,
            SessionState::Ready(_) | SessionState::RecommendationsFailed(..)
        ) && self.generation_count >= 1
            && self.generation_count <= MAX_REGENERATIONS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    /// Shutter held; waiting for the hold timer.
    Holding { timer_id: TimerId },
    /// Hold completed (or gallery picker open); waiting for the shell.
    AwaitingCamera { source: CaptureSource },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoState {
    NotStarted,
    Generating,
    Ready { url: String },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryOnState {
    Idle,
    Generating {
        garment_url: String,
    },
    /// Composite received; persisting it to storage before display.
    UploadingResult {
        garment_url: String,
        image: TryOnImage,
        storage_path: String,
    },
    Ready {
        garment_url: String,
        image: TryOnImage,
        storage_path: String,
        video: VideoState,
    },
}

impl TryOnState {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// What gets re-sent when a retry timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingCall {
    Analyze,
    Search,
    TryOn { garment_url: String },
    GenerateVideo { image_path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightOp {
    pub token: OpToken,
    pub session_id: SessionId,
    /// Attempts already made, including the one outstanding.
    pub attempt: u32,
    pub call: PendingCall,
}

#[derive(Debug, Default)]
pub struct Model {
    pub services: Option<ServiceClient>,
    pub profile: Option<UserProfile>,
    pub session: Session,
    pub registry: CancellationRegistry,
    pub in_flight: HashMap<OpCategory, InFlightOp>,
    pub capture: CaptureState,
    pub favorites: FavoritesManager,
    pub try_on: TryOnState,
    pub active_error: Option<AppError>,
    /// Armed id for the invalid-photo reset timer.
    pub reset_timer: Option<TimerId>,
    next_session: u64,
    next_timer: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::idle(SessionId(1))
    }
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::Idle
    }
}

impl Default for TryOnState {
    fn default() -> Self {
        Self::Idle
    }
}

impl Model {
    #[must_use]
    pub fn next_timer_id(&mut self) -> TimerId {
        self.next_timer += 1;
        TimerId(self.next_timer)
    }

    fn fresh_session_id(&mut self) -> SessionId {
        self.next_session = self.next_session.max(self.session.id.0) + 1;
        SessionId(self.next_session)
    }

    /// Tears down the current session entirely and starts a fresh one
    /// already in `Uploading` with the given photo.
    pub fn supersede_session(&mut self, photo: PhotoCapture) -> SessionId {
        self.teardown();
        let id = self.fresh_session_id();
        self.session = Session {
            photo: Some(photo),
            state: SessionState::Uploading,
            ..Session::idle(id)
        };
        id
    }

    /// Discard: back to a fresh Idle session with nothing retained.
    pub fn reset_session(&mut self) {
        self.teardown();
        let id = self.fresh_session_id();
        self.session = Session::idle(id);
    }

    fn teardown(&mut self) {
        self.registry.cancel_all();
        self.in_flight.clear();
        self.favorites.clear();
        self.try_on = TryOnState::Idle;
        self.capture = CaptureState::Idle;
        self.reset_timer = None;
        self.active_error = None;
    }

    /// Applies a state transition if it is legal; illegal ones are
    /// logged and dropped rather than corrupting the session.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.session.state.can_transition(&next) {
            tracing::debug!(
                session = %self.session.id,
                from = self.session.state.name(),
                to = next.name(),
                "session transition"
            );
            self.session.state = next;
            true
        } else {
            tracing::warn!(
                session = %self.session.id,
                from = self.session.state.name(),
                to = next.name(),
                "illegal session transition ignored"
            );
            false
        }
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.session.state.is_processing()
            || matches!(self.capture, CaptureState::AwaitingCamera { .. })
    }
}

// --- View projection ------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Capturing,
    Uploading,
    Analyzing,
    InvalidPhoto,
    AnalysisFailed,
    Ready,
    GeneratingRecommendations,
    RecommendationsFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutfitView {
    pub name: String,
    pub rating: u8,
    pub description: String,
    pub can_generate: bool,
    pub can_regenerate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationView {
    pub name: String,
    pub brand: String,
    pub description: String,
    pub price: String,
    pub image_url: String,
    pub purchase_url: String,
    pub category: String,
    pub is_favorite: bool,
    pub favorite_pending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryOnView {
    pub visible: bool,
    pub loading: bool,
    pub data_uri: Option<String>,
    pub video_loading: bool,
    pub video_url: Option<String>,
    pub video_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorView {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewModel {
    pub phase: Phase,
    pub capture_hold_active: bool,
    pub outfit: Option<OutfitView>,
    pub recommendations: Vec<RecommendationView>,
    pub try_on: TryOnView,
    pub error: Option<ErrorView>,
}
