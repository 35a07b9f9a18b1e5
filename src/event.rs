use serde::{Deserialize, Serialize};

use crate::capabilities::camera::CameraResult;
use crate::capabilities::http::HttpResult;
use crate::capabilities::timer::TimerFired;
use crate::favorites::ItemKey;
use crate::registry::{OpCategory, OpToken};
use crate::services::ApiConfig;
use crate::SessionId;

/// Every input to the core: user gestures, shell responses, timer
/// expiries. Response variants carry the session id and token they were
/// started under so the handlers can drop stale ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Lifecycle
    Started { config: ApiConfig },
    ProfileLoaded { result: Box<HttpResult> },
    ScreenClosed,

    // Capture
    ShutterPressed,
    ShutterReleased,
    CaptureHoldElapsed(TimerFired),
    GalleryPickRequested,
    PhotoCaptured { result: Box<CameraResult> },

    // Analysis pipeline
    PhotoUploaded {
        session_id: SessionId,
        token: OpToken,
        result: Box<HttpResult>,
    },
    AnalysisReceived {
        session_id: SessionId,
        token: OpToken,
        result: Box<HttpResult>,
    },
    AnalysisRecordSaved {
        session_id: SessionId,
        result: Box<HttpResult>,
    },
    InvalidPhotoTimerElapsed(TimerFired),

    // Recommendations
    GenerateRecommendations,
    RegenerateRecommendations,
    RecommendationsReceived {
        session_id: SessionId,
        token: OpToken,
        result: Box<HttpResult>,
    },
    RecommendationsSaved { result: Box<HttpResult> },

    // Outfit rename
    OutfitRenamed { name: String },
    OutfitNameSaved { result: Box<HttpResult> },

    // Favorites
    FavoriteToggled { index: usize },
    FavoriteAddResolved {
        session_id: SessionId,
        key: ItemKey,
        result: Box<HttpResult>,
    },
    FavoriteRemoveResolved {
        session_id: SessionId,
        key: ItemKey,
        removed_id: String,
        result: Box<HttpResult>,
    },

    // Try-on
    TryOnRequested { garment_url: String },
    TryOnReceived {
        session_id: SessionId,
        token: OpToken,
        result: Box<HttpResult>,
    },
    TryOnResultUploaded {
        session_id: SessionId,
        token: OpToken,
        result: Box<HttpResult>,
    },
    TryOnRecordSaved { result: Box<HttpResult> },
    TryOnClosed,
    GenerateVideoRequested,
    VideoReceived {
        session_id: SessionId,
        token: OpToken,
        result: Box<HttpResult>,
    },

    // Retry scheduling
    RetryDelayElapsed {
        category: OpCategory,
        token: OpToken,
    },

    // Session control
    SessionDiscarded,
    ErrorDismissed,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::ProfileLoaded { .. } => "profile_loaded",
            Self::ScreenClosed => "screen_closed",
            Self::ShutterPressed => "shutter_pressed",
            Self::ShutterReleased => "shutter_released",
            Self::CaptureHoldElapsed(_) => "capture_hold_elapsed",
            Self::GalleryPickRequested => "gallery_pick_requested",
            Self::PhotoCaptured { .. } => "photo_captured",
            Self::PhotoUploaded { .. } => "photo_uploaded",
            Self::AnalysisReceived { .. } => "analysis_received",
            Self::AnalysisRecordSaved { .. } => "analysis_record_saved",
            Self::InvalidPhotoTimerElapsed(_) => "invalid_photo_timer_elapsed",
            Self::GenerateRecommendations => "generate_recommendations",
            Self::RegenerateRecommendations => "regenerate_recommendations",
            Self::RecommendationsReceived { .. } => "recommendations_received",
            Self::RecommendationsSaved { .. } => "recommendations_saved",
            Self::OutfitRenamed { .. } => "outfit_renamed",
            Self::OutfitNameSaved { .. } => "outfit_name_saved",
            Self::FavoriteToggled { .. } => "favorite_toggled",
            Self::FavoriteAddResolved { .. } => "favorite_add_resolved",
            Self::FavoriteRemoveResolved { .. } => "favorite_remove_resolved",
            Self::TryOnRequested { .. } => "try_on_requested",
            Self::TryOnReceived { .. } => "try_on_received",
            Self::TryOnResultUploaded { .. } => "try_on_result_uploaded",
            Self::TryOnRecordSaved { .. } => "try_on_record_saved",
            Self::TryOnClosed => "try_on_closed",
            Self::GenerateVideoRequested => "generate_video_requested",
            Self::VideoReceived { .. } => "video_received",
            Self::RetryDelayElapsed { .. } => "retry_delay_elapsed",
            Self::SessionDiscarded => "session_discarded",
            Self::ErrorDismissed => "error_dismissed",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::ShutterPressed
                | Self::ShutterReleased
                | Self::GalleryPickRequested
                | Self::GenerateRecommendations
                | Self::RegenerateRecommendations
                | Self::OutfitRenamed { .. }
                | Self::FavoriteToggled { .. }
                | Self::TryOnRequested { .. }
                | Self::TryOnClosed
                | Self::GenerateVideoRequested
                | Self::SessionDiscarded
                | Self::ErrorDismissed
                | Self::ScreenClosed
        )
    }
}
