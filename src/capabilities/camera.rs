use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::Event;
use crate::{AppError, ErrorKind};

pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_MAX_DIMENSION: u32 = 2048;

/// Shell-side camera access. The shell returns captured images already
/// encoded as base64 JPEG, which is the form the styling services consume.
pub struct Camera<E> {
    context: CapabilityContext<CameraOperation, E>,
}

impl<Ev> Capability<Ev> for Camera<Ev> {
    type Operation = CameraOperation;
    type MappedSelf<MappedEv> = Camera<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Camera::new(self.context.map_event(f))
    }
}

impl<E> Camera<E>
where
    E: Send + 'static,
{
    pub fn new(context: CapabilityContext<CameraOperation, E>) -> Self {
        Self { context }
    }

    pub fn capture_photo<F>(&self, config: CaptureConfig, make_event: F)
    where
        F: FnOnce(CameraResult) -> E + Send + 'static,
    {
        let config = config.validated();
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(CameraOperation::CapturePhoto { config })
                .await;
            context.update_app(make_event(result));
        });
    }

    pub fn pick_from_gallery<F>(&self, make_event: F)
    where
        F: FnOnce(CameraResult) -> E + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(CameraOperation::PickFromGallery)
                .await;
            context.update_app(make_event(result));
        });
    }
}

pub type CameraCapability = Camera<Event>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraOperation {
    CapturePhoto { config: CaptureConfig },
    PickFromGallery,
}

impl Operation for CameraOperation {
    type Output = CameraResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CameraFacing {
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub facing: CameraFacing,
    pub jpeg_quality: u8,
    pub max_dimension: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            facing: CameraFacing::Back,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

impl CaptureConfig {
    /// Clamps out-of-range settings instead of failing the capture.
    #[must_use]
    pub fn validated(mut self) -> Self {
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self.max_dimension = self.max_dimension.clamp(256, 4096);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedImage {
    /// Base64-encoded JPEG bytes.
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("camera unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("capture failed: {reason}")]
    CaptureFailed { reason: String },

    #[error("user cancelled the picker")]
    PickerCancelled,
}

impl From<CameraError> for AppError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::PermissionDenied => AppError::new(
                ErrorKind::Config,
                "Camera access is required. Please enable camera permissions in Settings.",
            ),
            CameraError::PickerCancelled => {
                AppError::new(ErrorKind::Cancelled, "picker dismissed")
            }
            CameraError::Unavailable { reason } | CameraError::CaptureFailed { reason } => {
                AppError::new(ErrorKind::Validation, "Unable to capture a photo.")
                    .with_internal(reason)
            }
        }
    }
}

pub type CameraResult = Result<CapturedImage, CameraError>;
