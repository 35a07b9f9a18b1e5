//! Capability layer: every side effect the core can ask the shell to
//! perform. The shells (iOS/Android) implement the operations; the core
//! stays pure and testable.

pub mod camera;
pub mod haptics;
pub mod http;
pub mod timer;

pub use camera::{Camera, CameraError, CameraResult, CapturedImage};
pub use haptics::{HapticPattern, Haptics};
pub use http::{Http, HttpError, HttpRequest, HttpResponse, HttpResult};
pub use timer::{Timer, TimerFired, TimerId};

use crux_core::render::Render;

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub render: Render<Event>,
    pub http: Http<Event>,
    pub camera: Camera<Event>,
    pub timer: Timer<Event>,
    pub haptics: Haptics<Event>,
}
