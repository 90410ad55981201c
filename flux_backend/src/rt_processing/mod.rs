//! The real-time pipeline: clock, frame exchange, scheduling and rendering.

pub mod clock;
pub mod diagnostics;
pub mod frame;
pub mod oscillators;
pub mod renderer;
pub mod scheduler;
pub mod tables;
pub mod workers;

pub use clock::TickClock;
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use frame::{FrameBuffer, FrameExchange, FrameReader, VoiceFrame};
pub use renderer::{Renderer, SoloControl};
pub use scheduler::{Automation, EvaluationMode, StepReport, VoiceScheduler};
