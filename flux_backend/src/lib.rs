//! Runtime of the flux additive synthesis engine.
//!
//! The scheduler evaluates every voice graph once per control step and
//! publishes the results through a double-buffered [`FrameExchange`]; the
//! renderer turns the current frame into 16-bit PCM and writes it to an
//! [`AudioSink`]. [`Engine`] wires the two together.

pub mod audio_device;
pub mod engine;
pub mod error;
pub mod rt_processing;

pub use audio_device::{AudioSink, Capture, MemorySink, SinkError, SinkResult};
#[cfg(feature = "device")]
pub use audio_device::{DeviceSink, OutputDeviceInfo, list_output_devices};
pub use engine::{Engine, EngineHandle, RunningEngine};
pub use error::{EngineError, EngineResult};
pub use rt_processing::{
    Automation, Diagnostics, DiagnosticsSnapshot, EvaluationMode, FrameExchange, Renderer,
    SoloControl, StepReport, TickClock, VoiceScheduler,
};
