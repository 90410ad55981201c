//! Data model of the flux additive synthesis engine.
//!
//! - [`partials`]: fixed-capacity partial sets exchanged between modules and the renderer.
//! - [`module`]: the lifecycle contract of a signal module.
//! - [`voice`]: a voice's ordered module graph and its control state.
//! - [`bank`]: the fixed voice pool.
//! - [`lock`]: the fair, reentrant global state lock.
//! - [`config`]: engine configuration.
//! - [`modules`]: reference modules.

pub mod bank;
pub mod config;
pub mod error;
pub mod lock;
pub mod module;
pub mod modules;
pub mod partials;
pub mod voice;

pub use bank::VoiceBank;
pub use config::EngineConfig;
pub use error::{CoreError, CoreResult};
pub use lock::{GlobalStateLock, StateGuard};
pub use module::{Capability, Module, OptionSpec, StepContext, Tick};
pub use partials::{NUM_PARTIALS, PartialSet};
pub use voice::{Voice, VoiceControl};
