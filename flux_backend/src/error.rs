use std::io;

use flux_core::CoreError;
use thiserror::Error;

use crate::audio_device::SinkError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("no voices registered")]
    NoVoices,

    #[error("failed to spawn {role} thread")]
    Spawn {
        role: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("renderer already started")]
    RendererStarted,
}

pub type EngineResult<T> = Result<T, EngineError>;
