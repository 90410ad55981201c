use thiserror::Error;

/// Errors raised by the data model.
///
/// Option errors signal an authoring mistake in a patch and are meant to fail
/// loudly at the point of the call; the rest are resource conditions the caller
/// decides how to handle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("module `{module}` has no option #{index}")]
    InvalidOption { module: &'static str, index: usize },

    #[error("option `{option}` of module `{module}` does not accept value {value}")]
    InvalidOptionValue {
        module: &'static str,
        option: &'static str,
        value: i32,
    },

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("no module at position {index} (voice has {len})")]
    ModuleIndex { index: usize, len: usize },

    #[error("voice pool exhausted ({capacity} voices)")]
    VoicePoolExhausted { capacity: usize },

    #[error("no voice at index {index} ({registered} registered)")]
    VoiceIndex { index: usize, registered: usize },

    #[error("failed to read configuration: {0}")]
    ConfigIo(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
