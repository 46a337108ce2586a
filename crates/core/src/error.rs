/// Result alias that carries the custom [`MixerError`] type.
pub type Result<T> = std::result::Result<T, MixerError>;

/// Common error type for the core crate.
///
/// Tempo detection itself never produces one of these: it always resolves
/// to a usable tempo. Errors come from configuration, deck addressing and
/// the shared audio graph.
#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    /// Free-form message for failures without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The caller handed in data the operation cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Fft(#[from] realfft::FftError),
    #[error("config: {0}")]
    Json(#[from] serde_json::Error),
    /// The external decoder could not produce a sample buffer.
    #[error("failed to decode `{name}`: {reason}")]
    Decode { name: String, reason: String },
    #[error("no deck with number {0}")]
    UnknownDeck(usize),
    /// The audio graph was torn down; no further audio can be fed or read.
    #[error("audio graph has been closed")]
    GraphClosed,
    #[error("tempo {0} is not usable")]
    InvalidTempo(f64),
}

impl MixerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Builds a decode error for the named file.
    pub fn decode(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<&str> for MixerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MixerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
