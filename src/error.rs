use thiserror::Error;

/// Main error type for the dj-analyzer library
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Buffer loading and sample access errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to load audio for track {track_id}: {reason}")]
    LoadFailed { track_id: String, reason: String },

    #[error("Loading audio for track {track_id} timed out after {seconds}s")]
    LoadTimeout { track_id: String, seconds: u64 },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Invalid channel index {index} (buffer has {channels} channels)")]
    InvalidChannel { index: usize, channels: usize },

    #[error("Invalid audio parameters: {details}")]
    InvalidParameters { details: String },
}

/// Errors raised by individual analysis steps
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Not enough data for {what}: {details}")]
    InsufficientData { what: String, details: String },

    #[error("FFT processing failed: {reason}")]
    FftFailed { reason: String },

    #[error("Analysis task failed: {reason}")]
    TaskFailed { reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Unknown analyzer setting: {key}")]
    UnknownSetting { key: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to persist configuration: {reason}")]
    Persistence { reason: String },
}

/// Convenience type alias for Results using AnalyzerError
pub type Result<T> = std::result::Result<T, AnalyzerError>;

impl AnalyzerError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            // IO errors might be temporary
            Self::Io(_) => true,
            // Decoding may succeed on a later attempt
            Self::Audio(AudioError::LoadFailed { .. }) => true,
            Self::Audio(AudioError::LoadTimeout { .. }) => true,
            Self::Config(ConfigError::Persistence { .. }) => true,
            // Most other errors are permanent
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Audio(AudioError::LoadFailed { track_id, .. }) => {
                format!("Could not decode '{}'. Please check the file exists and is a supported format.", track_id)
            }
            Self::Audio(AudioError::LoadTimeout { track_id, seconds }) => {
                format!("Decoding '{}' took longer than {}s and was abandoned.", track_id, seconds)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            Self::Config(ConfigError::UnknownSetting { key }) => {
                format!("'{}' is not an analyzer setting.", key)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_errors_are_recoverable() {
        let err: AnalyzerError = AudioError::LoadTimeout {
            track_id: "a.wav".to_string(),
            seconds: 20,
        }
        .into();
        assert!(err.is_recoverable());

        let err: AnalyzerError = ConfigError::UnknownSetting { key: "bogus".to_string() }.into();
        assert!(!err.is_recoverable());
        assert!(err.user_message().contains("bogus"));
    }

    #[test]
    fn test_generic_message() {
        let err = AnalyzerError::generic("queue closed");
        assert!(!err.is_recoverable());
        assert_eq!(err.user_message(), "Generic error: queue closed");
    }
}
