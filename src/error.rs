use std::io;
use thiserror::Error;

/// Result type used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// The host list is empty, so there is nothing to connect to.
    #[error("No hosts specified")]
    NoHosts,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Encode error: {0}")]
    Encode(String),

    #[cfg(feature = "json")]
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),

    /// A marshaled job reported a failure.
    #[error("Job failed: {0}")]
    Job(String),

    #[error("Thread[{0}] could not be spawned")]
    ThreadSpawn(String),

    /// A device view rejected an update or could not be created.
    #[error("Device slot {slot}: {message}")]
    Device { slot: usize, message: String },

    #[error("Unknown message kind {0}")]
    UnknownMessageKind(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_config(path: &str) -> Result<String> {
        Ok(std::fs::read_to_string(path)?)
    }

    #[test]
    fn test_io_error_converts_with_question_mark() {
        let err = read_config("/nonexistent/pose-streamer.toml").unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
        assert!(err.to_string().starts_with("IO error:"));
    }
}
