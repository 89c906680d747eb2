//! Store error types

use quill_autosave::SinkError;

/// Errors raised by the bundled stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key maps to no usable file name
    #[error("key {0:?} has no usable file name")]
    InvalidKey(String),
}

impl From<StoreError> for SinkError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(io) => Self::Io(io),
            StoreError::Json(json) => Self::Serialization(json.to_string()),
            StoreError::InvalidKey(key) => Self::Rejected(format!("invalid key {key:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_onto_sink_errors() {
        let io = StoreError::Io(std::io::Error::other("gone"));
        assert!(matches!(SinkError::from(io), SinkError::Io(_)));

        let json = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(matches!(
            SinkError::from(StoreError::Json(json)),
            SinkError::Serialization(_)
        ));

        let key = StoreError::InvalidKey("..".into());
        assert!(matches!(SinkError::from(key), SinkError::Rejected(_)));
    }
}
