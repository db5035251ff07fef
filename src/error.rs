use thiserror::Error;

/// Errors produced while building requests, talking to the server, or
/// decoding its replies.
///
/// Every variant is terminal for the call that produced it; nothing in this
/// crate retries.
#[derive(Error, Debug)]
pub enum Error {
    /// A tensor carried a different element type than the one required, or
    /// its values were stored in a field that does not belong to its type.
    #[error("tensor `{name}`: expected dtype {expected}, found {found}")]
    DtypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    /// A tensor's rank, dimensions or element count are not what was
    /// required.
    #[error("tensor `{name}`: {reason}")]
    ShapeMismatch { name: String, reason: String },

    #[error("response is missing required output `{0}`")]
    MissingOutput(String),

    #[error("unknown model `{0}`, expected one of: deeplab, ssd")]
    UnknownModel(String),

    /// The server answered the call with a non-OK gRPC status.
    #[error("prediction request failed: {0}")]
    TransportFailure(#[from] tonic::Status),

    #[error("could not connect to serving endpoint: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn shape<S: Into<String>, R: Into<String>>(name: S, reason: R) -> Self {
        Error::ShapeMismatch {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn dtype<S, E, F>(name: S, expected: E, found: F) -> Self
    where
        S: Into<String>,
        E: ToString,
        F: ToString,
    {
        Error::DtypeMismatch {
            name: name.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Our custom result type
pub type Result<T> = std::result::Result<T, Error>;
