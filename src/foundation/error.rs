pub type PyramidResult<T> = Result<T, PyramidError>;

#[derive(thiserror::Error, Debug)]
pub enum PyramidError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PyramidError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::Aborted(msg.into())
    }

    /// Errors that only invalidate the subtree being rendered.
    ///
    /// Resource exhaustion, shape/type mismatches and external I/O failures turn the current node
    /// into "no node"; everything else aborts the whole call.
    pub fn is_subtree_local(&self) -> bool {
        matches!(
            self,
            Self::Shape(_) | Self::Resource(_) | Self::Io(_) | Self::Unsupported(_)
        )
    }
}

impl From<std::io::Error> for PyramidError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PyramidError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err.to_string())
    }
}
