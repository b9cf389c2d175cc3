pub type AnimatoResult<T> = Result<T, AnimatoError>;

#[derive(thiserror::Error, Debug)]
pub enum AnimatoError {
    #[error("graph error: {0}")]
    Graph(String),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AnimatoError {
    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }

    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}
