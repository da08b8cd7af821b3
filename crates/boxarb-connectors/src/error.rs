use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("access token is missing, invalid, or expired")]
    AuthInvalid,

    #[error("failed to parse upstream payload: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
