#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("not signed in: no user identity in local storage")]
    NotSignedIn,

    #[error("{service} responded with {status}: {message}")]
    Http {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("reqwest error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
