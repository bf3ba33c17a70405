use thiserror::Error;
use warp::http::StatusCode;
use warp::{reject::Reject, Rejection, Reply};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl Reject for ApiError {}

/// Every pipeline failure surfaces as a plain-text 500.
pub fn error_reply(message: impl std::fmt::Display) -> warp::reply::WithStatus<String> {
    warp::reply::with_status(
        format!("Internal Server Error: {}", message),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(api_err) = err.find::<ApiError>() {
        Ok(error_reply(api_err))
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        let invalid = ApiError::InvalidInput(body_err.to_string());
        Ok(error_reply(invalid))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        let invalid = ApiError::InvalidInput("request body too large".to_string());
        Ok(error_reply(invalid))
    } else {
        Err(err)
    }
}
