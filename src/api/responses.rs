//! Common API response types

use actix_web::{error::InternalError, http::StatusCode, HttpResponse};
use serde::Serialize;

use crate::models::WebSubError;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a success response
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// HTTP status for an error
pub fn status_for(error: &WebSubError) -> StatusCode {
    match error {
        WebSubError::Validation(_) => StatusCode::BAD_REQUEST,
        WebSubError::Subscriber(_) => StatusCode::BAD_REQUEST,
        WebSubError::NotFound { .. } => StatusCode::NOT_FOUND,
        WebSubError::Discovery(_) => StatusCode::BAD_GATEWAY,
        WebSubError::Notification(_) => StatusCode::BAD_GATEWAY,
        WebSubError::Network(_) => StatusCode::BAD_GATEWAY,
        WebSubError::HubNotResponding(_)
        | WebSubError::Denied(_)
        | WebSubError::Database(_)
        | WebSubError::Serialization(_)
        | WebSubError::Config(_)
        | WebSubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert WebSubError to a JSON HTTP response
impl From<WebSubError> for HttpResponse {
    fn from(error: WebSubError) -> Self {
        HttpResponse::build(status_for(&error)).json(ApiResponse::<()>::error(error.to_string()))
    }
}

/// Plain-text response for the protocol endpoints
pub fn plain_text_error(error: &WebSubError) -> HttpResponse {
    let reason = match error {
        WebSubError::Validation(message) => message.clone(),
        other => other.to_string(),
    };

    HttpResponse::build(status_for(error))
        .content_type("text/plain; charset=utf-8")
        .body(format!("{}\n", reason))
}

/// Error for JSON endpoints
pub fn api_error(error: WebSubError) -> actix_web::Error {
    InternalError::from_response(error.to_string(), HttpResponse::from(error)).into()
}

/// Error for the hub and callback endpoints
pub fn protocol_error(error: WebSubError) -> actix_web::Error {
    InternalError::from_response(error.to_string(), plain_text_error(&error)).into()
}
