use crate::auth::TokenError;
use crate::error::LinkError;
use crate::provider::ProviderErrorKind;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

/// Application error types for the social account endpoints
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(TokenError),
    UnknownProvider(String),
    Link(LinkError),
}

impl From<LinkError> for ApiError {
    fn from(err: LinkError) -> Self {
        ApiError::Link(err)
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        ApiError::Unauthorized(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            ApiError::Link(err) => link_status(err),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::UnknownProvider(_) => "unknown_provider",
            ApiError::Link(err) => err.code(),
        }
    }
}

fn link_status(err: &LinkError) -> StatusCode {
    match err {
        LinkError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LinkError::CsrfValidation(_) => StatusCode::FORBIDDEN,
        LinkError::ProviderAuth(e) => match e.kind {
            ProviderErrorKind::Rejected => StatusCode::UNAUTHORIZED,
            ProviderErrorKind::Transient | ProviderErrorKind::Malformed => StatusCode::BAD_GATEWAY,
        },
        LinkError::CredentialUnusable { .. }
        | LinkError::AccountLinkedElsewhere(_)
        | LinkError::AccountMismatch(_) => StatusCode::CONFLICT,
        LinkError::NotFound | LinkError::ProviderNotConfigured(_) => StatusCode::NOT_FOUND,
        LinkError::Storage(_) | LinkError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match self {
            ApiError::Unauthorized(e) => format!("Invalid token: {}", e),
            ApiError::UnknownProvider(name) => format!("Unknown provider '{}'", name),
            ApiError::Link(LinkError::Storage(e)) => {
                error!(error = %format!("{:#}", e), "Storage failure while handling request");
                "Internal storage error".to_string()
            }
            ApiError::Link(e) => e.to_string(),
        };

        (status, Json(ErrorResponse { error: message, code })).into_response()
    }
}
