use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::error::NserError;

/// JSON error body: `{"error": "<message>", "code": "<code>"}`
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub code: String,
}

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                error: message.into(),
                code: code.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<NserError> for ApiError {
    fn from(err: NserError) -> Self {
        let status = match &err {
            NserError::UnknownTool(_)
            | NserError::RunNotFound(_)
            | NserError::WorkspaceNotFound(_) => StatusCode::NOT_FOUND,
            NserError::InvalidTarget | NserError::InvalidWorkspace(_) => StatusCode::BAD_REQUEST,
            NserError::RunActive(_) | NserError::RunNotActive(_) => StatusCode::CONFLICT,
            NserError::Storage(_) | NserError::Task(_) | NserError::Io(_) => {
                error!("Request failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (NserError::UnknownTool("x".into()), StatusCode::NOT_FOUND),
            (NserError::RunNotFound(1), StatusCode::NOT_FOUND),
            (NserError::WorkspaceNotFound(1), StatusCode::NOT_FOUND),
            (NserError::InvalidTarget, StatusCode::BAD_REQUEST),
            (NserError::InvalidWorkspace("blank".into()), StatusCode::BAD_REQUEST),
            (NserError::RunActive(1), StatusCode::CONFLICT),
            (NserError::RunNotActive(1), StatusCode::CONFLICT),
            (NserError::Task("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_body_shape() {
        let err = ApiError::from(NserError::RunActive(3));
        let value = serde_json::to_value(&err.body).unwrap();
        assert_eq!(value["code"], "run_active");
        assert_eq!(value["error"], "run 3 is still active");
    }
}
