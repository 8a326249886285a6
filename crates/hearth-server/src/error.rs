//! HTTP error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hearth_core::TransferError;
use serde_json::json;

/// A [`TransferError`] on its way to the client as `{error, code}`
#[derive(Debug)]
pub struct ApiError(pub TransferError);

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TransferError::Validation(_) | TransferError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            TransferError::SessionNotFound(_) | TransferError::FileNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            TransferError::MissingChunk(_) | TransferError::Conflict(_) => StatusCode::CONFLICT,
            TransferError::Io(_) | TransferError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
        }

        let mut body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        if let TransferError::MissingChunk(index) = self.0 {
            body["chunk"] = json!(index);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (TransferError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (TransferError::InvalidPath("x".into()), StatusCode::BAD_REQUEST),
            (TransferError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (TransferError::FileNotFound("x".into()), StatusCode::NOT_FOUND),
            (TransferError::MissingChunk(3), StatusCode::CONFLICT),
            (TransferError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                TransferError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
