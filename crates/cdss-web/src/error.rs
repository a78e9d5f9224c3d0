//! HTTP错误映射

use axum::{
    extract::multipart::MultipartError,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use cdss_core::CdssError;
use serde_json::json;
use tracing::error;

/// 处理器统一的错误类型
#[derive(Debug)]
pub struct ApiError(pub CdssError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<CdssError> for ApiError {
    fn from(e: CdssError) -> Self {
        ApiError(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(CdssError::Validation(rejection.body_text()))
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError(CdssError::Validation(format!("multipart请求无效: {}", e)))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CdssError::NotFound(_) => StatusCode::NOT_FOUND,
            CdssError::Validation(_) | CdssError::MalformedEntityMetadata { .. } => {
                StatusCode::BAD_REQUEST
            }
            CdssError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CdssError::Conflict(_) | CdssError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            CdssError::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CdssError::Processing { .. }
            | CdssError::Config(_)
            | CdssError::Database(_)
            | CdssError::Storage(_)
            | CdssError::Io(_)
            | CdssError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let body = Json(json!({
            "error": true,
            "message": self.0.to_string(),
            "status": status.as_u16(),
            "retryable": self.0.is_retryable(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CdssError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CdssError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (CdssError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (CdssError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                CdssError::InvalidStateTransition {
                    from: "Accepted".into(),
                    event: "Reject".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                CdssError::Upstream {
                    service: "ocr".into(),
                    message: "timeout".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CdssError::Processing {
                    stage: "rules".into(),
                    message: "x".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (CdssError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }
}
