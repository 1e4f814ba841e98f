//! API error type and its HTTP mapping.

use axum::Json;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use fetchlock_core::domain::{FetchError, StoreError};

pub type ApiResult<T> = Result<T, ApiError>;

pub const INVALID_REQUEST: &str = "InvalidRequestException";
pub const REST_EXCEPTION: &str = "RestException";

/// JSON error body: `{type, message}`.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    /// Set for authentication challenges, which carry no body.
    realm: Option<String>,
}

impl ApiError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, INVALID_REQUEST, message)
    }

    /// 401 challenge for `realm`.
    pub fn unauthorized(realm: impl Into<String>) -> Self {
        Self {
            realm: Some(realm.into()),
            ..Self::new(StatusCode::UNAUTHORIZED, REST_EXCEPTION, "")
        }
    }

    pub fn engine_not_found(name: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            REST_EXCEPTION,
            format!("No process engine available with name {name}"),
        )
    }

    pub fn task_not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, INVALID_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, REST_EXCEPTION, message)
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            realm: None,
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        // Engine failures during locking are reported as bad requests too.
        Self::invalid_request(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::task_not_found(err.to_string()),
            err if err.is_bad_request() => Self::invalid_request(err.to_string()),
            err => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(realm) = self.realm {
            let challenge = HeaderValue::from_str(&format!("Basic realm=\"{realm}\""))
                .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
            return (self.status, [(WWW_AUTHENTICATE, challenge)]).into_response();
        }

        let body = ApiErrorBody {
            kind: self.kind.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchlock_core::domain::TaskId;
    use rstest::rstest;

    #[rstest]
    #[case::validation(FetchError::Validation("bad".to_string()))]
    #[case::engine(FetchError::Engine("anExceptionMessage".to_string()))]
    fn fetch_errors_are_bad_requests(#[case] err: FetchError) {
        let message = err.to_string();
        let api: ApiError = err.into();
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api.message(), message);
    }

    #[test]
    fn store_errors_map_by_kind() {
        let id: TaskId = "01ARZ3NDEKTSV4RRFFQ69G5FAV".parse().unwrap();
        assert_eq!(ApiError::from(StoreError::NotFound(id)).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(StoreError::NotLocked(id)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(StoreError::Backend("down".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn challenge_has_realm_and_no_body() {
        let response = ApiError::unauthorized("someengine").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[WWW_AUTHENTICATE],
            "Basic realm=\"someengine\""
        );
    }
}
