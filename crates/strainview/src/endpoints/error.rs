use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

use strainview_service::coordinator::ResolveError;
use strainview_service::types::InvalidRequest;

#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    err: anyhow::Error,
}

impl From<InvalidRequest> for ResponseError {
    fn from(err: InvalidRequest) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            err: err.into(),
        }
    }
}

impl From<ResolveError> for ResponseError {
    fn from(err: ResolveError) -> Self {
        let status = match err {
            ResolveError::NoDataAvailable => StatusCode::NOT_FOUND,
            ResolveError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            err: err.into(),
        }
    }
}

impl From<(StatusCode, &'static str)> for ResponseError {
    fn from((code, msg): (StatusCode, &'static str)) -> Self {
        Self {
            status: code,
            err: anyhow::anyhow!(msg),
        }
    }
}

impl From<anyhow::Error> for ResponseError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err,
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        // An unreachable archive is reported by the fetch itself.
        if self.status == StatusCode::INTERNAL_SERVER_ERROR {
            capture_anyhow(&self.err);
        }
        let mut response = Json(ApiErrorResponse::from(self.err)).into_response();
        *response.status_mut() = self.status;
        response
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    causes: Option<Vec<String>>,
}

impl From<anyhow::Error> for ApiErrorResponse {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let detail = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };

        ApiErrorResponse { detail, causes }
    }
}

#[cfg(test)]
mod tests {
    use strainview_service::caching::FetchError;

    use super::*;

    #[test]
    fn test_error_chain() {
        let fetch_error = FetchError::Transport("connection reset".into());
        let err = ResponseError::from(ResolveError::Unavailable(fetch_error));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let response = ApiErrorResponse::from(err.err);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "detail": "strain archive unavailable",
                "causes": ["archive transfer failed: connection reset"],
            })
        );
    }

    #[test]
    fn test_no_causes() {
        let err = ResponseError::from(ResolveError::NoDataAvailable);
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let response = ApiErrorResponse::from(err.err);
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"detail":"no data available for the requested interval"}"#
        );
    }
}
