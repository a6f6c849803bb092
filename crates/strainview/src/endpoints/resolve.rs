use axum::extract;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use strainview_service::coordinator::ProgressEvent;
use strainview_service::types::{SessionId, StrainBuffer, StrainRequest};
use strainview_sources::{SampleRate, Site};

use crate::service::RequestService;

use super::ResponseError;

/// Query parameters of the resolve request.
#[derive(Debug, Default, Deserialize)]
pub struct ResolveQueryParams {
    /// Leaves out the samples.
    #[serde(default)]
    pub summary: bool,
}

/// JSON body of the resolve request.
#[derive(Debug, Deserialize)]
pub struct ResolveRequestBody {
    /// The session returned by an earlier request, if any.
    #[serde(default)]
    pub session: Option<SessionId>,
    pub site: Site,
    pub sample_rate: SampleRate,
    /// GPS time of the center of the window.
    pub t_center: f64,
    /// Length of the window in seconds.
    pub interval: f64,
}

/// A resolved window of strain data.
#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub session: SessionId,
    #[serde(flatten)]
    buffer: StrainBuffer,
    pub len: usize,
    /// Whether each 1/8 s step of the window has data.
    pub availability: Vec<bool>,
    pub known_gaps: Vec<String>,
    pub progress: Vec<ProgressEvent>,
    /// The samples, with `null` inside gaps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<Option<f64>>>,
}

impl ResolveResponse {
    pub fn new(
        session: SessionId,
        buffer: StrainBuffer,
        progress: Vec<ProgressEvent>,
        with_samples: bool,
    ) -> Self {
        let samples = with_samples.then(|| {
            buffer
                .samples()
                .iter()
                .map(|s| (!s.is_nan()).then_some(*s))
                .collect()
        });

        Self {
            session,
            len: buffer.len(),
            availability: buffer.availability_flags(),
            known_gaps: buffer.describe_known_gaps(),
            buffer,
            progress,
            samples,
        }
    }
}

pub async fn resolve_strain(
    extract::State(service): extract::State<RequestService>,
    extract::Query(params): extract::Query<ResolveQueryParams>,
    extract::Json(body): extract::Json<ResolveRequestBody>,
) -> Result<Json<ResolveResponse>, ResponseError> {
    sentry::start_session();

    let request = StrainRequest::new(body.site, body.sample_rate, body.t_center, body.interval)?;
    sentry::configure_scope(|scope| {
        scope.set_tag("request.site", body.site);
        scope.set_tag("request.sample_rate", body.sample_rate);
    });

    let resolved = service.resolve(body.session, request).await;
    let buffer = resolved.result?;

    Ok(Json(ResolveResponse::new(
        resolved.session,
        buffer,
        resolved.progress,
        !params.summary,
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;

    use strainview_service::archive::mock::{MockArchive, MockResponse};
    use strainview_service::caching::FetchError;
    use strainview_sources::{ArchiveFileIndex, CacheKey};

    use super::*;
    use crate::endpoints::test_utils::app;

    #[tokio::test]
    async fn test_resolve() {
        let archive = Arc::new(MockArchive::new());
        let app = app(archive.clone());
        let body = json!({
            "site": "H1",
            "sample_rate": 4096,
            "t_center": 1187008882.5,
            "interval": 1.0,
        });

        let (status, response) = app.post("/resolve", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["site"], "H1");
        assert_eq!(response["sample_rate"], 4096);
        assert_eq!(response["t_start"], 1187008882.0);
        assert_eq!(response["len"], 4096);
        assert_eq!(response["gaps"], json!([]));
        assert_eq!(response["availability"], json!(vec![true; 8]));
        assert_eq!(response["samples"].as_array().unwrap().len(), 4096);
        assert_eq!(
            response["progress"],
            json!([
                {"event": "fetch_started", "files": 1},
                {"event": "fetch_complete"},
            ])
        );
        assert!(response["session"].is_string());
        assert_eq!(archive.calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_summary_in_session() {
        let archive = Arc::new(MockArchive::new());
        let app = app(archive.clone());
        let body = json!({
            "site": "L1",
            "sample_rate": 4096,
            "t_center": 1187008882.5,
            "interval": 1.0,
        });

        let (status, first) = app.post("/resolve?summary=true", body).await;
        assert_eq!(status, StatusCode::OK);
        assert!(first.get("samples").is_none());

        let body = json!({
            "session": first["session"],
            "site": "L1",
            "sample_rate": 4096,
            "t_center": 1187008882.5,
            "interval": 64.0,
        });
        let (status, second) = app.post("/resolve?summary=true", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["session"], first["session"]);
        assert_eq!(second["len"], 64 * 4096);
        assert_eq!(second["progress"], json!([]));
        assert_eq!(archive.calls(), 1);
        assert_eq!(app.service.coordinator().store().active_views().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_invalid_interval() {
        let archive = Arc::new(MockArchive::new());
        let app = app(archive.clone());
        let body = json!({
            "site": "V1",
            "sample_rate": 16384,
            "t_center": 1187008882.5,
            "interval": 100.0,
        });

        let (status, response) = app.post("/resolve", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response["detail"],
            "interval of 100s is outside of 0.125s..=64s"
        );
        assert_eq!(archive.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_no_data() {
        let archive = Arc::new(MockArchive::new());
        let key = CacheKey::new(Site::H1, SampleRate::Decimated, ArchiveFileIndex(289797));
        archive.respond(key, MockResponse::Fail(FetchError::NotFound));
        let app = app(archive);
        let body = json!({
            "site": "H1",
            "sample_rate": 4096,
            "t_center": 1187008882.5,
            "interval": 1.0,
        });

        let (status, response) = app.post("/resolve", body).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            response["detail"],
            "no data available for the requested interval"
        );
    }

    #[tokio::test]
    async fn test_resolve_unavailable() {
        let archive = Arc::new(
            MockArchive::new().with_default(MockResponse::Fail(FetchError::Transport(
                "connection refused".into(),
            ))),
        );
        let app = app(archive);
        let body = json!({
            "site": "H1",
            "sample_rate": 4096,
            "t_center": 1187008882.5,
            "interval": 1.0,
        });

        let (status, response) = app.post("/resolve", body).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response["detail"], "strain archive unavailable");
        assert_eq!(
            response["causes"],
            json!(["archive transfer failed: connection refused"])
        );
    }

    #[test]
    fn test_progress_debug() {
        let progress = vec![
            ProgressEvent::FetchStarted { files: 2 },
            ProgressEvent::FetchFailed {
                reason: "no data available".into(),
            },
        ];
        insta::assert_debug_snapshot!(progress, @r###"
        [
            FetchStarted {
                files: 2,
            },
            FetchFailed {
                reason: "no data available",
            },
        ]
        "###);
    }
}
