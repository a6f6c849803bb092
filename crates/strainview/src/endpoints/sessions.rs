use axum::extract;
use axum::http::StatusCode;

use strainview_service::types::SessionId;

use crate::service::RequestService;

/// Ends a session, so the files around its last view may be evicted.
pub async fn end_session(
    extract::State(service): extract::State<RequestService>,
    extract::Path(session): extract::Path<SessionId>,
) -> StatusCode {
    service.end_session(session);
    StatusCode::NO_CONTENT
}
