use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

use crate::service::RequestService;

mod error;
mod resolve;
mod sessions;

pub use error::ResponseError;
pub use resolve::ResolveResponse;

use resolve::resolve_strain as resolve;
use sessions::end_session;

pub async fn healthcheck() -> &'static str {
    strainview_service::metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: RequestService) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(DefaultBodyLimit::max(64 * 1024));
    Router::new()
        .route("/resolve", post(resolve))
        .route("/sessions/:session", axum::routing::delete(end_session))
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}
