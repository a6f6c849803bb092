//! Maps the sessions of HTTP clients onto [`Session`]s sharing one [`FetchCoordinator`].
//!
//! Clients identify their session with the id returned from their first request. Sessions that
//! stay idle for longer than the configured timeout are dropped, which releases the view they
//! kept alive in the cache.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Mutex, mpsc};

use strainview_service::archive::ArchiveService;
use strainview_service::config::Config;
use strainview_service::coordinator::{FetchCoordinator, ProgressEvent, ResolveError};
use strainview_service::metric;
use strainview_service::session::Session;
use strainview_service::types::{SessionId, StrainBuffer, StrainRequest};

type SessionCache = moka::sync::Cache<SessionId, Arc<Mutex<Session>>>;

/// The outcome of one request, together with the progress reported while resolving it.
#[derive(Debug)]
pub struct Resolved {
    pub session: SessionId,
    pub result: Result<StrainBuffer, ResolveError>,
    pub progress: Vec<ProgressEvent>,
}

#[derive(Clone)]
pub struct RequestService {
    coordinator: FetchCoordinator,
    sessions: SessionCache,
}

impl fmt::Debug for RequestService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestService")
            .field("coordinator", &self.coordinator)
            .field("sessions", &self.sessions.entry_count())
            .finish()
    }
}

impl RequestService {
    /// Creates the archive client, cache and session table from the config.
    pub fn create(config: &Config) -> Result<Self> {
        let archive = ArchiveService::from_config(config)?;
        let coordinator = FetchCoordinator::new(archive, &config.caches)?;
        Ok(Self::new(coordinator, config.caches.session_idle_timeout))
    }

    pub fn new(coordinator: FetchCoordinator, session_idle_timeout: Duration) -> Self {
        let sessions = SessionCache::builder()
            .name("sessions")
            .time_to_idle(session_idle_timeout)
            .eviction_listener(|id, _session, cause| {
                tracing::debug!(session = %id, ?cause, "session expired");
            })
            .build();

        Self {
            coordinator,
            sessions,
        }
    }

    /// Resolves `request` in the given session, starting a new session if there is none.
    ///
    /// Requests of one session are resolved one at a time, in order.
    pub async fn resolve(&self, session: Option<SessionId>, request: StrainRequest) -> Resolved {
        let id = session.unwrap_or_default();
        let entry = self.sessions.get_with(id, || {
            metric!(counter("sessions.created") += 1);
            Arc::new(Mutex::new(Session::with_id(self.coordinator.clone(), id)))
        });

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let result = {
            let mut session = entry.lock().await;
            session.set_progress(Some(sender));
            let result = session.submit(request).await;
            session.set_progress(None);
            result
        };

        let mut progress = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            progress.push(event);
        }

        Resolved {
            session: id,
            result,
            progress,
        }
    }

    /// Ends a session, releasing its view.
    pub fn end_session(&self, session: SessionId) {
        self.sessions.invalidate(&session);
        // The cache may hold on to the session until its next maintenance run.
        self.coordinator.release(session);
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }
}
