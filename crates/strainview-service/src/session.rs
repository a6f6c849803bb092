use crate::coordinator::{FetchCoordinator, ProgressSender, ResolveError};
use crate::types::{SessionId, StrainBuffer, StrainRequest};

/// The state of one user looking at strain data.
///
/// Every submitted request replaces the session's view in the cache, so the files around it are
/// kept for zooming out and panning. Dropping the session releases the view.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    coordinator: FetchCoordinator,
    current: Option<StrainRequest>,
    progress: Option<ProgressSender>,
}

impl Session {
    /// Starts a session with a fresh id.
    pub fn new(coordinator: FetchCoordinator) -> Self {
        Self::with_id(coordinator, SessionId::new())
    }

    pub fn with_id(coordinator: FetchCoordinator, id: SessionId) -> Self {
        Self {
            id,
            coordinator,
            current: None,
            progress: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The last submitted request.
    pub fn current(&self) -> Option<&StrainRequest> {
        self.current.as_ref()
    }

    /// Sets where progress of the following submissions is reported.
    pub fn set_progress(&mut self, progress: Option<ProgressSender>) {
        self.progress = progress;
    }

    /// Resolves `request` and makes it the session's current view.
    pub async fn submit(&mut self, request: StrainRequest) -> Result<StrainBuffer, ResolveError> {
        tracing::debug!(session = %self.id, %request, "submitting request");
        self.current = Some(request);
        self.coordinator
            .resolve(self.id, &request, self.progress.as_ref())
            .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.coordinator.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use strainview_sources::{SampleRate, Site};
    use tokio::sync::mpsc;

    use super::*;
    use crate::archive::mock::MockArchive;
    use crate::archive::ArchiveService;
    use crate::config::CacheConfigs;
    use crate::coordinator::ProgressEvent;
    use crate::test;

    fn coordinator() -> (FetchCoordinator, Arc<MockArchive>) {
        test::setup();
        let archive = Arc::new(MockArchive::new());
        let service = ArchiveService::new(archive.clone(), Duration::from_secs(5), 1);
        let coordinator = FetchCoordinator::new(service, &CacheConfigs::default()).unwrap();
        (coordinator, archive)
    }

    #[tokio::test]
    async fn test_submit() {
        let (coordinator, archive) = coordinator();
        let mut session = Session::new(coordinator.clone());
        let (sender, mut receiver) = mpsc::unbounded_channel();
        session.set_progress(Some(sender));

        let request = StrainRequest::new(Site::L1, SampleRate::Decimated, 1187008882.4, 2.0).unwrap();
        let buffer = session.submit(request).await.unwrap();

        assert_eq!(buffer.len(), 2 * 4096);
        assert_eq!(session.current(), Some(&request));
        assert_eq!(archive.calls(), 1);
        assert_eq!(
            receiver.try_recv().unwrap(),
            ProgressEvent::FetchStarted { files: 1 }
        );

        // Zooming out around the same center is served from the cache.
        let zoomed = request.with_interval(64.0).unwrap();
        session.submit(zoomed).await.unwrap();
        assert_eq!(archive.calls(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_view() {
        let (coordinator, _archive) = coordinator();
        let request = StrainRequest::new(Site::V1, SampleRate::Decimated, 1.0e9, 4.0).unwrap();

        let mut first = Session::new(coordinator.clone());
        let mut second = Session::new(coordinator.clone());
        first.submit(request).await.unwrap();
        second.submit(request.with_center(1.0e9 + 8.0).unwrap()).await.unwrap();
        assert_eq!(coordinator.store().active_views().len(), 2);

        drop(first);
        let views = coordinator.store().active_views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].t_center, 1.0e9 + 8.0);
    }
}
