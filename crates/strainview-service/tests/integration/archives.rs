use std::sync::Arc;

use futures::future;
use strainview_service::coordinator::ResolveError;
use strainview_service::session::Session;
use strainview_service::types::{GapCause, StrainRequest};
use strainview_sources::{ArchiveSourceConfig, FilesystemArchiveConfig, SampleRate, Site};

use crate::{coordinator, ramp, test, write_event_file, BOUNDARY};

fn request(t_center: f64, interval: f64) -> StrainRequest {
    StrainRequest::new(Site::H1, SampleRate::Decimated, t_center, interval).unwrap()
}

#[tokio::test]
async fn test_filesystem_archive() {
    test::setup();
    let root = test::tempdir();
    write_event_file(root.path());

    let source = ArchiveSourceConfig::Filesystem(Arc::new(FilesystemArchiveConfig {
        path: root.path().to_owned(),
    }));
    let mut session = Session::new(coordinator(source));

    let buffer = session.submit(request(BOUNDARY + 1.0, 1.0)).await.unwrap();
    assert!(buffer.is_complete());
    assert_eq!(buffer.t_start(), BOUNDARY + 0.5);
    assert_eq!(buffer.samples(), &ramp(2 * 4096)[2048..6144]);
}

#[tokio::test]
async fn test_truncated_file() {
    test::setup();
    let root = test::tempdir();
    write_event_file(root.path());

    let source = ArchiveSourceConfig::Filesystem(Arc::new(FilesystemArchiveConfig {
        path: root.path().to_owned(),
    }));
    let mut session = Session::new(coordinator(source));

    // The second half of the window lies past the end of the written file.
    let buffer = session.submit(request(BOUNDARY + 2.0, 1.0)).await.unwrap();
    assert_eq!(buffer.len(), 4096);
    assert_eq!(buffer.gaps().len(), 1);
    assert_eq!((buffer.gaps()[0].start, buffer.gaps()[0].end), (2048, 4096));
    assert_eq!(buffer.gaps()[0].cause, GapCause::Missing);

    // Entirely past the end of the file.
    let result = session.submit(request(BOUNDARY + 100.0, 1.0)).await;
    assert_eq!(result.unwrap_err(), ResolveError::NoDataAvailable);
}

#[tokio::test]
async fn test_http_single_flight() {
    test::setup();
    let root = test::tempdir();
    write_event_file(root.path());

    let (server, source) = test::archive_server(root.path());
    let coordinator = coordinator(source);
    let request = request(BOUNDARY + 1.0, 0.5);

    let mut sessions: Vec<_> = (0..4).map(|_| Session::new(coordinator.clone())).collect();
    let results = future::join_all(sessions.iter_mut().map(|s| s.submit(request))).await;

    for result in results {
        assert!(result.unwrap().is_complete());
    }
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_http_missing_neighbour() {
    test::setup();
    let root = test::tempdir();
    write_event_file(root.path());

    let (server, source) = test::archive_server(root.path());
    let mut session = Session::new(coordinator(source));

    // One second in the previous file, which the archive does not have.
    let buffer = session.submit(request(BOUNDARY, 2.0)).await.unwrap();
    assert_eq!(
        server.all_hits(),
        [
            ("/H1/4096/289796.strain".to_owned(), 1),
            ("/H1/4096/289797.strain".to_owned(), 1),
        ]
    );
    assert_eq!(buffer.gaps().len(), 1);
    let gap = &buffer.gaps()[0];
    assert_eq!((gap.start, gap.end), (0, 4096));
    assert_eq!(gap.cause, GapCause::NoData);
    assert!(!gap.known);

    let buffer = session.submit(request(BOUNDARY, 2.0)).await.unwrap();
    assert_eq!(server.accesses(), 0);
    assert!(buffer.gaps()[0].known);
    assert_eq!(buffer.describe_known_gaps().len(), 1);
}
