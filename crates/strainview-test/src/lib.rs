//! Helpers for testing the web server and service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. The directory is deleted as soon as the handle is dropped.
//!
//!  - When using [`archive_server`], make sure that the server is held until all requests to
//!    the server have been made. If the server is dropped, connections to it are refused. To
//!    avoid this, assign it to a variable: `let (_server, source) = archive_server(root);`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::{Router, extract, middleware};
use tower_http::services::ServeDir;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

use strainview_sources::{ArchiveSourceConfig, CacheKey, HttpArchiveConfig, archive_path};

pub use tempfile::TempDir;

/// Setup the test environment.
///
/// Initializes logs: The logger only captures logs from the strainview crates and mutes all
/// other logs. The logs are captured by the test runner.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("strainview=trace,strainview_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Writes an archive file for `key` below `root`, in the layout all archive sources share.
pub fn write_archive_file(root: &Path, key: &CacheKey, samples: &[f64]) {
    let path = root.join(archive_path(key));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();

    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    std::fs::write(path, bytes).unwrap();
}

/// A local HTTP server counting the requests it receives.
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl Server {
    /// Serves `router` on a free local port.
    pub fn with_router(router: Router) -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri), req, next: middleware::Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };
        let router = router.layer(middleware::from_fn(hitcounter));

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router.into_make_service())
                .await
                .unwrap();
        });

        Self {
            handle,
            socket,
            hits,
        }
    }

    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }

    /// The number of requests since the last call, resetting the count.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Requests per path since the last call, resetting the counts.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawns an HTTP archive serving the files below `root`.
///
/// Returns the server together with a source configuration pointing at it. Missing files are
/// answered with `404`.
pub fn archive_server(root: &Path) -> (Server, ArchiveSourceConfig) {
    let router = Router::new().fallback_service(ServeDir::new(root));
    let server = Server::with_router(router);

    let source = ArchiveSourceConfig::Http(Arc::new(HttpArchiveConfig {
        url: server.url("/"),
        headers: Default::default(),
    }));

    (server, source)
}
