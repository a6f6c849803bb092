//! Strainview.
//!
//! Strainview is a web service serving short windows of gravitational-wave strain data. It keeps
//! whole archive files in a memory-bounded cache, so that zooming out and panning around an
//! instant rarely needs another transfer from the remote strain archive.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod logging;
mod server;
mod service;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
