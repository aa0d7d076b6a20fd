//! Runtime for the line-echo server.
//!
//! Concrete collaborators for sessions, built on mio:
//! - `connection`: socket state shared by the two stream halves
//! - `token`: poll token to registration mapping
//! - `timers`: one-shot timers ordered by deadline
//! - `mio_impl`: notification source, accept loop and worker threads

mod connection;
mod mio_impl;
mod timers;
mod token;

use crate::config::Config;

/// Run the server on the mio backend (epoll on Linux, kqueue on macOS).
pub fn run(config: Config) -> std::io::Result<()> {
    mio_impl::run(config)
}
