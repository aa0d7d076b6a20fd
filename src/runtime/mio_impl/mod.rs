//! mio-based runtime.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).

mod event_loop;
mod source;

pub use event_loop::run;
