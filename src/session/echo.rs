//! Line echo over the receive buffer.
//!
//! Bytes are read in fixed-size chunks and appended to the receive buffer.
//! Each writable event echoes at most one line, from the head of the buffer
//! up to and including its terminator. A short write leaves the unsent tail
//! of the line buffered; the next writable event scans again, finds the same
//! terminator closer to the head, and resumes.

use super::State;
use crate::session::stream::{NotificationSource, ReadStream, Transport, WriteStream};
use std::io;
use tracing::trace;

/// Maximum bytes pulled from the input stream per readable event.
pub const READ_CHUNK_SIZE: usize = 2048;

impl<T: Transport> State<T> {
    /// Read path: pull one chunk, buffer it, and echo right away if the
    /// output side can already take bytes.
    pub(super) fn read_available<N: NotificationSource<T>>(&mut self, source: &mut N) {
        let Some(input) = self.input.as_mut() else {
            return;
        };

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let bytes_read = match input.read(&mut chunk) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                // The stream reports the failure as an error event.
                trace!(error = %e, "Read failed");
                0
            }
        };

        // Any dispatched read attempt counts as activity.
        self.timer.rearm(source);

        if bytes_read == 0 {
            return;
        }

        self.received.append(&chunk[..bytes_read]);
        trace!(bytes = bytes_read, buffered = self.received.len(), "Read");

        // Write readiness may already be signalled and will not be signalled
        // again, so try now rather than wait for it.
        if self.output.as_ref().is_some_and(WriteStream::can_accept_bytes) {
            self.write_line(source);
        }
    }

    /// Write path: echo the first buffered line, or whatever part of it the
    /// output stream accepts.
    pub(super) fn write_line<N: NotificationSource<T>>(&mut self, source: &mut N) {
        self.timer.rearm(source);

        let Some(output) = self.output.as_mut() else {
            return;
        };
        let Some(line) = self.received.first_line() else {
            return;
        };

        let line_len = line.len();
        let written = match output.write(line) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                trace!(error = %e, "Write failed");
                0
            }
        };

        if written > 0 {
            self.received.consume(written);
            trace!(written, line_len, buffered = self.received.len(), "Echoed");
        }
    }
}
