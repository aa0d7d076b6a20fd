//! Line boundary detection.

/// Byte marking the end of an echoable line.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Find the offset of the first line terminator in `bytes`.
pub fn find_line_terminator(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == LINE_TERMINATOR)
}
