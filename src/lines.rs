//! Incremental splitting of process output chunks into lines.

/// Buffers process output chunks, yielding each complete line exactly once.
///
/// Chunk boundaries may fall anywhere, including inside a multi-byte character,
/// so bytes are kept until a line is complete & only then decoded.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    split_cr: bool,
}

impl LineBuffer {
    /// Buffer splitting on `\n`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer splitting on `\n` & `\r`, suitable for ffmpeg progress output
    /// which rewrites the same terminal line.
    pub fn progress() -> Self {
        Self {
            split_cr: true,
            ..<_>::default()
        }
    }

    /// Append a chunk, returning all lines completed by it in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(idx) = rest.iter().position(|b| self.is_delim(*b)) {
            self.buf.extend_from_slice(&rest[..idx]);
            lines.push(String::from_utf8_lossy(&self.buf).into_owned());
            self.buf.clear();
            rest = &rest[idx + 1..];
        }
        self.buf.extend_from_slice(rest);
        lines
    }

    /// Take the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }

    /// Discard any partial line.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn is_delim(&self, b: u8) -> bool {
        b == b'\n' || (self.split_cr && b == b'\r')
    }
}
