//! Splits a raw terminal byte stream into clean text lines.

/// Accumulates PTY bytes and yields complete lines with ANSI escapes removed.
///
/// Bytes are kept until a `\n` arrives so an escape sequence or a multi-byte
/// character split across reads is decoded whole.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends `data` and returns every line it completed.
    pub(crate) fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(strip_ansi(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Returns the unterminated tail, if any, leaving the buffer empty.
    pub(crate) fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(strip_ansi(&raw))
    }
}

/// Strips ANSI escape sequences and the terminal's trailing `\r`.
pub(crate) fn strip_ansi(bytes: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(bytes);
    String::from_utf8_lossy(&stripped)
        .trim_end_matches('\r')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_reads() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"2024-01-01 INFO libp2p_").is_empty());
        let lines = buf.push(b"swarm: local_peer_id=abc\r\nnext");
        assert_eq!(lines, ["2024-01-01 INFO libp2p_swarm: local_peer_id=abc"]);
        assert_eq!(buf.flush().as_deref(), Some("next"));
        assert!(buf.flush().is_none());
    }

    #[test]
    fn test_escape_codes_removed() {
        let mut buf = LineBuffer::default();
        let lines = buf.push(b"\x1b[32mINFO\x1b[0m libp2p_swarm: local_peer_id=x\n");
        assert_eq!(lines, ["INFO libp2p_swarm: local_peer_id=x"]);
    }

    #[test]
    fn test_escape_split_across_reads() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"\x1b[3").is_empty());
        let lines = buf.push(b"1mred\x1b[0m\n");
        assert_eq!(lines, ["red"]);
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut buf = LineBuffer::default();
        let lines = buf.push(b"a\nb\n\nc\n");
        assert_eq!(lines, ["a", "b", "", "c"]);
    }
}
