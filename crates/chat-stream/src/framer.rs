//! Incremental framing of the session byte stream.
//!
//! The framer is transport-agnostic: it only sees byte chunks and yields the
//! text of every complete blank-line delimited segment.

use tracing::debug;

use crate::message::SseMessage;

const DATA_PREFIX: &str = "data: ";

/// Stateful splitter turning arbitrary byte chunks into complete segments.
///
/// Bytes after the last delimiter stay buffered until a later chunk completes
/// them, so a segment split at any byte offset is emitted exactly once.
#[derive(Debug, Default)]
pub struct SseFramer {
    buf: Vec<u8>,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every segment completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut segments = Vec::new();
        let mut start = 0;
        while let Some((idx, delim_len)) = find_segment_delimiter(&self.buf[start..]) {
            let end = start + idx;
            segments.push(String::from_utf8_lossy(&self.buf[start..end]).into_owned());
            start = end + delim_len;
        }
        if start > 0 {
            self.buf.drain(..start);
        }
        segments
    }

}

fn find_segment_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

/// Parses one complete segment into a message.
///
/// Segments without the `data: ` prefix (comments, pings, blank padding) and
/// payloads that are not a JSON object are dropped.
pub fn parse_segment(segment: &str) -> Option<SseMessage> {
    let line = segment.trim();
    if line.is_empty() {
        return None;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        debug!(len = line.len(), "dropping non-data segment");
        return None;
    };
    match serde_json::from_str::<SseMessage>(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!(error = %e, "dropping malformed data segment");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_MESSAGES: &str =
        "data: {\"type\":\"token\",\"data\":\"Hé\"}\n\ndata: {\"type\":\"done\"}\n\n";

    fn parse_all(segments: Vec<String>) -> Vec<SseMessage> {
        segments.iter().filter_map(|s| parse_segment(s)).collect()
    }

    #[test]
    fn framer_handles_partial_chunk_boundaries() {
        let mut framer = SseFramer::new();
        assert!(framer.feed(b"data: {\"type\":\"tok").is_empty());
        assert_eq!(framer.buf.len(), 18);
        let segments = framer.feed(b"en\",\"data\":\"Hi\"}\n\n");
        assert_eq!(segments, vec!["data: {\"type\":\"token\",\"data\":\"Hi\"}"]);
        assert_eq!(framer.buf.len(), 0);
    }

    #[test]
    fn split_at_every_offset_matches_single_chunk() {
        let bytes = TWO_MESSAGES.as_bytes();
        let expected = parse_all(SseFramer::new().feed(bytes));
        assert_eq!(expected.len(), 2);

        for split in 0..=bytes.len() {
            let mut framer = SseFramer::new();
            let mut segments = framer.feed(&bytes[..split]);
            segments.extend(framer.feed(&bytes[split..]));
            assert_eq!(parse_all(segments), expected, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_single_chunk() {
        let bytes = TWO_MESSAGES.as_bytes();
        let mut framer = SseFramer::new();
        let mut segments = Vec::new();
        for byte in bytes {
            segments.extend(framer.feed(std::slice::from_ref(byte)));
        }
        let messages = parse_all(segments);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].data_text().as_deref(), Some("Hé"));
    }

    #[test]
    fn crlf_delimiters_are_accepted() {
        let mut framer = SseFramer::new();
        let segments = framer.feed(b"data: {\"type\":\"done\"}\r\n\r\n");
        assert_eq!(parse_all(segments).len(), 1);
    }

    #[test]
    fn trailing_partial_segment_is_retained() {
        let mut framer = SseFramer::new();
        let segments = framer.feed(b"data: {\"type\":\"done\"}\n\ndata: {");
        assert_eq!(segments.len(), 1);
        assert_eq!(framer.buf, b"data: {");
        let segments = framer.feed(b"\"type\":\"done\"}\n\n");
        assert_eq!(parse_all(segments).len(), 1);
        assert!(framer.buf.is_empty());
    }

    #[test]
    fn non_data_and_malformed_segments_are_dropped() {
        assert!(parse_segment(": ping").is_none());
        assert!(parse_segment("event: token").is_none());
        assert!(parse_segment("data: {not json").is_none());
        assert!(parse_segment("data: 42").is_none());
        assert!(parse_segment("   ").is_none());
        let msg = parse_segment("  data: {\"type\":\"done\"}  ").expect("trimmed segment");
        assert_eq!(msg.kind.as_deref(), Some("done"));
    }

    #[test]
    fn malformed_segment_does_not_hide_later_messages() {
        let mut framer = SseFramer::new();
        let segments =
            framer.feed(b"data: {broken\n\ndata: {\"type\":\"token\",\"data\":\"ok\"}\n\n");
        let messages = parse_all(segments);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data_text().as_deref(), Some("ok"));
    }
}
