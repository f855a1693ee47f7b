use bytes::Bytes;

/// One decoded server-sent event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder.
///
/// Bytes accumulate until a blank line terminates a frame; each complete
/// frame block is then parsed in one pass. Buffering raw bytes (rather than
/// decoded text) means a multi-byte character split across network chunks
/// reassembles correctly, since frame boundaries are always ASCII newlines.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_bytes(&mut self, chunk: &Bytes) -> Vec<SseFrame> {
        self.feed_raw(chunk)
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.feed_raw(chunk.as_bytes())
    }

    fn feed_raw(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((content_end, consumed)) = frame_boundary(&self.pending) {
            let block: Vec<u8> = self.pending.drain(..consumed).take(content_end).collect();
            if let Some(frame) = parse_block(&String::from_utf8_lossy(&block)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Drain a trailing un-terminated frame at stream end.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let rest = std::mem::take(&mut self.pending);
        parse_block(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }
}

/// Locate the blank line ending the first buffered frame. Returns the frame
/// content length and the total bytes to consume (content plus terminator),
/// tolerating `\r\n` line endings.
fn frame_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    for (i, byte) in buffer.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        match (buffer.get(i + 1), buffer.get(i + 2)) {
            (Some(b'\n'), _) => return Some((i, i + 2)),
            (Some(b'\r'), Some(b'\n')) => return Some((i, i + 3)),
            _ => {}
        }
    }
    None
}

/// Parse one frame block. Returns `None` for comment-only or empty blocks
/// (keepalives).
fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Option<String> = None;

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = (!value.is_empty()).then(|| value.to_string()),
            "data" => match &mut data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    if event.is_none() && data.is_none() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data.unwrap_or_default(),
    })
}

/// Wire-format a frame: optional `event:` line, `data:` line, blank line.
pub fn format_frame(event: Option<&str>, data: &str) -> String {
    match event {
        Some(event) => format!("event: {event}\ndata: {data}\n\n"),
        None => format!("data: {data}\n\n"),
    }
}

/// Normalized provider stream framing. Vendor SSE shapes are converted to
/// these two events so downstream protocol emitters only handle one format.
pub const PROVIDER_DATA_EVENT: &str = "provider.data";
pub const PROVIDER_DONE_EVENT: &str = "provider.done";
pub const ERROR_EVENT: &str = "error";

pub fn provider_data_frame(data: &str) -> String {
    format_frame(Some(PROVIDER_DATA_EVENT), data)
}

pub fn provider_done_frame() -> String {
    format_frame(Some(PROVIDER_DONE_EVENT), "[DONE]")
}

/// Terminal error frame emitted before closing a downstream SSE stream.
pub fn error_frame(body: &str) -> String {
    format_frame(Some(ERROR_EVENT), body)
}

pub const DONE_SENTINEL: &str = "[DONE]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_chunks_are_reassembled() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed("data: {\"a\":").is_empty());
        let frames = decoder.feed("1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn multibyte_characters_survive_chunk_splits() {
        let mut decoder = SseDecoder::new();
        let wire = "data: 深入思考\n\n".as_bytes();
        // Split inside the first CJK character.
        assert!(decoder.feed_raw(&wire[..8]).is_empty());
        let frames = decoder.feed_raw(&wire[8..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "深入思考");
    }

    #[test]
    fn event_lines_and_comments_are_handled() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(": keepalive\nevent: provider.data\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("provider.data"));
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn comment_only_blocks_are_dropped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(": keepalive\n\n").is_empty());
    }

    #[test]
    fn multi_line_data_joins_with_newline() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed("data: a\ndata: b\n\n");
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn crlf_terminators_are_accepted() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed("data: x\r\n\r\ndata: y\r\n\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "x");
        assert_eq!(frames[1].data, "y");
    }

    #[test]
    fn finish_drains_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed("data: tail").is_empty());
        let frames = decoder.finish();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "tail");
    }

    #[test]
    fn format_frame_round_trips_through_decoder() {
        let wire = provider_data_frame("{\"x\":1}");
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(&wire);
        assert_eq!(frames[0].event.as_deref(), Some(PROVIDER_DATA_EVENT));
        assert_eq!(frames[0].data, "{\"x\":1}");
    }
}
