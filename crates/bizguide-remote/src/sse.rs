use serde_json::Value;

use crate::error::FORMAT_ANOMALY_MARKER;

/// One server-sent event from the pipeline's `/stream` endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A stage event payload.
    Data(Value),
    /// The server reported a failure.
    Error(String),
    /// A frame whose payload could not be decoded.
    Malformed(String),
    /// The server finished the stream.
    End,
}

/// Incremental parser for SSE text streams.
///
/// Bytes are buffered raw and only complete frames are decoded, so a
/// multi-byte character split across network chunks survives intact.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: Vec<u8>,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete frames.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some((end, separator)) = frame_boundary(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + separator).take(end).collect();
            if let Some(frame) = parse_frame(&decode(&raw)) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Drain a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        parse_frame(decode(&rest).trim_end()).into_iter().collect()
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<SseFrame> {
        let mut parser = Self::default();
        let mut frames = parser.feed(input.as_bytes());
        frames.extend(parser.finish());
        frames
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

/// Position and length of the first blank-line separator, LF or CRLF.
fn frame_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find(buffer, b"\n\n").map(|at| (at, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|at| (at, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn decode(frame: &[u8]) -> String {
    String::from_utf8_lossy(frame).replace("\r\n", "\n")
}

fn parse_frame(frame: &str) -> Option<SseFrame> {
    let event = frame
        .lines()
        .find_map(|line| line.strip_prefix("event:"))
        .map(str::trim)
        .unwrap_or("data");
    let payload = extract_data_payload(frame);

    match event {
        "data" => {
            let payload = payload?;
            match serde_json::from_str::<Value>(&payload) {
                Ok(value) => Some(SseFrame::Data(value)),
                Err(e) => Some(SseFrame::Malformed(format!(
                    "{}: {}",
                    FORMAT_ANOMALY_MARKER, e
                ))),
            }
        }
        "error" => {
            let payload = payload.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&payload)
                .ok()
                .and_then(|value| {
                    value
                        .get("message")
                        .and_then(Value::as_str)
                        .map(ToString::to_string)
                })
                .unwrap_or(payload);
            Some(SseFrame::Error(message))
        }
        "end" => Some(SseFrame::End),
        _ => None,
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_frames_incrementally() {
        let mut parser = SseStreamParser::default();
        let mut frames = Vec::new();

        frames.extend(parser.feed(b"event: data\ndata: {\"generate\": {\"gener"));
        assert!(frames.is_empty());
        frames.extend(parser.feed(b"ation\": \"To\"}}\n\n"));
        assert_eq!(frames, vec![SseFrame::Data(json!({"generate": {"generation": "To"}}))]);

        frames.extend(parser.feed(b"event: end\n\n"));
        assert_eq!(frames.last(), Some(&SseFrame::End));
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn codepoint_split_across_chunks_is_preserved() {
        let full = "event: data\ndata: {\"generate\": {\"generation\": \"Yhteisötietojärjestelmä\"}}\n\n"
            .as_bytes();
        let split = full
            .windows(2)
            .position(|pair| pair == "ö".as_bytes())
            .unwrap()
            + 1;

        let mut parser = SseStreamParser::default();
        assert!(parser.feed(&full[..split]).is_empty());
        let frames = parser.feed(&full[split..]);
        assert_eq!(
            frames,
            vec![SseFrame::Data(
                json!({"generate": {"generation": "Yhteisötietojärjestelmä"}})
            )]
        );
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn crlf_frames_are_accepted() {
        let frames = SseStreamParser::parse_frames("event: data\r\ndata: {\"a\": 1}\r\n\r\n");
        assert_eq!(frames, vec![SseFrame::Data(json!({"a": 1}))]);
    }

    #[test]
    fn error_frame_extracts_message() {
        let frames = SseStreamParser::parse_frames(
            "event: error\ndata: {\"status_code\": 500, \"message\": \"Internal Server Error\"}\n\n",
        );
        assert_eq!(frames, vec![SseFrame::Error("Internal Server Error".into())]);
    }

    #[test]
    fn undecodable_data_is_malformed() {
        let frames = SseStreamParser::parse_frames("event: data\ndata: {not json\n\n");
        match &frames[0] {
            SseFrame::Malformed(detail) => assert!(detail.starts_with(FORMAT_ANOMALY_MARKER)),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn metadata_and_comments_are_skipped() {
        let frames = SseStreamParser::parse_frames(
            "event: metadata\ndata: {\"run_id\": \"x\"}\n\n: keep-alive\n\nevent: end\n\n",
        );
        assert_eq!(frames, vec![SseFrame::End]);
    }

    #[test]
    fn trailing_frame_without_blank_line() {
        let frames = SseStreamParser::parse_frames("data: {\"retrieve\": {}}");
        assert_eq!(frames, vec![SseFrame::Data(json!({"retrieve": {}}))]);
    }
}
