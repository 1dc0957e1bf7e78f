//! Length-prefixed JSON framing: a 2-byte big-endian header length, the
//! header, then the content.
//!
//! `u16_be len(header_json) || header_json || content_bytes`

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Big,
    Little,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub byteorder: ByteOrder,
    #[serde(rename = "content-type")]
    pub content_type: String,
    #[serde(rename = "content-encoding")]
    pub content_encoding: String,
    #[serde(rename = "content-length")]
    pub content_length: usize,
}

impl Header {
    pub fn for_json(content_length: usize) -> Self {
        Self {
            byteorder: ByteOrder::Big,
            content_type: "text/json".to_string(),
            content_encoding: "utf-8".to_string(),
            content_length,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub result: serde_json::Value,
}

impl Response {
    pub fn ok(result: serde_json::Value) -> Self {
        Self { result }
    }

    pub fn invalid_action(name: &str) -> Self {
        Self { result: serde_json::Value::String(format!("Error: invalid action '{}'.", name)) }
    }

    pub fn skipped() -> Self {
        Self { result: serde_json::Value::String("skipped".to_string()) }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("need more data")]
    Incomplete,
    #[error("header missing field: {0}")]
    MissingHeaderField(&'static str),
    #[error("malformed header json: {0}")]
    MalformedHeader(#[source] serde_json::Error),
    #[error("malformed content json: {0}")]
    MalformedContent(#[source] serde_json::Error),
    #[error("content-length {declared} exceeds maximum frame size {max}")]
    ContentTooLarge { declared: usize, max: usize },
}

/// Maximum content-length this implementation will ever attempt to buffer;
/// guards against a peer declaring an absurd length and exhausting memory.
pub const MAX_CONTENT_LEN: usize = 64 * 1024 * 1024;

/// Encode a JSON-serializable value into a full wire frame.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameError> {
    let content = serde_json::to_vec(value).map_err(FrameError::MalformedContent)?;
    let header = Header::for_json(content.len());
    let header_json = serde_json::to_vec(&header).map_err(FrameError::MalformedContent)?;
    let header_len = header_json.len() as u16;

    let mut out = Vec::with_capacity(2 + header_json.len() + content.len());
    out.extend_from_slice(&header_len.to_be_bytes());
    out.extend_from_slice(&header_json);
    out.extend_from_slice(&content);
    Ok(out)
}

/// Attempt to parse one frame from the front of `buf`. Returns the decoded
/// header, the raw content bytes, and the number of bytes consumed. Returns
/// `FrameError::Incomplete` (never panics) when `buf` does not yet contain a
/// full frame.
pub fn try_decode_frame(buf: &[u8]) -> Result<(Header, Vec<u8>, usize), FrameError> {
    if buf.len() < 2 {
        return Err(FrameError::Incomplete);
    }
    let header_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let header_end = 2 + header_len;
    if buf.len() < header_end {
        return Err(FrameError::Incomplete);
    }
    let header: Header =
        serde_json::from_slice(&buf[2..header_end]).map_err(FrameError::MalformedHeader)?;
    if header.content_length > MAX_CONTENT_LEN {
        return Err(FrameError::ContentTooLarge {
            declared: header.content_length,
            max: MAX_CONTENT_LEN,
        });
    }
    let content_end = header_end + header.content_length;
    if buf.len() < content_end {
        return Err(FrameError::Incomplete);
    }
    let content = buf[header_end..content_end].to_vec();
    Ok((header, content, content_end))
}

/// Decode a complete frame's content as a JSON request.
pub fn decode_request(content: &[u8]) -> Result<Request, FrameError> {
    serde_json::from_slice(content).map_err(FrameError::MalformedContent)
}

/// Decode a complete frame's content as a JSON response.
pub fn decode_response(content: &[u8]) -> Result<Response, FrameError> {
    serde_json::from_slice(content).map_err(FrameError::MalformedContent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_request_round_trips() {
        let req = Request { action: "echo".to_string(), value: serde_json::json!("hi") };
        let frame = encode_json(&req).unwrap();
        let (header, content, consumed) = try_decode_frame(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(header.content_length, content.len());
        let decoded = decode_request(&content).unwrap();
        assert_eq!(decoded.action, "echo");
    }

    #[test]
    fn truncated_frame_reports_incomplete_not_panic() {
        let req = Request { action: "acquire".to_string(), value: serde_json::Value::Null };
        let frame = encode_json(&req).unwrap();
        for cut in 0..frame.len() {
            let result = try_decode_frame(&frame[..cut]);
            assert!(matches!(result, Err(FrameError::Incomplete)));
        }
    }

    #[test]
    fn oversized_content_length_is_rejected_without_buffering() {
        let header = Header { content_length: MAX_CONTENT_LEN + 1, ..Header::for_json(0) };
        let header_json = serde_json::to_vec(&header).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&(header_json.len() as u16).to_be_bytes());
        buf.extend_from_slice(&header_json);
        let result = try_decode_frame(&buf);
        assert!(matches!(result, Err(FrameError::ContentTooLarge { .. })));
    }

    #[test]
    fn invalid_action_response_shape() {
        let resp = Response::invalid_action("frobnicate");
        assert_eq!(resp.result, serde_json::json!("Error: invalid action 'frobnicate'."));
    }
}
