//! Framed TCP connection handling. A connection owns a growable read buffer
//! and decodes one frame at a time; a malformed frame or a closed peer ends
//! that connection without touching any other.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use stcl_types::wire::{self, FrameError, Header, Request};

pub struct FramedConnection {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl FramedConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream, buf: Vec::with_capacity(4096) }
    }

    /// Read from the socket until one full frame is buffered, then decode
    /// and consume it. Returns `Ok(None)` if the peer closed the connection
    /// cleanly before sending any more data.
    pub async fn read_request(&mut self) -> Result<Option<Request>, FrameError> {
        loop {
            match wire::try_decode_frame(&self.buf) {
                Ok((_, content, consumed)) => {
                    let req = wire::decode_request(&content)?;
                    self.buf.drain(..consumed);
                    return Ok(Some(req));
                }
                Err(FrameError::Incomplete) => {
                    let mut chunk = [0u8; 4096];
                    let n = self
                        .stream
                        .read(&mut chunk)
                        .await
                        .map_err(|_| FrameError::Incomplete)?;
                    if n == 0 {
                        return Ok(None);
                    }
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn write_response<T: serde::Serialize>(&mut self, value: &T) -> std::io::Result<()> {
        let frame = wire::encode_json(value).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        self.stream.write_all(&frame).await
    }

    /// Discard any buffered partial frame; used when a persistent loop
    /// connection resets between requests rather than closing.
    pub fn reset_buffer(&mut self) {
        self.buf.clear();
    }

    /// Non-blocking poll for one frame: decodes out of whatever is already
    /// buffered, otherwise drains any bytes currently sitting in the socket
    /// without awaiting. Used by the loop channel, which is serviced once per
    /// control-loop tick rather than owning its own task.
    pub fn poll_request(&mut self) -> PollOutcome {
        loop {
            match wire::try_decode_frame(&self.buf) {
                Ok((_, content, consumed)) => {
                    self.buf.drain(..consumed);
                    return match wire::decode_request(&content) {
                        Ok(req) => PollOutcome::Ready(req),
                        Err(e) => PollOutcome::Error(e),
                    };
                }
                Err(FrameError::Incomplete) => {
                    let mut chunk = [0u8; 4096];
                    match self.stream.try_read(&mut chunk) {
                        Ok(0) => return PollOutcome::Closed,
                        Ok(n) => {
                            self.buf.extend_from_slice(&chunk[..n]);
                            continue;
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            return PollOutcome::Pending;
                        }
                        Err(_) => return PollOutcome::Closed,
                    }
                }
                Err(e) => return PollOutcome::Error(e),
            }
        }
    }

    pub fn header_for(content_len: usize) -> Header {
        Header::for_json(content_len)
    }
}

/// Result of a single non-blocking poll of a connection for one frame.
pub enum PollOutcome {
    Ready(Request),
    Pending,
    Closed,
    Error(FrameError),
}
