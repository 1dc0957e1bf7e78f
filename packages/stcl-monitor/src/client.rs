//! A node's primary port is one-shot: connect, send one request, read one
//! response, close. A monitor dials it fresh on every poll rather than
//! holding a persistent socket open.

use anyhow::{anyhow, Context};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use stcl_types::wire::{self, Request};

pub struct NodeClient {
    addr: String,
}

impl NodeClient {
    pub fn new(addr: String) -> Self {
        Self { addr }
    }

    pub async fn call(&self, action: &str, value: Value) -> anyhow::Result<Value> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .with_context(|| format!("connecting to node at {}", self.addr))?;

        let request = Request { action: action.to_string(), value };
        let frame = wire::encode_json(&request)?;
        stream.write_all(&frame).await?;

        let mut buf = Vec::with_capacity(4096);
        loop {
            match wire::try_decode_frame(&buf) {
                Ok((_, content, _consumed)) => {
                    let response = wire::decode_response(&content)?;
                    return Ok(response.result);
                }
                Err(wire::FrameError::Incomplete) => {
                    let mut chunk = [0u8; 4096];
                    let n = stream.read(&mut chunk).await?;
                    if n == 0 {
                        return Err(anyhow!("node {} closed the connection before a full response", self.addr));
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => return Err(anyhow!("malformed response from {}: {e}", self.addr)),
            }
        }
    }
}
