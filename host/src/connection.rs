//! The host's view of one node's sockets: a one-shot primary-port call, and
//! a lazily-opened persistent loop connection kept around for live
//! reconfiguration while that node's lock loop is running.

use anyhow::{anyhow, Context};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use stcl_types::model::NodeDescriptor;
use stcl_types::wire::{self, Request};

pub struct NodeConnection {
    primary_addr: String,
    loop_addr: String,
    loop_stream: Option<TcpStream>,
}

impl NodeConnection {
    pub fn for_node(node: &NodeDescriptor) -> Self {
        Self {
            primary_addr: format!("{}:{}", node.addr, node.primary_port),
            loop_addr: format!("{}:{}", node.addr, node.loop_port()),
            loop_stream: None,
        }
    }

    /// One-shot request over the primary port.
    pub async fn call(&self, action: &str, value: Value) -> anyhow::Result<Value> {
        let mut stream = TcpStream::connect(&self.primary_addr)
            .await
            .with_context(|| format!("connecting to {}", self.primary_addr))?;
        send_and_read(&mut stream, action, value).await
    }

    /// Request over the persistent loop channel, opening it on first use.
    pub async fn call_loop(&mut self, action: &str, value: Value) -> anyhow::Result<Value> {
        if self.loop_stream.is_none() {
            let stream = TcpStream::connect(&self.loop_addr)
                .await
                .with_context(|| format!("connecting to loop channel {}", self.loop_addr))?;
            self.loop_stream = Some(stream);
        }
        let stream = self.loop_stream.as_mut().expect("just set above");
        match send_and_read(stream, action, value).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.loop_stream = None;
                Err(e)
            }
        }
    }

    pub fn close_loop(&mut self) {
        self.loop_stream = None;
    }
}

async fn send_and_read(stream: &mut TcpStream, action: &str, value: Value) -> anyhow::Result<Value> {
    let request = Request { action: action.to_string(), value };
    let frame = wire::encode_json(&request)?;
    stream.write_all(&frame).await?;

    let mut buf = Vec::with_capacity(4096);
    loop {
        match wire::try_decode_frame(&buf) {
            Ok((_, content, _)) => return Ok(wire::decode_response(&content)?.result),
            Err(wire::FrameError::Incomplete) => {
                let mut chunk = [0u8; 4096];
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(anyhow!("node closed the connection before a full response"));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => return Err(anyhow!("malformed response: {e}")),
        }
    }
}
