//! Ties a `LockEngine` to its two TCP listeners. Both the primary (one-shot
//! request/response) and loop (persistent, for live reconfiguration) ports
//! are driven from a single task via `tokio::select!` — the node never
//! spawns a second OS thread, so a primary request, a loop request, and a
//! control-loop tick are never truly concurrent, only interleaved.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::acquisition::Acquisition;
use crate::dispatch::dispatch;
use crate::lock_engine::LockEngine;
use crate::transport::{FramedConnection, PollOutcome};

/// How often the control loop steps while a lock is running. The reference
/// scan cycle is driven by the acquisition trigger itself; this just bounds
/// how often we check `is_running` and service the loop socket when idle.
const TICK: Duration = Duration::from_millis(1);

pub struct NodeServer<A: Acquisition> {
    engine: LockEngine<A>,
    bind_addr: String,
    primary_port: u16,
}

impl<A: Acquisition> NodeServer<A> {
    pub fn new(engine: LockEngine<A>, bind_addr: String, primary_port: u16) -> Self {
        Self { engine, bind_addr, primary_port }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let loop_port = self.primary_port + stcl_types::constants::LOOP_PORT_OFFSET;
        let primary_listener = TcpListener::bind((self.bind_addr.as_str(), self.primary_port)).await?;
        let loop_listener = TcpListener::bind((self.bind_addr.as_str(), loop_port)).await?;
        info!(role = ?self.engine.role(), primary_port = self.primary_port, loop_port, "node listening");

        let mut loop_conn: Option<FramedConnection> = None;
        let mut tick = interval(TICK);

        loop {
            tokio::select! {
                accepted = primary_listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.serve_primary(stream, peer).await,
                        Err(e) => warn!("primary accept failed: {e}"),
                    }
                }

                accepted = loop_listener.accept(), if loop_conn.is_none() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!("loop channel connected: {peer}");
                            loop_conn = Some(FramedConnection::new(stream));
                        }
                        Err(e) => warn!("loop accept failed: {e}"),
                    }
                }

                _ = tick.tick() => {
                    if self.engine.is_running() {
                        let outcome = self.engine.step().await;
                        if outcome.skipped {
                            debug!("step skipped: trigger missed or peak not found");
                        }
                    }
                    if let Some(conn) = loop_conn.as_mut() {
                        if !self.service_loop_request(conn).await {
                            loop_conn = None;
                        }
                    }
                }
            }
        }
    }

    async fn serve_primary(&mut self, stream: TcpStream, peer: SocketAddr) {
        let mut conn = FramedConnection::new(stream);
        match conn.read_request().await {
            Ok(Some(request)) => {
                let response = dispatch(&mut self.engine, &request).await;
                if let Err(e) = conn.write_response(&response).await {
                    warn!("primary write failed for {peer}: {e}");
                }
            }
            Ok(None) => debug!("primary connection {peer} closed before sending a request"),
            Err(e) => warn!("primary frame error from {peer}: {e}"),
        }
    }

    /// Service at most one pending request on the loop connection. Returns
    /// `false` if the connection should be dropped (peer closed or a
    /// malformed frame).
    async fn service_loop_request(&mut self, conn: &mut FramedConnection) -> bool {
        match conn.poll_request() {
            PollOutcome::Pending => true,
            PollOutcome::Closed => {
                info!("loop channel disconnected");
                false
            }
            PollOutcome::Error(e) => {
                warn!("loop channel frame error: {e}");
                false
            }
            PollOutcome::Ready(request) => {
                let response = dispatch(&mut self.engine, &request).await;
                if let Err(e) = conn.write_response(&response).await {
                    warn!("loop channel write failed: {e}");
                    return false;
                }
                true
            }
        }
    }
}
