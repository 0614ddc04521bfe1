//! Wire protocol server loop
//!
//! One tokio task per client connection; each task reads frames,
//! dispatches the command document, and writes the reply. The serve loop
//! also owns the once-a-minute cursor TTL sweep across both engines and
//! shuts down cleanly on the watch signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use mondo_core::Result;
use mondo_router::QueryRouter;

use crate::commands::{CommandContext, dispatch};
use crate::message::{
    MessageHeader, OpCode, encode_op_msg, encode_op_reply, parse_op_msg, parse_op_query,
};

/// Interval of the cursor TTL sweep owned by the serve loop.
const CURSOR_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The MongoDB-wire-compatible front-end server.
pub struct WireServer {
    router: Arc<QueryRouter>,
}

impl WireServer {
    pub fn new(router: Arc<QueryRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<QueryRouter> {
        &self.router
    }

    /// Accept connections until the shutdown signal flips.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "wire server listening");

        let sweeper = {
            let router = Arc::clone(&self.router);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(CURSOR_SWEEP_INTERVAL);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            let evicted = router.cleanup_expired_cursors().await;
                            if evicted > 0 {
                                tracing::debug!(evicted, "cursor sweep evicted entries");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let router = Arc::clone(&self.router);
                    tokio::spawn(async move {
                        let peer = peer.to_string();
                        if let Err(e) = handle_connection(router, stream, peer.clone()).await {
                            tracing::debug!(peer = %peer, error = %e, "connection closed with error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    tracing::info!("wire server shutting down");
                    break;
                }
            }
        }

        sweeper.abort();
        Ok(())
    }
}

async fn handle_connection(
    router: Arc<QueryRouter>,
    mut stream: TcpStream,
    peer: String,
) -> Result<()> {
    tracing::debug!(peer = %peer, "client connected");
    let ctx = CommandContext { peer: Some(peer) };
    let mut next_request_id: i32 = 1;

    loop {
        let header = match MessageHeader::read_from(&mut stream).await {
            Ok(header) => header,
            // A clean EOF between frames is a normal disconnect.
            Err(mondo_core::MondoError::Io(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                return Ok(());
            }
            Err(other) => return Err(other),
        };

        let body_len = header.message_length as usize - MessageHeader::LENGTH;
        let mut body = vec![0_u8; body_len];
        stream.read_exact(&mut body).await?;

        match header.op_code {
            OpCode::Message => {
                let message = parse_op_msg(&body)?;
                let expects_reply = message.expects_reply();
                let reply = dispatch(&router, message.command, &ctx).await;
                if expects_reply {
                    let frame = encode_op_msg(&reply, next_request_id, header.request_id)?;
                    next_request_id = next_request_id.wrapping_add(1);
                    tokio::io::AsyncWriteExt::write_all(&mut stream, &frame).await?;
                }
            }
            OpCode::Query => {
                // Legacy handshake path: the command document arrives as a
                // query against `<db>.$cmd`.
                let query = parse_op_query(&body)?;
                let mut command = query.query;
                if let Some(db) = query.full_collection_name.strip_suffix(".$cmd") {
                    if command.get("$db").is_none() {
                        command.insert("$db", db.to_string());
                    }
                }
                let reply = dispatch(&router, command, &ctx).await;
                let frame = encode_op_reply(&reply, next_request_id, header.request_id)?;
                next_request_id = next_request_id.wrapping_add(1);
                tokio::io::AsyncWriteExt::write_all(&mut stream, &frame).await?;
            }
            OpCode::Reply => {
                return Err(mondo_core::MondoError::BadValue(
                    "unexpected OP_REPLY from client".into(),
                ));
            }
        }
    }
}
