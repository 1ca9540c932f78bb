use crate::alloc::RegionAllocator;
use crate::config::TransferConfig;
use crate::frame::{read_frame, write_frame};
use crate::receiver::ReceiverAssembler;
use crate::session::{ConnectionSlot, SessionCounters};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything a receiver session needs, passed in explicitly instead of living
///  in process-wide state.
pub struct ServerContext {
    pub config: Arc<TransferConfig>,
    pub allocator: Arc<dyn RegionAllocator>,
}

/// Listens for backup clients and serves at most one connection at a time; a
///  second session-open attempt while one is active is refused.
pub struct BackupServer {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    slot: ConnectionSlot,
}

impl BackupServer {
    pub async fn bind(bind_addr: SocketAddr, ctx: Arc<ServerContext>) -> anyhow::Result<BackupServer> {
        ctx.config.validate()?;

        let listener = TcpListener::bind(bind_addr).await?;
        info!("backup server listening on {}", listener.local_addr()?);
        Ok(BackupServer {
            listener,
            ctx,
            slot: ConnectionSlot::new(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(&self) -> anyhow::Result<()> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;

            let Some(claim) = self.slot.try_claim() else {
                warn!(
                    "refusing connection from {}: another backup connection is active",
                    peer_addr
                );
                // dropping the stream closes it
                continue;
            };

            info!("accepted backup connection from {}", peer_addr);
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                // the claim is cleared on connection teardown
                let _claim = claim;
                match serve_connection(stream, ctx).await {
                    Ok(()) => info!("backup connection from {} closed", peer_addr),
                    Err(e) => warn!("backup connection from {} aborted: {}", peer_addr, e),
                }
            });
        }
    }
}

/// Serves one inbound connection: reads requests, feeds them through the
///  assembler and writes back the paired responses. Connection-scoped state
///  lives on this task's stack and is torn down when the loop exits.
pub async fn serve_connection<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    ctx: Arc<ServerContext>,
) -> anyhow::Result<()> {
    let (mut read, mut write) = tokio::io::split(stream);
    let mut assembler = ReceiverAssembler::new(ctx.config.clone(), ctx.allocator.clone());
    let mut counters = SessionCounters::default();

    while let Some(request) = read_frame(&mut read, ctx.config.max_frame_payload()).await? {
        counters.on_received();

        let response = assembler.handle_request(&request).await?;
        write_frame(&mut write, &response).await?;
        counters.on_sent();

        if counters.limit_reached(ctx.config.disconnect_after) {
            info!(
                "diagnostic disconnect after {} requests",
                counters.received()
            );
            break;
        }
    }
    Ok(())
}

/// CLI-level entry point: binds and spawns the receiver session loop, returning
///  the bound address and the loop's join handle.
pub async fn start_backup_server(
    bind_addr: SocketAddr,
    ctx: Arc<ServerContext>,
) -> anyhow::Result<(SocketAddr, JoinHandle<anyhow::Result<()>>)> {
    let server = BackupServer::bind(bind_addr, ctx).await?;
    let local_addr = server.local_addr()?;
    let handle = tokio::spawn(async move { server.serve().await });
    Ok((local_addr, handle))
}
