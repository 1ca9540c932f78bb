use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::frame::{read_frame, write_frame, Frame};
use crate::pending::PendingWork;
use crate::region::RegionLoader;
use crate::sender::SenderCursor;
use crate::session::{SessionCounters, SessionLimiter, SessionPermit};
use crate::wire::{classify, MessageKind};
use std::cmp::min;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything a sender session needs, passed in explicitly instead of living in
///  process-wide state. The limiter is shared across all sessions started from
///  this context.
pub struct ClientContext {
    pub config: Arc<TransferConfig>,
    pub pending: Arc<dyn PendingWork>,
    pub loader: Arc<dyn RegionLoader>,
    pub limiter: SessionLimiter,
}

/// One outbound backup session. Holds a limiter permit from successful connect
///  until its event loop exits.
pub struct BackupClient {
    stream: TcpStream,
    ctx: Arc<ClientContext>,
    permit: SessionPermit,
}

impl BackupClient {
    /// Fails immediately with a capacity error if the concurrent-session cap is
    ///  already reached - no connection is attempted in that case.
    pub async fn connect(target_addr: SocketAddr, ctx: Arc<ClientContext>) -> anyhow::Result<BackupClient> {
        ctx.config.validate()?;
        let permit = ctx.limiter.try_acquire()?;

        let stream = TcpStream::connect(target_addr).await?;
        info!("connected to backup server at {}", target_addr);
        Ok(BackupClient { stream, ctx, permit })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        // released when the session loop exits
        let _permit = self.permit;
        run_session(self.stream, self.ctx).await
    }
}

/// Drives one sender session: strictly single-outstanding request/response
///  turnarounds, with the cursor deciding between heartbeat and data on each
///  turn. Returns when the peer closes the connection or the diagnostic
///  disconnect threshold is reached; teardown mid-transfer is an error.
pub async fn run_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    ctx: Arc<ClientContext>,
) -> anyhow::Result<()> {
    let (mut read, mut write) = tokio::io::split(stream);
    let mut cursor = SenderCursor::new(ctx.config.clone());
    let mut counters = SessionCounters::default();

    let mut next = SenderCursor::heartbeat();
    loop {
        let request = Frame::new(counters.sent() + 1, next.tag, next.payload);
        write_frame(&mut write, &request).await?;
        counters.on_sent();

        let Some(response) = read_frame(&mut read, ctx.config.max_frame_payload()).await? else {
            info!("server closed the connection");
            break;
        };
        counters.on_received();

        if response.correlation != request.correlation {
            return Err(TransferError::Protocol(format!(
                "response correlation {} does not match request {}",
                response.correlation, request.correlation
            ))
            .into());
        }
        process_response(&ctx.config, &counters, &response);

        if counters.limit_reached(ctx.config.disconnect_after) {
            info!("diagnostic disconnect after {} messages", counters.sent());
            break;
        }

        next = cursor
            .next_request(ctx.pending.as_ref(), ctx.loader.as_ref())
            .await?;
    }

    if !cursor.is_idle() {
        return Err(TransferError::Transport(
            "connection closed mid-transfer".to_string(),
        )
        .into());
    }
    Ok(())
}

fn process_response(config: &TransferConfig, counters: &SessionCounters, response: &Frame) {
    match classify(&response.tag) {
        Ok(MessageKind::HeartbeatResponse) => {
            if counters.received() % config.diagnostic_log_interval == 0 {
                let body_preview = &response.payload[..min(response.payload.len(), 64)];
                info!(
                    "response #{}: header {:?}, body starting {:?}",
                    counters.received(),
                    response.tag,
                    body_preview
                );
            }
        }
        Ok(other) => debug!("ignoring unexpected response kind {:?}", other),
        Err(e) => warn!("ignoring unclassifiable response: {}", e),
    }
}

/// CLI-level entry point: spawns one sender session loop. Fails synchronously
///  on an invalid config or, with a capacity error, if the concurrent-session
///  cap is already reached - only the connection attempt itself runs on the
///  spawned task.
pub fn start_backup_client(
    target_addr: SocketAddr,
    ctx: Arc<ClientContext>,
) -> Result<JoinHandle<anyhow::Result<()>>, TransferError> {
    ctx.config
        .validate()
        .map_err(|e| TransferError::Transport(e.to_string()))?;
    let permit = ctx.limiter.try_acquire()?;

    Ok(tokio::spawn(async move {
        let stream = TcpStream::connect(target_addr).await?;
        info!("connected to backup server at {}", target_addr);
        BackupClient { stream, ctx, permit }.run().await
    }))
}
