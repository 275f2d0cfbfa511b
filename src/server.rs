//! TCP surface of the simulator: every connection receives the broadcast
//! stream and may send control commands, one JSON object per line.

use crate::broadcast::{BroadcastHub, Subscription};
use crate::protocol::{encode_line, ControlCommand, ServerEvent, MAX_LINE_LENGTH};
use crate::scheduler::ControlRequest;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

pub const COMMAND_CHANNEL_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("client I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("client framing error: {0}")]
    Lines(#[from] LinesCodecError),
    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Accepts clients forever. Each client is subscribed before anything else so
/// it sees every message published after its connection was accepted.
pub async fn serve(
    listener: TcpListener,
    hub: BroadcastHub,
    commands: mpsc::Sender<ControlRequest>,
) -> std::io::Result<()> {
    info!("🌐 Listening for clients on {}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 Client connected: {}", addr);
                let subscription = hub.subscribe();
                let commands = commands.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, addr, subscription, commands).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("🔌 Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    subscription: Subscription,
    commands: mpsc::Sender<ControlRequest>,
) -> Result<(), ServerError> {
    let (reader, writer) = stream.into_split();
    let writer: SharedWriter = Arc::new(Mutex::new(writer));

    let forward_task = tokio::spawn(forward_broadcasts(addr, subscription, Arc::clone(&writer)));

    let result = read_commands(reader, addr, &writer, &commands).await;
    forward_task.abort();
    result
}

async fn read_commands(
    reader: OwnedReadHalf,
    addr: SocketAddr,
    writer: &SharedWriter,
    commands: &mpsc::Sender<ControlRequest>,
) -> Result<(), ServerError> {
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut resume_after_error = false;
    loop {
        let line = match lines.next().await {
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                reply(writer, &error_event("command line too long")).await?;
                resume_after_error = true;
                continue;
            }
            Some(Err(e)) => return Err(e.into()),
            // One None follows a decode error before the stream reads on
            None if resume_after_error => {
                resume_after_error = false;
                continue;
            }
            None => return Ok(()),
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let command = match serde_json::from_str::<ControlCommand>(trimmed) {
            Ok(command) => command,
            Err(e) => {
                warn!("Invalid command from {}: {}", addr, e);
                reply(writer, &error_event(&format!("Invalid command: {}", e))).await?;
                continue;
            }
        };

        debug!("📨 Command from {}: {:?}", addr, command);
        if let Some(event) = dispatch(commands, command).await {
            reply(writer, &event).await?;
        }
    }
}

/// Hands the command to the scheduler. Returns an event only when it must go
/// back to this client alone; successes reach everyone via the broadcast.
async fn dispatch(commands: &mpsc::Sender<ControlRequest>, command: ControlCommand) -> Option<ServerEvent> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = ControlRequest {
        command,
        reply: Some(reply_tx),
    };

    if commands.send(request).await.is_err() {
        return Some(error_event("scheduler is not running"));
    }

    match reply_rx.await {
        Ok(event @ ServerEvent::Error { .. }) => Some(event),
        Ok(_) => None,
        Err(_) => Some(error_event("scheduler dropped the command")),
    }
}

async fn forward_broadcasts(addr: SocketAddr, mut subscription: Subscription, writer: SharedWriter) {
    loop {
        match subscription.recv().await {
            Ok(line) => {
                let mut guard = writer.lock().await;
                if let Err(e) = write_line(&mut guard, &line).await {
                    debug!("Stopped forwarding to {}: {}", addr, e);
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Client {} lagging, skipped {} messages", addr, skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn reply(writer: &SharedWriter, event: &ServerEvent) -> Result<(), ServerError> {
    let line = encode_line(event)?;
    let mut guard = writer.lock().await;
    write_line(&mut guard, &line).await?;
    Ok(())
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

fn error_event(message: &str) -> ServerEvent {
    ServerEvent::Error {
        message: message.to_string(),
    }
}
