//! Connection handling
//!
//! A connection is split in three: a reader task parsing RESP frames off the
//! socket, the dispatch loop feeding them to the service one at a time, and a
//! writer task encoding replies. A read error or a failed write cancels the
//! connection's token so a command stuck waiting for locks gives up; a clean
//! half-close lets every command already received run first.

use crate::protocol::{RespEncoder, RespError, RespParser, RespValue};
use crate::service::{ConnectionContext, Service};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the reader hands to the dispatch loop
enum Frame {
    Command(Vec<Bytes>),
    Malformed(RespError),
}

/// Connection handler
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Connection { stream, peer }
    }

    /// Serve the client until it disconnects, sends QUIT or breaks the protocol
    pub async fn handle(self, service: Arc<Service>) -> anyhow::Result<()> {
        let peer = self.peer;
        let (read_half, write_half) = self.stream.into_split();

        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let mut cntx = ConnectionContext::with_sink(reply_tx);

        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_frames(
            read_half,
            frame_tx,
            cntx.cancellation_token().clone(),
            peer,
        ));
        let writer = tokio::spawn(write_replies(
            write_half,
            reply_rx,
            cntx.cancellation_token().clone(),
        ));

        while let Some(frame) = frame_rx.recv().await {
            match frame {
                Frame::Command(args) => {
                    service.dispatch_command(args, &mut cntx).await;
                    if cntx.is_closing() {
                        debug!("{} sent QUIT", peer);
                        break;
                    }
                }
                Frame::Malformed(e) => {
                    warn!("Protocol error from {}: {}", peer, e);
                    cntx.reply(RespValue::error(format!("ERR Protocol error: {}", e)));
                    break;
                }
            }
        }

        reader.abort();
        // Closing the reply channel lets the writer flush and exit
        drop(cntx);
        writer.await??;
        Ok(())
    }
}

async fn read_frames(
    mut stream: OwnedReadHalf,
    frames: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
    peer: SocketAddr,
) {
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        match stream.read_buf(&mut buffer).await {
            // Half-close: commands already parsed still run, then the loop ends
            Ok(0) => {
                if !buffer.is_empty() {
                    debug!("{} closed with {} unparsed bytes", peer, buffer.len());
                }
                return;
            }
            Ok(n) => debug!("Read {} bytes from {}", n, peer),
            Err(e) => {
                debug!("Read from {} failed: {}", peer, e);
                cancel.cancel();
                return;
            }
        }

        loop {
            match RespParser::parse_command(&mut buffer) {
                Ok(Some(args)) => {
                    if frames.send(Frame::Command(args)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = frames.send(Frame::Malformed(e));
                    return;
                }
            }
        }
    }
}

async fn write_replies(
    mut stream: OwnedWriteHalf,
    mut replies: mpsc::UnboundedReceiver<RespValue>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(4096);

    while let Some(reply) = replies.recv().await {
        buffer.clear();
        RespEncoder::encode_to(&mut buffer, &reply);
        // Batch whatever else is already waiting
        while let Ok(more) = replies.try_recv() {
            RespEncoder::encode_to(&mut buffer, &more);
        }
        if let Err(e) = write_batch(&mut stream, &buffer).await {
            // Peer is gone; abort whatever it still has running
            cancel.cancel();
            return Err(e);
        }
    }

    stream.shutdown().await
}

async fn write_batch(stream: &mut OwnedWriteHalf, buffer: &[u8]) -> std::io::Result<()> {
    stream.write_all(buffer).await?;
    stream.flush().await
}
