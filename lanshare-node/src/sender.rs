//! Outbound transfer worker: connect, send the header, stream the file in fixed-size chunks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lanshare_core::integrity::ContentDigest;
use lanshare_core::{
    encode_header, percent, Direction, TransferCounters, TransferError, TransferEvent,
    TransferHeader, TransferId, TransferOutcome,
};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::events::{emit, EventSender, NodeEvent};

/// One send request. Built by the node; consumed by `run_send`.
#[derive(Debug, Clone)]
pub struct SendJob {
    pub id: TransferId,
    pub peer: SocketAddr,
    pub path: PathBuf,
    pub chunk_size: usize,
    pub connect_timeout: Duration,
}

/// Run a job to completion. Emits `Started` and `Progress` events as it goes; the caller emits
/// the single `Finished` event via `finish`. File and connection are closed on every path.
pub async fn run_send(
    job: SendJob,
    counters: Arc<TransferCounters>,
    events: EventSender,
) -> TransferOutcome {
    match send(&job, &counters, &events).await {
        Ok(outcome) => {
            info!(id = %job.id, peer = %job.peer, bytes = outcome.bytes_transferred, "send complete");
            outcome
        }
        Err(e) => {
            warn!(id = %job.id, peer = %job.peer, error = %e, "send failed");
            TransferOutcome::failed(e, counters.bytes_done(), counters.total_bytes())
        }
    }
}

/// Emit the terminal event for a job.
pub fn finish(job_id: TransferId, outcome: &TransferOutcome, events: &EventSender) {
    emit(
        events,
        NodeEvent::Transfer(TransferEvent::Finished {
            id: job_id,
            direction: Direction::Outbound,
            outcome: outcome.clone(),
        }),
    );
}

async fn send(
    job: &SendJob,
    counters: &TransferCounters,
    events: &EventSender,
) -> Result<TransferOutcome, TransferError> {
    let file_open = |e: std::io::Error| TransferError::FileOpen {
        path: job.path.display().to_string(),
        reason: e.to_string(),
    };
    let mut file = File::open(&job.path).await.map_err(file_open)?;
    let meta = file.metadata().await.map_err(file_open)?;
    if !meta.is_file() {
        return Err(TransferError::FileOpen {
            path: job.path.display().to_string(),
            reason: "not a regular file".to_string(),
        });
    }
    let total = meta.len();
    counters.set_total(total);

    let file_name = job
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let header = encode_header(&TransferHeader::new(total, file_name.clone())).map_err(|e| {
        TransferError::FileOpen {
            path: job.path.display().to_string(),
            reason: e.to_string(),
        }
    })?;

    let mut stream = connect(job.peer, job.connect_timeout).await?;
    debug!(id = %job.id, peer = %job.peer, total, "connected");
    emit(
        events,
        NodeEvent::Transfer(TransferEvent::Started {
            id: job.id,
            direction: Direction::Outbound,
            peer: job.peer,
            file_name,
            total_bytes: total,
        }),
    );

    stream
        .write_all(&header)
        .await
        .map_err(|e| TransferError::io(&e))?;

    let sha256 = stream_body(&mut file, &mut stream, total, job.chunk_size, counters, |done| {
        emit(
            events,
            NodeEvent::Transfer(TransferEvent::Progress {
                id: job.id,
                direction: Direction::Outbound,
                percent: percent(done, total),
                bytes_done: done,
            }),
        );
    })
    .await?;

    stream.shutdown().await.map_err(|e| TransferError::io(&e))?;
    Ok(TransferOutcome::succeeded(total, Some(job.path.clone()), sha256))
}

async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, TransferError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TransferError::Connect {
            addr: addr.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(TransferError::ConnectTimeout {
            addr: addr.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Copy exactly `total` bytes from `reader` to `writer` in `chunk_size` pieces, one write per chunk.
/// `on_chunk` runs after every successful chunk write with the running byte count.
/// Returns the hex SHA-256 of the bytes sent; a short read or a failed write is an error.
pub async fn stream_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    chunk_size: usize,
    counters: &TransferCounters,
    mut on_chunk: impl FnMut(u64),
) -> Result<String, TransferError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let chunk_size = chunk_size.max(1);
    let mut buf = vec![0u8; chunk_size];
    let mut digest = ContentDigest::new();
    let mut sent = 0u64;
    while sent < total {
        let want = (total - sent).min(chunk_size as u64) as usize;
        let n = read_chunk(reader, &mut buf[..want])
            .await
            .map_err(|e| TransferError::io(&e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| TransferError::io(&e))?;
        digest.update(&buf[..n]);
        sent += n as u64;
        counters.advance(n as u64);
        on_chunk(sent);
    }
    writer.flush().await.map_err(|e| TransferError::io(&e))?;
    if sent != total {
        return Err(TransferError::ShortTransfer {
            transferred: sent,
            expected: total,
        });
    }
    Ok(digest.finish_hex())
}

/// Fill `buf` unless EOF comes first. Returns bytes read.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
