use super::demux::{FileBody, FilePart};
use super::types::{FileTransfer, UploadError, UploadSession};
use crate::services::clock::Clock;
use crate::services::progress::{ProgressPublisher, ProgressThrottler};
use crate::services::storage::StorageBackend;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct TransferContext {
    pub session: Arc<UploadSession>,
    pub storage: Arc<dyn StorageBackend>,
    pub clock: Arc<dyn Clock>,
    pub publisher: Arc<dyn ProgressPublisher>,
}

/// Drives one file part into storage and returns its terminal state.
///
/// `bytes_processed` only counts bytes the sink accepted.
pub(crate) async fn run_transfer(part: FilePart, ctx: TransferContext) -> FileTransfer {
    let FilePart {
        field_name,
        filename,
        mut body,
    } = part;
    let mut transfer = FileTransfer::new(field_name, filename);

    match stream_to_storage(&mut transfer, &mut body, &ctx).await {
        Ok(destination) => {
            tracing::info!(
                "Stored {} ({} bytes) at {}",
                transfer.filename,
                transfer.bytes_processed,
                destination.display()
            );
            transfer.complete(destination);
        }
        Err(e) => {
            tracing::warn!(
                "Transfer of {} failed after {} bytes: {}",
                transfer.filename,
                transfer.bytes_processed,
                e
            );
            transfer.fail(e.to_string());
        }
    }

    transfer
}

async fn stream_to_storage(
    transfer: &mut FileTransfer,
    body: &mut FileBody,
    ctx: &TransferContext,
) -> Result<PathBuf, UploadError> {
    let mut sink = ctx
        .storage
        .open(&ctx.session.destination_root, &transfer.filename)
        .await?;
    let mut throttler = ProgressThrottler::new(
        ctx.session.session_id.clone(),
        transfer.filename.clone(),
        ctx.session.throttle_interval_ms,
        ctx.clock.clone(),
        ctx.publisher.clone(),
    );
    transfer.mark_streaming();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        sink.write(&chunk).await?;
        transfer.bytes_processed = throttler.record(chunk.len());
        transfer.last_emit_ms = throttler.last_emit_ms();
    }

    let destination = sink.commit().await?;
    throttler.flush();
    transfer.last_emit_ms = throttler.last_emit_ms();

    Ok(destination)
}
