pub mod barrier;
pub mod demux;
mod transfer;
pub mod types;

use crate::services::clock::Clock;
use crate::services::progress::ProgressPublisher;
use crate::services::storage::StorageBackend;
use axum::extract::Request;
use barrier::CompletionBarrier;
use demux::MultipartDemuxer;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use transfer::{TransferContext, run_transfer};
use types::{FileTransfer, UploadError, UploadReport, UploadSession};

/// Wires demuxed file parts into storage and reports once per session.
pub struct UploadCoordinator {
    storage: Arc<dyn StorageBackend>,
    publisher: Arc<dyn ProgressPublisher>,
    clock: Arc<dyn Clock>,
    chunk_buffer: usize,
}

impl UploadCoordinator {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        publisher: Arc<dyn ProgressPublisher>,
        clock: Arc<dyn Clock>,
        chunk_buffer: usize,
    ) -> Self {
        Self {
            storage,
            publisher,
            clock,
            chunk_buffer,
        }
    }

    /// Runs the whole upload and calls `on_finish` exactly once before returning.
    ///
    /// Transfer failures stay local to their transfer. A malformed request rolls
    /// the session back, including files that had already been committed. A body
    /// that breaks off mid-part or exceeds the size limit keeps committed files and
    /// fails the rest, and so does a session that outlives its timeout.
    ///
    /// Dropping this future aborts every pipeline; their partial files are
    /// removed and `on_finish` still receives a cancellation report.
    pub async fn run<F>(&self, session: UploadSession, request: Request, on_finish: F)
    where
        F: FnOnce(UploadReport) + Send + 'static,
    {
        let barrier = Arc::new(CompletionBarrier::new(
            session.session_id.clone(),
            on_finish,
        ));
        tracing::info!(
            "Upload session {} started (root: {})",
            session.session_id,
            session.destination_root.display()
        );

        let demuxer = match MultipartDemuxer::from_request(request, self.chunk_buffer).await {
            Ok(demuxer) => demuxer,
            Err(e) => {
                tracing::error!("Rejecting upload session {}: {}", session.session_id, e);
                barrier.abort(e, true);
                return;
            }
        };

        let timeout = session.timeout;
        let ctx = TransferContext {
            session: Arc::new(session),
            storage: self.storage.clone(),
            clock: self.clock.clone(),
            publisher: self.publisher.clone(),
        };
        let mut pipelines = JoinSet::new();

        let work = async {
            let demuxed = demuxer
                .run(|part| {
                    let id = barrier
                        .transfer_started(FileTransfer::new(&part.field_name, &part.filename));
                    let barrier = barrier.clone();
                    let ctx = ctx.clone();
                    pipelines.spawn(async move {
                        let fallback = FileTransfer::new(&part.field_name, &part.filename);
                        let transfer = AssertUnwindSafe(run_transfer(part, ctx))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                let mut failed = fallback;
                                failed.fail("transfer task panicked");
                                failed
                            });
                        barrier.transfer_finished(id, transfer);
                    });
                })
                .await;

            let interrupted = match demuxed {
                Ok(files) => {
                    tracing::debug!("Demuxer finished with {} file part(s)", files);
                    barrier.demux_finished();
                    None
                }
                Err(e) if e.rolls_back_session() => return Err(e),
                Err(e) => Some(e),
            };

            // Every pipeline has been told how its part ended, so these all finish.
            while pipelines.join_next().await.is_some() {}

            match interrupted {
                Some(e) => Err(e),
                None => Ok(()),
            }
        };

        let fatal = match tokio::time::timeout(timeout, work).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(UploadError::Timeout(timeout)),
        };

        if let Some(error) = fatal {
            let roll_back = error.rolls_back_session();
            tracing::error!(
                "Upload session {} aborted: {}",
                ctx.session.session_id,
                error
            );

            pipelines.abort_all();
            while pipelines.join_next().await.is_some() {}

            if roll_back {
                for destination in barrier.completed_destinations() {
                    if let Err(e) = self.storage.remove(&destination).await {
                        tracing::warn!("Rollback could not remove {}: {}", destination.display(), e);
                    }
                }
            }
            barrier.abort(error, roll_back);
            return;
        }

        tracing::info!("Upload session {} finished", ctx.session.session_id);
    }
}
