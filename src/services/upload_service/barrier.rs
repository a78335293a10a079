use super::types::{FileTransfer, UploadError, UploadReport};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type FinishCallback = Box<dyn FnOnce(UploadReport) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferId(usize);

struct BarrierState {
    session_id: String,
    in_flight: usize,
    demux_finished: bool,
    transfers: Vec<FileTransfer>,
    on_finish: Option<FinishCallback>,
}

impl BarrierState {
    /// Takes the callback once both halves of the completion condition hold.
    fn take_if_done(&mut self) -> Option<(FinishCallback, UploadReport)> {
        if !self.demux_finished || self.in_flight > 0 {
            return None;
        }
        self.take_with(None)
    }

    fn take_with(&mut self, fatal: Option<UploadError>) -> Option<(FinishCallback, UploadReport)> {
        let callback = self.on_finish.take()?;
        let report = UploadReport {
            session_id: self.session_id.clone(),
            transfers: self.transfers.clone(),
            fatal,
        };
        Some((callback, report))
    }
}

/// Join point for one upload session.
///
/// The finish callback runs exactly once: when the demuxer has reported its
/// last file and no transfer is in flight, on `abort`, or, failing both, when
/// the barrier is dropped.
pub struct CompletionBarrier {
    state: Mutex<BarrierState>,
}

impl CompletionBarrier {
    pub fn new<F>(session_id: impl Into<String>, on_finish: F) -> Self
    where
        F: FnOnce(UploadReport) + Send + 'static,
    {
        Self {
            state: Mutex::new(BarrierState {
                session_id: session_id.into(),
                in_flight: 0,
                demux_finished: false,
                transfers: Vec::new(),
                on_finish: Some(Box::new(on_finish)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transfer_started(&self, transfer: FileTransfer) -> TransferId {
        let mut state = self.lock();
        state.in_flight += 1;
        state.transfers.push(transfer);
        TransferId(state.transfers.len() - 1)
    }

    /// Records the terminal state of a transfer. A second report for the same
    /// transfer is ignored.
    pub fn transfer_finished(&self, id: TransferId, transfer: FileTransfer) {
        let ready = {
            let mut state = self.lock();
            let Some(slot) = state.transfers.get_mut(id.0) else {
                tracing::warn!("Unknown transfer id {:?}", id);
                return;
            };
            if slot.state.is_terminal() {
                return;
            }
            *slot = transfer;
            state.in_flight -= 1;
            state.take_if_done()
        };
        fire(ready);
    }

    pub fn demux_finished(&self) {
        let ready = {
            let mut state = self.lock();
            state.demux_finished = true;
            state.take_if_done()
        };
        fire(ready);
    }

    /// Ends the session with `error`. Unfinished transfers are marked failed;
    /// with `discard_completed` the committed ones are too.
    pub fn abort(&self, error: UploadError, discard_completed: bool) {
        let ready = {
            let mut state = self.lock();
            let reason = error.to_string();
            for transfer in state.transfers.iter_mut() {
                if discard_completed {
                    transfer.discard(format!("discarded: {}", reason));
                } else {
                    transfer.fail(format!("aborted: {}", reason));
                }
            }
            state.in_flight = 0;
            state.take_with(Some(error))
        };
        fire(ready);
    }

    pub fn completed_destinations(&self) -> Vec<PathBuf> {
        self.lock()
            .transfers
            .iter()
            .filter_map(|t| match t.state {
                super::types::TransferState::Completed => t.destination_path.clone(),
                _ => None,
            })
            .collect()
    }
}

impl Drop for CompletionBarrier {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.on_finish.is_none() {
            return;
        }
        tracing::warn!("Upload session {} dropped before completion", state.session_id);
        for transfer in state.transfers.iter_mut() {
            transfer.fail("aborted: upload cancelled");
        }
        fire(state.take_with(Some(UploadError::StreamInterrupted(
            "upload cancelled before completion".to_string(),
        ))));
    }
}

fn fire(ready: Option<(FinishCallback, UploadReport)>) {
    if let Some((callback, report)) = ready {
        callback(report);
    }
}
