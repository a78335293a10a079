use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Malformed multipart request: {0}")]
    Parse(String),

    #[error("Failed to write {}: {source}", path.display())]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request body exceeds the maximum allowed size: {0}")]
    PayloadTooLarge(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Upload session timed out after {0:?}")]
    Timeout(Duration),
}

impl UploadError {
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UploadError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Session-level failures after which files committed earlier in the same
    /// session are removed again. Interruptions keep what already landed.
    pub fn rolls_back_session(&self) -> bool {
        matches!(self, UploadError::Parse(_))
    }
}

/// Per-request upload parameters. Immutable once the request is accepted.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub session_id: String,
    pub destination_root: PathBuf,
    pub throttle_interval_ms: u64,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Streaming,
    Completed,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Pending => "pending",
            TransferState::Streaming => "streaming",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileTransfer {
    pub field_name: String,
    pub filename: String,
    pub destination_path: Option<PathBuf>,
    pub bytes_processed: u64,
    pub last_emit_ms: u64,
    pub state: TransferState,
    pub error: Option<String>,
}

impl FileTransfer {
    pub fn new(field_name: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            filename: filename.into(),
            destination_path: None,
            bytes_processed: 0,
            last_emit_ms: 0,
            state: TransferState::Pending,
            error: None,
        }
    }

    pub fn mark_streaming(&mut self) {
        if self.state == TransferState::Pending {
            self.state = TransferState::Streaming;
        }
    }

    /// Returns false if the transfer had already reached a terminal state.
    pub fn complete(&mut self, destination: PathBuf) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.destination_path = Some(destination);
        self.state = TransferState::Completed;
        true
    }

    /// Returns false if the transfer had already reached a terminal state.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = TransferState::Failed;
        self.error = Some(reason.into());
        true
    }

    /// Session rollback: a committed file was removed again, so the transfer
    /// is reported as failed even though its own pipeline succeeded.
    pub fn discard(&mut self, reason: impl Into<String>) {
        match self.state {
            TransferState::Failed => {}
            TransferState::Completed => {
                self.state = TransferState::Failed;
                self.destination_path = None;
                self.error = Some(reason.into());
            }
            _ => {
                self.fail(reason);
            }
        }
    }
}

/// Handed to the finish callback once per session.
#[derive(Debug)]
pub struct UploadReport {
    pub session_id: String,
    pub transfers: Vec<FileTransfer>,
    pub fatal: Option<UploadError>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
            && self
                .transfers
                .iter()
                .all(|t| t.state == TransferState::Completed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileTransfer> {
        self.transfers
            .iter()
            .filter(|t| t.state == TransferState::Failed)
    }

    pub fn completed(&self) -> impl Iterator<Item = &FileTransfer> {
        self.transfers
            .iter()
            .filter(|t| t.state == TransferState::Completed)
    }
}
