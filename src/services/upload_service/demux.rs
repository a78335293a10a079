use super::types::UploadError;
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::StatusCode;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt, ready};
use std::pin::Pin;
use std::task::{Context, Poll};

enum Frame {
    Data(Bytes),
    End,
    Interrupted(String),
}

/// Byte stream of one file part.
///
/// Ends cleanly only when the demuxer saw the part's closing boundary. If the
/// demuxer goes away first the stream yields `StreamInterrupted` instead.
pub struct FileBody {
    rx: mpsc::Receiver<Frame>,
    done: bool,
}

impl Stream for FileBody {
    type Item = Result<Bytes, UploadError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match ready!(this.rx.poll_next_unpin(cx)) {
            Some(Frame::Data(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(Frame::End) => {
                this.done = true;
                Poll::Ready(None)
            }
            Some(Frame::Interrupted(reason)) => {
                this.done = true;
                Poll::Ready(Some(Err(UploadError::StreamInterrupted(reason))))
            }
            None => {
                this.done = true;
                Poll::Ready(Some(Err(UploadError::StreamInterrupted(
                    "file part abandoned before its closing boundary".to_string(),
                ))))
            }
        }
    }
}

pub struct FilePart {
    pub field_name: String,
    pub filename: String,
    pub body: FileBody,
}

/// Splits a `multipart/form-data` request into file parts.
pub struct MultipartDemuxer {
    multipart: Multipart,
    chunk_buffer: usize,
}

impl MultipartDemuxer {
    /// Fails with `Parse` when the content type or boundary is missing or malformed.
    pub async fn from_request(request: Request, chunk_buffer: usize) -> Result<Self, UploadError> {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| UploadError::Parse(e.to_string()))?;

        Ok(Self {
            multipart,
            chunk_buffer: chunk_buffer.max(1),
        })
    }

    /// Hands every file part to `on_file` in stream order, then returns how many
    /// there were. Returning `Ok` is the "no more files" signal.
    ///
    /// Each part's bytes are pumped through a bounded channel, so this future only
    /// reads the request body as fast as the slowest consumer drains it. A consumer
    /// that drops its body early gets the rest of the part discarded for it.
    pub async fn run<F>(mut self, mut on_file: F) -> Result<usize, UploadError>
    where
        F: FnMut(FilePart) + Send,
    {
        let chunk_buffer = self.chunk_buffer;
        let mut files = 0;

        loop {
            let mut field = match self.multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => return Err(classify_field_error(e)),
            };

            let field_name = field.name().unwrap_or_default().to_string();
            let filename = match field.file_name() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => {
                    tracing::debug!("Skipping non-file field '{}'", field_name);
                    while field.chunk().await.map_err(classify_chunk_error)?.is_some() {}
                    continue;
                }
            };

            files += 1;
            tracing::debug!("File part #{}: {} ({})", files, filename, field_name);

            let (mut tx, rx) = mpsc::channel(chunk_buffer);
            on_file(FilePart {
                field_name,
                filename: filename.clone(),
                body: FileBody { rx, done: false },
            });

            let mut consumer_alive = true;
            loop {
                match field.chunk().await {
                    Ok(Some(chunk)) => {
                        if consumer_alive && tx.send(Frame::Data(chunk)).await.is_err() {
                            tracing::debug!("Consumer of {} went away, draining part", filename);
                            consumer_alive = false;
                        }
                    }
                    Ok(None) => {
                        if consumer_alive {
                            let _ = tx.send(Frame::End).await;
                        }
                        break;
                    }
                    Err(e) => {
                        let err = classify_chunk_error(e);
                        if consumer_alive {
                            let reason = match &err {
                                UploadError::StreamInterrupted(reason) => reason.clone(),
                                other => other.to_string(),
                            };
                            let _ = tx.send(Frame::Interrupted(reason)).await;
                        }
                        return Err(err);
                    }
                }
            }
        }

        Ok(files)
    }
}

/// Maps a multipart failure onto the session error it stands for.
///
/// The body limit surfaces as 413, body read failures (connection reset) as 5xx,
/// and framing problems as 4xx.
fn classify_field_error(e: MultipartError) -> UploadError {
    let reason = e.body_text();
    let status = e.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE || reason.contains("length limit exceeded") {
        UploadError::PayloadTooLarge(reason)
    } else if status.is_server_error() {
        UploadError::StreamInterrupted(reason)
    } else {
        UploadError::Parse(reason)
    }
}

/// Inside a part the framing was already accepted, so anything short of the
/// size limit means the body broke off.
fn classify_chunk_error(e: MultipartError) -> UploadError {
    match classify_field_error(e) {
        UploadError::Parse(reason) => UploadError::StreamInterrupted(reason),
        other => other,
    }
}
