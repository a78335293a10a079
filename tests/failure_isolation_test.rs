use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;
use upload_relay::config::UploadConfig;
use upload_relay::services::storage::{LocalStorage, StorageBackend, StorageSink};
use upload_relay::services::upload_service::types::UploadError;
use upload_relay::{AppState, create_app};

const BOUNDARY: &str = "----isolation-boundary";

/// Local storage whose sink for one filename fails on the first write.
struct FlakyStorage {
    inner: LocalStorage,
    broken: &'static str,
}

struct FailingSink {
    destination: PathBuf,
}

#[async_trait]
impl StorageSink for FailingSink {
    async fn write(&mut self, _chunk: &[u8]) -> Result<(), UploadError> {
        Err(UploadError::io_write(
            &self.destination,
            std::io::Error::other("disk full"),
        ))
    }

    async fn commit(self: Box<Self>) -> Result<PathBuf, UploadError> {
        Ok(self.destination)
    }
}

#[async_trait]
impl StorageBackend for FlakyStorage {
    async fn open(
        &self,
        destination_root: &Path,
        filename: &str,
    ) -> Result<Box<dyn StorageSink>, UploadError> {
        if filename == self.broken {
            return Ok(Box::new(FailingSink {
                destination: destination_root.join(filename),
            }));
        }
        self.inner.open(destination_root, filename).await
    }

    async fn remove(&self, destination: &Path) -> Result<(), UploadError> {
        self.inner.remove(destination).await
    }
}

fn file_part(filename: &str, content: &str) -> String {
    format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\r\n{content}\r\n"
    )
}

fn multipart(body: Body) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload?socketId=iso")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(body)
        .unwrap()
}

async fn json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_one_failing_file_does_not_fail_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FlakyStorage {
        inner: LocalStorage::new(),
        broken: "broken.bin",
    });
    let app = create_app(AppState::new(
        UploadConfig::development(dir.path()),
        storage,
    ));

    let body = [
        file_part("broken.bin", "never lands"),
        file_part("fine.txt", "lands fine"),
        format!("--{BOUNDARY}--\r\n"),
    ]
    .concat();

    let response = app.oneshot(multipart(Body::from(body))).await.unwrap();
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);

    let body = json(response).await;
    assert!(body["error"].is_null());
    let files = body["files"].as_array().unwrap();
    assert_eq!(files[0]["filename"], "broken.bin");
    assert_eq!(files[0]["state"], "failed");
    assert!(files[0]["error"].as_str().unwrap().contains("disk full"));
    // Nothing reached storage for the failed file
    assert_eq!(files[0]["bytes"], 0);
    assert_eq!(files[1]["bytes"], 10);
    assert_eq!(files[1]["state"], "completed");

    assert_eq!(
        std::fs::read(dir.path().join("fine.txt")).unwrap(),
        b"lands fine"
    );
    assert!(!dir.path().join("broken.bin").exists());
}

#[tokio::test]
async fn test_client_disconnect_keeps_committed_files() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(AppState::new(
        UploadConfig::development(dir.path()),
        Arc::new(LocalStorage::new()),
    ));

    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from(file_part("first.txt", "all here"))),
        Ok(Bytes::from(format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"second.txt\"\r\n\r\nhalf of"
        ))),
        Err(std::io::Error::other("connection reset by peer")),
    ];
    let body = Body::from_stream(futures::stream::iter(chunks));

    let response = app.oneshot(multipart(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json(response).await;
    assert!(body["error"].as_str().unwrap().contains("interrupted"));
    let files = body["files"].as_array().unwrap();
    assert_eq!(files[0]["state"], "completed");
    assert_eq!(files[1]["state"], "failed");

    assert_eq!(
        std::fs::read(dir.path().join("first.txt")).unwrap(),
        b"all here"
    );
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1);
}
