use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the upload service
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Directory uploaded files are written to (default: "downloads")
    pub downloads_dir: PathBuf,

    /// Minimum gap between two progress events of one file, in ms (default: 200)
    pub progress_interval_ms: u64,

    /// Upper bound on a whole upload request (default: 1 hour)
    pub session_timeout: Duration,

    /// Chunks buffered between the multipart parser and each file's writer (default: 8)
    pub chunk_buffer: usize,

    /// Maximum request body size in bytes (default: 1 GB)
    pub max_request_size: usize,

    /// Staging files older than this are swept (default: 24)
    pub staging_cleanup_age_hours: u64,

    /// Allowed CORS origins (comma separated, "*" for any)
    pub allowed_origins: Vec<String>,

    /// Bind address
    pub host: String,
    pub port: u16,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            progress_interval_ms: 200,
            session_timeout: Duration::from_secs(3600),
            chunk_buffer: 8,
            max_request_size: 1024 * 1024 * 1024, // 1 GB
            staging_cleanup_age_hours: 24,
            allowed_origins: vec!["*".to_string()],
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            downloads_dir: env::var("DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.downloads_dir),

            progress_interval_ms: env::var("PROGRESS_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.progress_interval_ms),

            session_timeout: env::var("SESSION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.session_timeout),

            chunk_buffer: env::var("CHUNK_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(default.chunk_buffer),

            max_request_size: env::var("MAX_REQUEST_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_request_size),

            staging_cleanup_age_hours: env::var("STAGING_CLEANUP_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.staging_cleanup_age_hours),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),

            host: env::var("HOST").unwrap_or(default.host),

            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),
        }
    }

    /// Config for tests and local runs: fast progress, short timeout
    pub fn development(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
            progress_interval_ms: 0,
            session_timeout: Duration::from_secs(30),
            chunk_buffer: 4,
            max_request_size: 64 * 1024 * 1024,
            staging_cleanup_age_hours: 1,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(), // Vite default
                "http://127.0.0.1:3000".to_string(),
            ],
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}
