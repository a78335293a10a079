use crate::config::UploadConfig;
use crate::services::storage::LocalStorage;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &UploadConfig) -> anyhow::Result<Arc<LocalStorage>> {
    tokio::fs::create_dir_all(&config.downloads_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create downloads directory {}",
                config.downloads_dir.display()
            )
        })?;

    info!("📁 Local Storage: {}", config.downloads_dir.display());
    Ok(Arc::new(LocalStorage::new()))
}
