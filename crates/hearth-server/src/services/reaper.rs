//! Background removal of upload sessions that never completed

use hearth_core::TransferService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sweep sessions older than `ttl` every `every`.
pub fn spawn(service: Arc<TransferService>, ttl: Duration, every: Duration) -> JoinHandle<()> {
    info!(
        "Session reaper started: ttl={}s, interval={}s",
        ttl.as_secs(),
        every.as_secs()
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // First tick fires immediately and clears leftovers from the previous run
        loop {
            interval.tick().await;
            sweep_once(&service, ttl).await;
        }
    })
}

pub async fn sweep_once(service: &TransferService, ttl: Duration) -> usize {
    match service.sweep_expired(ttl).await {
        Ok(0) => {
            debug!("Session sweep: nothing expired");
            0
        }
        Ok(n) => {
            info!("Session sweep removed {} expired upload(s)", n);
            n
        }
        Err(e) => {
            warn!("Session sweep failed: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::Broadcaster;
    use hearth_types::InitUploadRequest;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sweep_once_removes_stale_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let service = TransferService::open(temp_dir.path(), Arc::new(Broadcaster::new()))
            .await
            .unwrap();
        let resp = service
            .upload_init(
                "alice",
                InitUploadRequest {
                    file_name: "a.bin".into(),
                    size: 8,
                    mime: String::new(),
                    file_key: None,
                    chunk_size: Some(4),
                },
            )
            .await
            .unwrap();

        assert_eq!(sweep_once(&service, Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(sweep_once(&service, Duration::ZERO).await, 1);
        assert!(service.upload_status(&resp.upload_id).await.is_err());
    }
}
