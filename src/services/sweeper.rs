use crate::services::temp_file_store::TempFileStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic expiry sweep so a quiet server does not pin expired scratch
/// files until the next upload triggers the lazy sweep.
pub struct SweepWorker {
    store: Arc<TempFileStore>,
    shutdown: watch::Receiver<bool>,
}

impl SweepWorker {
    pub fn new(store: Arc<TempFileStore>, shutdown: watch::Receiver<bool>) -> Self {
        Self { store, shutdown }
    }

    pub async fn run(mut self) {
        tracing::info!("🧹 Expiry sweep worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Expiry sweep worker shutting down");
                    break;
                }
                _ = sleep(SWEEP_INTERVAL) => {
                    self.store.sweep_expired().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::temp_file_store::HANDLE_TTL;

    #[tokio::test(start_paused = true)]
    async fn worker_purges_expired_handles() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("idle.txt");
        std::fs::write(&path, b"idle").unwrap();

        let store = Arc::new(TempFileStore::new());
        let handle = store.register(path.clone(), "idle.txt".to_string()).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = SweepWorker::new(store.clone(), shutdown_rx);
        let worker_task = tokio::spawn(worker.run());

        tokio::time::advance(HANDLE_TTL + SWEEP_INTERVAL).await;
        for _ in 0..100 {
            if store.live_handles() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(store.live_handles(), 0);
        assert!(
            store.resolve(&handle.token).await.is_err(),
            "swept token must not resolve"
        );

        let _ = shutdown_tx.send(true);
        worker_task.await.unwrap();
    }
}
