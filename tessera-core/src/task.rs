use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to a spawned background loop. Shutdown is a handshake: flip the
/// watch channel, then await the task so it finishes its current tick
/// before the caller proceeds.
pub struct TaskHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn new(shutdown: watch::Sender<bool>, handle: JoinHandle<()>) -> Self {
        Self { shutdown, handle }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "background task aborted during shutdown");
        }
    }
}
