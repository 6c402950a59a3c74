use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawns completion tasks onto the shared worker pool.
///
/// A cancelled task is dropped at its next suspension point, together with
/// everything it holds.
#[derive(Debug, Clone)]
pub struct BackgroundSpawner {
    token: CancellationToken,
}

impl BackgroundSpawner {
    pub fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = task => {}
            }
        })
    }
}

#[derive(Debug, Default)]
pub struct BackgroundMonitor {
    token: CancellationToken,
}

impl BackgroundMonitor {
    pub fn spawner(&self) -> BackgroundSpawner {
        BackgroundSpawner {
            token: self.token.clone(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
