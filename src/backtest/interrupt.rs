use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation flag shared between a run loop and whoever stops it.
///
/// Loops poll `is_triggered` at step boundaries; the live loop also awaits
/// `triggered` so a pacing sleep ends as soon as the flag is raised.
#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Lower the flag so the handle can be reused for another run.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once the flag is raised.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|raised| *raised).await;
    }

    /// Raise the flag on Ctrl-C. Runs until the signal arrives.
    pub async fn listen_ctrl_c(self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Ctrl-C received, stopping after the current step");
                self.trigger();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trigger_and_reset() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.is_triggered());
        let handle = interrupt.clone();
        handle.trigger();
        assert!(interrupt.is_triggered());
        interrupt.reset();
        assert!(!handle.is_triggered());
    }

    #[tokio::test]
    async fn test_triggered_resolves_after_trigger() {
        let interrupt = Interrupt::new();
        let handle = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            handle.trigger();
        });
        tokio::time::timeout(Duration::from_secs(5), interrupt.triggered())
            .await
            .unwrap();
        assert!(interrupt.is_triggered());
    }

    #[tokio::test]
    async fn test_triggered_returns_immediately_when_raised() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        tokio::time::timeout(Duration::from_millis(100), interrupt.triggered())
            .await
            .unwrap();
    }
}
