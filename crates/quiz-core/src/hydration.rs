use std::sync::Arc;
use tokio::sync::watch;

/// One-shot readiness signal: flips to ready once the first load attempt
/// has resolved, whether or not it found anything. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HydrationGate {
    ready: Arc<watch::Sender<bool>>,
}

impl HydrationGate {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            ready: Arc::new(ready),
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Returns `true` only for the call that opened the gate.
    pub fn mark_ready(&self) -> bool {
        self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives as long as `self`, so this cannot close early.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for HydrationGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn opens_exactly_once() {
        let gate = HydrationGate::new();
        assert!(!gate.is_ready());
        assert!(gate.mark_ready());
        assert!(!gate.mark_ready());
        assert!(gate.clone().is_ready());
    }

    #[tokio::test]
    async fn waiters_are_released_on_open() {
        let gate = HydrationGate::new();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_ready().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        gate.mark_ready();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .unwrap();
        // already open: returns immediately
        gate.wait_ready().await;
    }
}
