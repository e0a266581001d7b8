use clokwerk::{Scheduler, TimeUnits};
use log::info;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::studio_session::SessionRegistry;

/// How often idle sessions are looked for.
const SWEEP_INTERVAL_MINUTES: u32 = 5;

#[derive(Clone)]
pub struct SessionSweeper {
    registry: SessionRegistry,
}

impl SessionSweeper {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Runs one sweep now. Returns the number of sessions torn down.
    pub fn sweep(&self) -> usize {
        let removed = self.registry.evict_idle(chrono::Utc::now());
        if removed > 0 {
            info!(
                "Swept {} idle studio sessions, {} remaining",
                removed,
                self.registry.len()
            );
        }
        removed
    }

    pub fn start(&self) -> JoinHandle<()> {
        let mut scheduler = Scheduler::new();

        let sweeper = self.clone();
        scheduler
            .every(SWEEP_INTERVAL_MINUTES.minutes())
            .run(move || {
                sweeper.sweep();
            });

        let handle = thread::spawn(move || loop {
            scheduler.run_pending();
            thread::sleep(Duration::from_secs(30));
        });

        info!(
            "Session sweeper started - idle sessions checked every {} minutes",
            SWEEP_INTERVAL_MINUTES
        );
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studio_session::tests::services;

    #[tokio::test]
    async fn test_sweep_keeps_active_sessions() {
        let registry = SessionRegistry::new(services(0), 60);
        registry.resolve(None, None).await;
        registry.resolve(None, None).await;

        let sweeper = SessionSweeper::new(registry.clone());

        assert_eq!(sweeper.sweep(), 0);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_sessions() {
        // Zero TTL: anything seen before now is idle
        let registry = SessionRegistry::new(services(0), 0);
        registry.resolve(None, None).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let sweeper = SessionSweeper::new(registry.clone());

        assert_eq!(sweeper.sweep(), 1);
        assert!(registry.is_empty());
    }
}
