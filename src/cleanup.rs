use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::{AppError, ConfigError};
use crate::registry::TokenRegistry;

/// Periodic sweep that deactivates registry entries past their expiry.
///
/// Expired rows are marked inactive and revoked, never deleted.
#[derive(Clone)]
pub struct CleanupTask {
    registry: Arc<dyn TokenRegistry>,
    interval: Duration,
}

impl CleanupTask {
    /// Fails on a zero interval, which `tokio::time::interval` cannot tick at.
    pub fn new(registry: Arc<dyn TokenRegistry>, interval: Duration) -> Result<Self, AppError> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "cleanup.interval_seconds must be greater than zero".to_string(),
            )
            .into());
        }
        Ok(Self { registry, interval })
    }

    /// Run a single sweep against `now`, returning how many entries were deactivated.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let swept = self.registry.sweep_expired(now).await?;
        if swept > 0 {
            tracing::info!(swept, "Deactivated expired tokens");
        } else {
            tracing::debug!("No expired tokens to deactivate");
        }
        Ok(swept)
    }

    /// Start the sweep loop on the runtime.
    ///
    /// A failed sweep is logged and the loop waits for the next tick.
    pub fn spawn(self) -> JoinHandle<()> {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting expired token cleanup task"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once(Utc::now()).await {
                    tracing::error!(error = %e, "Expired token cleanup failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenKind;
    use crate::registry::{InMemoryTokenRegistry, NewToken};

    fn access(token: &str, expires_at: DateTime<Utc>) -> NewToken {
        NewToken {
            user_id: 1,
            token: token.to_string(),
            kind: TokenKind::Access,
            expires_at: Some(expires_at),
            jti: None,
            user_agent: None,
            ip_address: None,
        }
    }

    #[tokio::test]
    async fn run_once_deactivates_only_expired_entries() {
        let registry = Arc::new(InMemoryTokenRegistry::new());
        let now = Utc::now();
        registry
            .store(access("stale", now - chrono::Duration::seconds(1)))
            .await
            .unwrap();
        registry
            .store(access("fresh", now + chrono::Duration::minutes(10)))
            .await
            .unwrap();

        let task = CleanupTask::new(registry.clone(), Duration::from_secs(300)).unwrap();
        assert_eq!(task.run_once(now).await.unwrap(), 1);
        assert_eq!(task.run_once(now).await.unwrap(), 0);

        let records = registry.all_records();
        let stale = records.iter().find(|r| r.token == "stale").unwrap();
        assert!(!stale.is_active);
        assert!(stale.revoked);
        assert!(registry.find_active_access("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn spawned_task_sweeps_on_first_tick() {
        let registry = Arc::new(InMemoryTokenRegistry::new());
        registry
            .store(access("stale", Utc::now() - chrono::Duration::seconds(5)))
            .await
            .unwrap();

        let handle = CleanupTask::new(registry.clone(), Duration::from_millis(20))
            .unwrap()
            .spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(registry.all_records().iter().all(|r| !r.is_active));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let registry = Arc::new(InMemoryTokenRegistry::new());
        assert!(matches!(
            CleanupTask::new(registry, Duration::ZERO),
            Err(AppError::Config(ConfigError::InvalidValue(_)))
        ));
    }
}
