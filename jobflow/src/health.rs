//! Dependency health pre-checks.
//!
//! The worker runs every registered check before executing a pipeline so an
//! unreachable database fails the delivery fast, before any side effect.

use async_trait::async_trait;
use tracing::warn;

use crate::errors::{JobError, JobResult};

/// A reachability probe for a critical dependency.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Probes the dependency.
    async fn check(&self) -> anyhow::Result<()>;
}

/// Runs every check in order, failing on the first unhealthy one.
///
/// # Errors
///
/// Returns an `ExternalService` error naming the failing dependency.
pub async fn ensure_healthy(checks: &[std::sync::Arc<dyn HealthCheck>]) -> JobResult<()> {
    for check in checks {
        if let Err(e) = check.check().await {
            warn!(dependency = %check.name(), error = %e, "Health check failed");
            return Err(JobError::external_service(format!(
                "Dependency '{}' is unavailable: {e:#}",
                check.name()
            ))
            .with_context_entry("dependency", check.name()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Toggle {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl HealthCheck for Toggle {
        fn name(&self) -> &str {
            "database"
        }

        async fn check(&self) -> anyhow::Result<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                anyhow::bail!("connection refused")
            }
        }
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let check: Arc<dyn HealthCheck> = Arc::new(Toggle {
            healthy: AtomicBool::new(true),
        });
        assert!(ensure_healthy(&[check]).await.is_ok());
        assert!(ensure_healthy(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_unhealthy_is_external_service() {
        let check: Arc<dyn HealthCheck> = Arc::new(Toggle {
            healthy: AtomicBool::new(false),
        });

        let err = ensure_healthy(&[check]).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::ExternalService);
        assert!(err.is_retryable());
        assert_eq!(err.message, "Dependency 'database' is unavailable: connection refused");
    }
}
