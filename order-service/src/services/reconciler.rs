//! Background retry of invoice issuance.
//!
//! Orders whose invoice is still pending or failed after one interval are
//! repriced if needed and sent to the provider again. Both steps are
//! idempotent per order, so overlapping runs are harmless.
//!
//! A failed attempt pushes the order back with exponential backoff, so orders
//! that keep failing cannot starve newer ones out of the batch. Orders that can
//! never be priced, or that exhaust their attempts, are abandoned.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ReconcilerConfig;
use crate::models::InvoiceRetry;
use crate::settlement::{SettlementCoordinator, SettlementError};

/// Upper bound `chrono::Duration::seconds` accepts.
const MAX_DELAY_SECONDS: u64 = (i64::MAX / 1000) as u64;

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub issued: usize,
    /// Failed and scheduled for another attempt.
    pub failed: usize,
    pub abandoned: usize,
}

#[derive(Clone)]
pub struct InvoiceReconciler {
    config: ReconcilerConfig,
    coordinator: SettlementCoordinator,
    shutdown_token: CancellationToken,
}

impl InvoiceReconciler {
    pub fn new(config: ReconcilerConfig, coordinator: SettlementCoordinator) -> Self {
        Self {
            config,
            coordinator,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn start(&self) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Invoice reconciler disabled by configuration");
            return None;
        }

        tracing::info!(
            interval_seconds = self.config.interval_seconds,
            batch_size = self.config.batch_size,
            "Starting invoice reconciler"
        );

        let reconciler = self.clone();
        let shutdown = self.shutdown_token.clone();

        Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(reconciler.config.interval_seconds));

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Invoice reconciler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = reconciler.run_once().await;
                        if report != ReconcileReport::default() {
                            tracing::info!(
                                issued = report.issued,
                                failed = report.failed,
                                abandoned = report.abandoned,
                                "Invoice reconciliation pass finished"
                            );
                        }
                    }
                }
            }
        }))
    }

    /// One pass over the invoices that are due now.
    pub async fn run_once(&self) -> ReconcileReport {
        self.run_at(Utc::now()).await
    }

    /// One pass as of `now`. Orders younger than one interval are left to the
    /// request that created them.
    pub async fn run_at(&self, now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let cutoff = now - chrono::Duration::seconds(self.config.interval_seconds as i64);

        let retries = match self
            .coordinator
            .store()
            .list_invoice_retries(cutoff, now, self.config.batch_size)
            .await
        {
            Ok(retries) => retries,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list orders awaiting an invoice");
                return report;
            }
        };

        for retry in retries {
            match self.attempt(retry.order_id).await {
                Ok(()) => report.issued += 1,
                Err(err) => {
                    if self.record_failure(&retry, &err, now).await {
                        report.abandoned += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }

    async fn attempt(&self, order_id: Uuid) -> Result<(), SettlementError> {
        self.coordinator.reprice(order_id).await?;
        self.coordinator.issue_invoice(order_id).await?;
        Ok(())
    }

    /// Schedules the next attempt, or abandons the order. True when abandoned.
    async fn record_failure(
        &self,
        retry: &InvoiceRetry,
        err: &SettlementError,
        now: DateTime<Utc>,
    ) -> bool {
        let order_id = retry.order_id;
        let attempts = retry.invoice_attempts.saturating_add(1);
        let message = err.to_string();
        let store = self.coordinator.store();
        let abandon = !err.failure.is_retryable() || attempts >= self.config.max_attempts;

        let result = if abandon {
            tracing::warn!(
                order_id = %order_id,
                attempts = attempts,
                error = %message,
                "Abandoning invoice retries"
            );
            store.abandon_invoice(order_id, &message).await
        } else {
            let next_attempt = now + self.retry_delay(retry.invoice_attempts);
            tracing::warn!(
                order_id = %order_id,
                attempts = attempts,
                next_attempt_utc = %next_attempt,
                error = %message,
                "Invoice retry failed"
            );
            store.defer_invoice_retry(order_id, &message, next_attempt).await
        };

        if let Err(e) = result {
            tracing::error!(order_id = %order_id, error = %e, "Failed to record invoice retry");
        }
        abandon
    }

    /// One interval after the first failure, doubling per attempt up to the cap.
    pub fn retry_delay(&self, attempts: i32) -> chrono::Duration {
        let interval = Duration::from_secs(self.config.interval_seconds);
        let cap = Duration::from_secs(
            self.config
                .max_backoff_seconds
                .max(self.config.interval_seconds),
        );
        let mut schedule = ExponentialBackoff {
            current_interval: interval,
            initial_interval: interval,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: cap,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut delay = interval;
        for _ in 0..=attempts.clamp(0, 32) {
            delay = schedule.next_backoff().unwrap_or(cap);
        }
        chrono::Duration::seconds(delay.as_secs().min(MAX_DELAY_SECONDS) as i64)
    }

    pub fn shutdown(&self) {
        tracing::info!("Initiating invoice reconciler shutdown");
        self.shutdown_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::services::memory::{InMemoryStore, MockInvoiceGateway};
    use crate::settlement::InvoiceSettings;

    fn reconciler(interval_seconds: u64, max_backoff_seconds: u64) -> InvoiceReconciler {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = SettlementCoordinator::new(
            store.clone(),
            store.clone(),
            store,
            Arc::new(MockInvoiceGateway::new()),
            InvoiceSettings::default(),
        );
        InvoiceReconciler::new(
            ReconcilerConfig {
                interval_seconds,
                max_backoff_seconds,
                ..ReconcilerConfig::default()
            },
            coordinator,
        )
    }

    #[test]
    fn retry_delay_doubles_from_one_interval() {
        let reconciler = reconciler(60, 3600);
        assert_eq!(reconciler.retry_delay(0), chrono::Duration::seconds(60));
        assert_eq!(reconciler.retry_delay(1), chrono::Duration::seconds(120));
        assert_eq!(reconciler.retry_delay(3), chrono::Duration::seconds(480));
    }

    #[test]
    fn retry_delay_is_capped() {
        let reconciler = reconciler(60, 300);
        assert_eq!(reconciler.retry_delay(5), chrono::Duration::seconds(300));
        assert_eq!(reconciler.retry_delay(i32::MAX), chrono::Duration::seconds(300));
    }
}
