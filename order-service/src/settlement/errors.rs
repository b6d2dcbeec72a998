use std::borrow::Cow;
use std::fmt;

use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

use crate::models::Order;

/// Position of a settlement in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStage {
    Drafting,
    Created,
    Priced,
    Settled,
    InvoiceRequested,
    Completed,
}

impl SettlementStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStage::Drafting => "drafting",
            SettlementStage::Created => "created",
            SettlementStage::Priced => "priced",
            SettlementStage::Settled => "settled",
            SettlementStage::InvoiceRequested => "invoice_requested",
            SettlementStage::Completed => "completed",
        }
    }
}

impl fmt::Display for SettlementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong, independent of where.
#[derive(Debug, Error)]
pub enum SettlementFailure {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    OutOfStock(String),

    #[error("{0}")]
    Conflict(String),

    #[error("persistence failure: {0}")]
    Persistence(#[source] AppError),

    /// The order is committed and priced; only invoice issuance failed.
    #[error("invoice generation failed for order {}: {source}", order.order_id)]
    Gateway {
        order: Box<Order>,
        source: anyhow::Error,
    },
}

impl SettlementFailure {
    pub fn at(self, stage: SettlementStage) -> SettlementError {
        SettlementError {
            stage,
            failure: self,
        }
    }

    /// Whether running the same step later can succeed. Missing or invalid
    /// inputs stay that way; stock, storage and the provider can recover.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SettlementFailure::Validation(_) | SettlementFailure::NotFound(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SettlementFailure::Validation(_) => "validation",
            SettlementFailure::NotFound(_) => "not_found",
            SettlementFailure::OutOfStock(_) => "out_of_stock",
            SettlementFailure::Conflict(_) => "conflict",
            SettlementFailure::Persistence(_) => "persistence",
            SettlementFailure::Gateway { .. } => "gateway",
        }
    }
}

impl From<AppError> for SettlementFailure {
    fn from(err: AppError) -> Self {
        SettlementFailure::Persistence(err)
    }
}

/// A settlement that stopped in `stage`.
#[derive(Debug, Error)]
#[error("settlement failed at {stage}: {failure}")]
pub struct SettlementError {
    pub stage: SettlementStage,
    #[source]
    pub failure: SettlementFailure,
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err.failure {
            SettlementFailure::Validation(message) => {
                let mut error = ValidationError::new("invalid_order");
                error.message = Some(Cow::from(message));
                let mut errors = ValidationErrors::new();
                errors.add("order", error);
                AppError::ValidationError(errors)
            }
            SettlementFailure::NotFound(message) => AppError::NotFound(anyhow::anyhow!(message)),
            SettlementFailure::OutOfStock(message) => {
                AppError::OutOfStock(anyhow::anyhow!(message))
            }
            SettlementFailure::Conflict(message) => AppError::Conflict(anyhow::anyhow!(message)),
            SettlementFailure::Persistence(err) => err,
            SettlementFailure::Gateway { source, .. } => AppError::BadGateway(source.to_string()),
        }
    }
}
