//! Error classification for handler invocations.
//!
//! Each handler stage returns `Result<_, HandlerError>`. Nothing is allowed to
//! propagate past [`guard`]: every error (and any panic) becomes exactly one
//! emitted [`ErrorRecord`].

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use thiserror::Error;

use crate::metrics;
use crate::records::{Emission, ErrorContext, ErrorRecord, ErrorType};

use super::context::HandlerContext;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Malformed or out-of-range input, detected before any external call.
    #[error("{message}")]
    InvalidEventData {
        message: String,
        context: ErrorContext,
    },

    /// An external contract read failed.
    #[error("{message}")]
    ContractCallFailed {
        message: String,
        context: ErrorContext,
    },

    /// Anything else.
    #[error("{0}")]
    Processing(eyre::Report),
}

impl From<eyre::Report> for HandlerError {
    fn from(report: eyre::Report) -> Self {
        Self::Processing(report)
    }
}

impl HandlerError {
    pub fn invalid(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::InvalidEventData {
            message: message.into(),
            context,
        }
    }

    pub fn contract_call(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ContractCallFailed {
            message: message.into(),
            context,
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidEventData { .. } => ErrorType::InvalidEventData,
            Self::ContractCallFailed { .. } => ErrorType::ContractCallFailed,
            Self::Processing(_) => ErrorType::ProcessingError,
        }
    }

    /// Convert into the emitted record. `fallback` supplies correlation
    /// fields for errors that carry none of their own.
    pub fn into_record(self, handler: &str, fallback: ErrorContext) -> ErrorRecord {
        let error_type = self.error_type();
        match self {
            Self::InvalidEventData { message, context }
            | Self::ContractCallFailed { message, context } => ErrorRecord {
                error_type,
                message,
                context,
                stack: None,
            },
            Self::Processing(report) => ErrorRecord {
                error_type,
                message: format!("Unexpected error in {}: {}", handler, report),
                context: fallback,
                stack: Some(format!("{:?}", report)),
            },
        }
    }
}

/// Log, count and emit an error record.
pub async fn report(ctx: &HandlerContext, record: ErrorRecord) {
    tracing::warn!(
        error_type = record.error_type.as_str(),
        block = ?record.context.block,
        tx_hash = ?record.context.tx_hash,
        holder = ?record.context.holder,
        "{}",
        record.message
    );
    metrics::record_handler_error(record.error_type);
    ctx.sink.emit(Emission::Error(record)).await;
}

/// Top-level adapter around a handler body.
///
/// Errors returned by the body are classified by their variant; a panic is
/// reported as a processing error. The caller always gets control back.
pub async fn guard<F>(handler: &'static str, ctx: &HandlerContext, fallback: ErrorContext, body: F)
where
    F: Future<Output = Result<(), HandlerError>>,
{
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => report(ctx, err.into_record(handler, fallback)).await,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            let record = ErrorRecord {
                error_type: ErrorType::ProcessingError,
                message: format!("Unexpected error in {}: {}", handler, message),
                context: fallback,
                stack: Some(format!("panic: {}", message)),
            };
            report(ctx, record).await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown error".to_string()
    }
}
