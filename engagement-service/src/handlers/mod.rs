//! HTTP handlers.
//!
//! Admin handlers return errors as they are. Public handlers pass them
//! through [`public_error`] so callers only ever see a generic message for
//! the status class.

pub mod documents;
pub mod health;
pub mod invoices;
pub mod quotes;
pub mod webhooks;

use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use service_core::error::AppError;

use crate::services::workflow::Printable;

pub(crate) fn public_error(err: AppError) -> AppError {
    if err.status_code().is_server_error() {
        tracing::error!(error = %err, "Public request failed");
    } else {
        tracing::info!(error = %err, "Public request rejected");
    }
    err.into_public()
}

pub(crate) fn printable_response(printable: Printable) -> Response {
    let disposition = HeaderValue::from_str(&format!(
        "inline; filename=\"{}\"",
        printable.filename
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(printable.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        printable.bytes,
    )
        .into_response()
}
