//! `POST /invoke`: run the derivative pipeline for one trigger.

use crate::{
    errors::AppError,
    models::invocation::{Invocation, ReportPayload, TriggerEvent},
    state::AppState,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};

/// Accepts a flat trigger or an S3 event notification and returns the report.
///
/// A report is returned with 200 even when it carries an `error`; only
/// malformed triggers and invalid spec tables are rejected.
pub async fn invoke(
    State(state): State<AppState>,
    body: Result<Json<TriggerEvent>, JsonRejection>,
) -> Result<Json<ReportPayload>, AppError> {
    let Json(event) = body?;
    let invocation = Invocation::try_from(event)?;
    let report = state.generator.run(&invocation).await?;
    Ok(Json(report.to_payload()))
}
