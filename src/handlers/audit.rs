use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::AuditFilter;
use crate::routes::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

const DEFAULT_LOG_LIMIT: i64 = 200;

#[derive(Deserialize, Default)]
pub struct AuditQuery {
    pub event_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub channel: Option<String>,
    pub result: Option<String>,
    pub operator_id: Option<Uuid>,
    pub fraud_only: Option<bool>,
    pub limit: Option<i64>,
}

impl AuditQuery {
    fn into_filter(self) -> Result<AuditFilter, AppError> {
        Ok(AuditFilter {
            event_id: self.event_id,
            from: self.from,
            to: self.to,
            channel: self
                .channel
                .map(|c| c.parse())
                .transpose()
                .map_err(AppError::ValidationError)?,
            result: self
                .result
                .map(|r| r.parse())
                .transpose()
                .map_err(AppError::ValidationError)?,
            operator_id: self.operator_id,
            fraud_only: self.fraud_only.unwrap_or(false),
            limit: self.limit,
        })
    }
}

pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Response, AppError> {
    let mut filter = query.into_filter()?;
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, 1_000));
    let logs = state.audit.logs(&filter).await?;
    Ok(success(logs, "Audit logs listed").into_response())
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Response, AppError> {
    let filter = query.into_filter()?;
    let stats = state.audit.stats(&filter).await?;
    Ok(success(stats, "Audit statistics computed").into_response())
}

pub async fn export_csv(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Response, AppError> {
    let filter = query.into_filter()?;
    let csv = state.audit.export_csv(&filter).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"audit-log.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

pub async fn generate_report(
    State(state): State<AppState>,
    Json(query): Json<AuditQuery>,
) -> Result<Response, AppError> {
    let filter = query.into_filter()?;
    let bytes = state.audit.export_report(&filter, state.pdf.as_ref()).await?;
    Ok((
        [(header::CONTENT_TYPE, state.pdf.content_type())],
        bytes,
    )
        .into_response())
}
