//! Audit log queries, statistics and exports.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    AuditFilter, AuditLog, AuditStats, NewAuditLog, OperatorStat, ValidationVerdict,
};
use crate::report::{render_csv, AuditReport, PdfRenderer};
use crate::store::TicketStore;
use crate::utils::error::AppError;

const LEADERBOARD_SIZE: usize = 5;

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn TicketStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Appends one immutable row.
    pub async fn record(&self, entry: NewAuditLog) -> Result<AuditLog, AppError> {
        Ok(self.store.append_audit(entry).await?)
    }

    /// Filtered rows, most recent first.
    pub async fn logs(&self, filter: &AuditFilter) -> Result<Vec<AuditLog>, AppError> {
        Ok(self.store.audit_logs(filter).await?)
    }

    /// Aggregates over the filtered set. The limit is ignored here on
    /// purpose: statistics cover everything the filter matches.
    pub async fn stats(&self, filter: &AuditFilter) -> Result<AuditStats, AppError> {
        let mut unlimited = filter.clone();
        unlimited.limit = None;
        let logs = self.store.audit_logs(&unlimited).await?;
        Ok(aggregate(&logs))
    }

    pub async fn export_csv(&self, filter: &AuditFilter) -> Result<String, AppError> {
        let logs = self.logs(filter).await?;
        render_csv(&logs)
            .map_err(|e| AppError::InternalServerError(format!("CSV rendering failed: {e}")))
    }

    pub async fn export_report(
        &self,
        filter: &AuditFilter,
        renderer: &dyn PdfRenderer,
    ) -> Result<Vec<u8>, AppError> {
        let logs = self.logs(filter).await?;
        let stats = self.stats(filter).await?;
        let report = AuditReport {
            generated_at: Utc::now(),
            stats,
            logs,
        };
        renderer
            .render(&report)
            .map_err(|e| AppError::InternalServerError(format!("report rendering failed: {e}")))
    }
}

fn aggregate(logs: &[AuditLog]) -> AuditStats {
    let mut by_result: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_channel: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_ticket_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut per_operator: HashMap<Uuid, u64> = HashMap::new();
    let mut fraud_count = 0u64;

    for log in logs {
        *by_result.entry(log.result.to_string()).or_default() += 1;
        *by_channel.entry(log.channel.to_string()).or_default() += 1;
        let category = log
            .ticket_type_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        *by_ticket_type.entry(category).or_default() += 1;
        if log.fraud_flag {
            fraud_count += 1;
        }
        if log.result == ValidationVerdict::Approved {
            *per_operator.entry(log.operator_id).or_default() += 1;
        }
    }

    let mut top_operators: Vec<OperatorStat> = per_operator
        .into_iter()
        .map(|(operator_id, validations)| OperatorStat {
            operator_id,
            validations,
        })
        .collect();
    // deterministic order: most validations first, id as tiebreak
    top_operators.sort_by(|a, b| {
        b.validations
            .cmp(&a.validations)
            .then_with(|| a.operator_id.cmp(&b.operator_id))
    });
    top_operators.truncate(LEADERBOARD_SIZE);

    AuditStats {
        total: logs.len() as u64,
        by_result,
        by_channel,
        by_ticket_type,
        fraud_count,
        top_operators,
    }
}
