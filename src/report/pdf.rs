//! PDF report collaborator.
//!
//! Document layout is presentation-only from the core's point of view, so
//! the renderer is a trait. The bundled implementation produces a plain
//! monospace report; a real layout engine can be swapped in behind the
//! same trait without touching the audit service.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::models::{AuditLog, AuditStats};

#[derive(Debug, Clone)]
pub struct AuditReport {
    pub generated_at: DateTime<Utc>,
    pub stats: AuditStats,
    pub logs: Vec<AuditLog>,
}

pub trait PdfRenderer: Send + Sync {
    fn render(&self, report: &AuditReport) -> Result<Vec<u8>, String>;
    fn content_type(&self) -> &'static str {
        "application/pdf"
    }
}

/// Stand-in renderer emitting a readable text document.
pub struct PlainTextRenderer;

impl PdfRenderer for PlainTextRenderer {
    fn render(&self, report: &AuditReport) -> Result<Vec<u8>, String> {
        let mut out = String::new();
        write_report(&mut out, report).map_err(|e| e.to_string())?;
        Ok(out.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }
}

fn write_report(out: &mut String, report: &AuditReport) -> fmt::Result {
    use fmt::Write;

    writeln!(out, "VALIDATION AUDIT REPORT")?;
    writeln!(out, "generated: {}", report.generated_at.to_rfc3339())?;
    writeln!(out)?;
    writeln!(out, "total attempts: {}", report.stats.total)?;
    writeln!(out, "fraud flagged:  {}", report.stats.fraud_count)?;
    for (label, counts) in [
        ("by result", &report.stats.by_result),
        ("by channel", &report.stats.by_channel),
        ("by ticket type", &report.stats.by_ticket_type),
    ] {
        writeln!(out)?;
        writeln!(out, "{label}")?;
        for (key, count) in counts {
            writeln!(out, "  {key}: {count}")?;
        }
    }
    if !report.stats.top_operators.is_empty() {
        writeln!(out)?;
        writeln!(out, "top operators")?;
        for op in &report.stats.top_operators {
            writeln!(out, "  {}: {}", op.operator_id, op.validations)?;
        }
    }
    writeln!(out)?;
    writeln!(out, "log (most recent first)")?;
    for log in &report.logs {
        writeln!(
            out,
            "{} {} {} {} fraud={} {}",
            log.created_at.to_rfc3339(),
            log.ticket_code,
            log.result,
            log.channel,
            log.fraud_flag,
            log.message,
        )?;
    }
    Ok(())
}
