//! CSV rendering of audit log exports.

use crate::models::AuditLog;

/// Renders the filtered, most-recent-first log set as CSV, header first.
pub fn render_csv(logs: &[AuditLog]) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "timestamp",
        "ticket_code",
        "operator_id",
        "event_id",
        "ticket_type",
        "result",
        "channel",
        "fraud",
        "message",
    ])?;
    for log in logs {
        writer.write_record([
            log.created_at.to_rfc3339(),
            log.ticket_code.clone(),
            log.operator_id.to_string(),
            log.event_id.map(|id| id.to_string()).unwrap_or_default(),
            log.ticket_type_name.clone().unwrap_or_default(),
            log.result.to_string(),
            log.channel.to_string(),
            log.fraud_flag.to_string(),
            log.message.clone(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ValidationChannel, ValidationVerdict};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn renders_header_and_one_row_per_log() {
        let logs = vec![AuditLog {
            id: Uuid::new_v4(),
            ticket_code: "TKT-AB2CD-09AF".into(),
            operator_id: Uuid::new_v4(),
            event_id: None,
            ticket_type_name: Some("VIP".into()),
            result: ValidationVerdict::Approved,
            channel: ValidationChannel::Qr,
            fraud_flag: false,
            message: "ticket validated".into(),
            created_at: Utc::now(),
        }];
        let csv = render_csv(&logs).unwrap();
        let lines: Vec<&str> = csv.trim_end().lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp,ticket_code"));
        assert!(lines[1].contains("TKT-AB2CD-09AF"));
        assert!(lines[1].contains("approved"));
        assert!(lines[1].contains("qr"));
    }

    #[test]
    fn commas_in_messages_stay_in_one_field() {
        let logs = vec![AuditLog {
            id: Uuid::new_v4(),
            ticket_code: "TKT-AB2CD-09AF".into(),
            operator_id: Uuid::new_v4(),
            event_id: None,
            ticket_type_name: None,
            result: ValidationVerdict::Rejected,
            channel: ValidationChannel::Manual,
            fraud_flag: true,
            message: "duplicate scan, see earlier entry".into(),
            created_at: Utc::now(),
        }];
        let csv = render_csv(&logs).unwrap();
        assert!(csv.contains("\"duplicate scan, see earlier entry\""));
    }
}
