use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationVerdict {
    Approved,
    Rejected,
    Error,
}

impl ValidationVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationVerdict::Approved => "approved",
            ValidationVerdict::Rejected => "rejected",
            ValidationVerdict::Error => "error",
        }
    }
}

impl fmt::Display for ValidationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationVerdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ValidationVerdict::Approved),
            "rejected" => Ok(ValidationVerdict::Rejected),
            "error" => Ok(ValidationVerdict::Error),
            other => Err(format!("unknown validation result '{other}'")),
        }
    }
}

/// How the validation attempt was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationChannel {
    Qr,
    Manual,
    Rut,
}

impl ValidationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationChannel::Qr => "qr",
            ValidationChannel::Manual => "manual",
            ValidationChannel::Rut => "rut",
        }
    }
}

impl fmt::Display for ValidationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qr" => Ok(ValidationChannel::Qr),
            "manual" => Ok(ValidationChannel::Manual),
            "rut" => Ok(ValidationChannel::Rut),
            other => Err(format!("unknown validation channel '{other}'")),
        }
    }
}

/// Immutable record of one validation attempt. Append-only; never updated
/// or deleted through normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub ticket_code: String,
    pub operator_id: Uuid,
    pub event_id: Option<Uuid>,
    pub ticket_type_name: Option<String>,
    pub result: ValidationVerdict,
    pub channel: ValidationChannel,
    pub fraud_flag: bool,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub ticket_code: String,
    pub operator_id: Uuid,
    pub event_id: Option<Uuid>,
    pub ticket_type_name: Option<String>,
    pub result: ValidationVerdict,
    pub channel: ValidationChannel,
    pub fraud_flag: bool,
    pub message: String,
}

/// Filter over the audit log; all fields are conjunctive, `None` means
/// "don't care".
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub channel: Option<ValidationChannel>,
    pub result: Option<ValidationVerdict>,
    pub operator_id: Option<Uuid>,
    pub fraud_only: bool,
    pub limit: Option<i64>,
}

impl AuditFilter {
    pub fn matches(&self, log: &AuditLog) -> bool {
        if let Some(event_id) = self.event_id {
            if log.event_id != Some(event_id) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if log.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if log.created_at > to {
                return false;
            }
        }
        if let Some(channel) = self.channel {
            if log.channel != channel {
                return false;
            }
        }
        if let Some(result) = self.result {
            if log.result != result {
                return false;
            }
        }
        if let Some(operator_id) = self.operator_id {
            if log.operator_id != operator_id {
                return false;
            }
        }
        if self.fraud_only && !log.fraud_flag {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorStat {
    pub operator_id: Uuid,
    pub validations: u64,
}

/// Aggregates over a filtered slice of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: u64,
    pub by_result: BTreeMap<String, u64>,
    pub by_channel: BTreeMap<String, u64>,
    pub by_ticket_type: BTreeMap<String, u64>,
    pub fraud_count: u64,
    pub top_operators: Vec<OperatorStat>,
}
