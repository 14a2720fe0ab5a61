use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use qrcode::render::svg;
use qrcode::QrCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Paid,
    Validated,
    Cancelled,
    Refunded,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Paid => "paid",
            TicketStatus::Validated => "validated",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Refunded => "refunded",
        }
    }

    /// Cancellation restores inventory, so it is only allowed before the
    /// ticket has been used.
    pub fn cancellable(&self) -> bool {
        matches!(self, TicketStatus::Pending | TicketStatus::Paid)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TicketStatus::Pending),
            "paid" => Ok(TicketStatus::Paid),
            "validated" => Ok(TicketStatus::Validated),
            "cancelled" => Ok(TicketStatus::Cancelled),
            "refunded" => Ok(TicketStatus::Refunded),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

/// One purchased admission unit.
///
/// `total_amount` is derived: `price * quantity + service_charge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_code: String,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub buyer_id: Uuid,
    pub price: Decimal,
    pub quantity: i32,
    pub service_charge: Decimal,
    pub total_amount: Decimal,
    pub status: TicketStatus,
    pub purchased_at: DateTime<Utc>,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub ticket_code: String,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub buyer_id: Uuid,
    pub price: Decimal,
    pub quantity: i32,
    pub service_charge: Decimal,
    pub total_amount: Decimal,
    pub status: TicketStatus,
    pub purchased_at: DateTime<Utc>,
}

/// The JSON document embedded in a ticket's QR image. Everything an
/// operator needs to eyeball a ticket offline; the code alone drives the
/// actual validation lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPayload {
    pub ticket_code: String,
    pub event_name: String,
    pub event_date: DateTime<Utc>,
    pub event_location: String,
    pub ticket_type: String,
    pub holder_name: String,
    pub holder_document: String,
    pub issued_at: DateTime<Utc>,
}

impl QrPayload {
    /// Renders the payload as an SVG QR image.
    pub fn to_svg(&self) -> Result<String, qrcode::types::QrError> {
        let json = serde_json::to_string(self).map_err(|_| qrcode::types::QrError::DataTooLong)?;
        let code = QrCode::new(json.as_bytes())?;
        Ok(code
            .render::<svg::Color<'_>>()
            .min_dimensions(240, 240)
            .build())
    }
}
