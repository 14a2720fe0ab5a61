//! Ticket issuance.
//!
//! Runs after a successful charge: reserve inventory, mint a unique code,
//! persist the ticket, and hand back a QR-encodable payload. A code
//! collision is retried with a fresh code; any persist failure after the
//! reservation releases it again so the counters stay honest.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{NewTicket, QrPayload, Ticket, TicketStatus};
use crate::services::inventory::InventoryService;
use crate::services::payment::PaymentReceipt;
use crate::store::{StoreError, TicketStore};
use crate::ticket_code;
use crate::utils::error::AppError;

/// Flat 10% handling fee on the subtotal.
const SERVICE_CHARGE_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

const CODE_RETRY_LIMIT: u32 = 5;

/// Price breakdown for `quantity` units at `price`:
/// `(subtotal, service_charge, total_amount)`.
pub fn quote(price: Decimal, quantity: i32) -> (Decimal, Decimal, Decimal) {
    let subtotal = price * Decimal::from(quantity);
    let service_charge = (subtotal * SERVICE_CHARGE_RATE).round_dp(2);
    (subtotal, service_charge, subtotal + service_charge)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IssuedTicket {
    pub ticket: Ticket,
    pub qr_payload: QrPayload,
    pub qr_svg: String,
}

#[derive(Clone)]
pub struct IssuanceService {
    store: Arc<dyn TicketStore>,
    inventory: InventoryService,
}

impl IssuanceService {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        let inventory = InventoryService::new(store.clone());
        Self { store, inventory }
    }

    pub async fn issue(
        &self,
        buyer_id: Uuid,
        ticket_type_id: Uuid,
        quantity: i32,
        receipt: &PaymentReceipt,
    ) -> Result<IssuedTicket, AppError> {
        if quantity < 1 {
            return Err(AppError::ValidationError(
                "quantity must be at least 1".into(),
            ));
        }
        let buyer = self
            .store
            .user(buyer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("buyer {buyer_id}")))?;
        let tier = self
            .store
            .ticket_type(ticket_type_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ticket type {ticket_type_id}")))?;
        let event = self
            .store
            .event(tier.event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event {}", tier.event_id)))?;
        if event.status != crate::models::EventStatus::Published {
            return Err(AppError::Conflict(format!(
                "event '{}' is not open for sale",
                event.name
            )));
        }

        let (_, service_charge, total_amount) = quote(tier.price, quantity);

        self.inventory.reserve(tier.id, quantity).await?;

        let ticket = match self
            .persist_with_fresh_code(buyer_id, &tier, quantity, service_charge, total_amount)
            .await
        {
            Ok(ticket) => ticket,
            Err(err) => {
                // compensate the reservation so the failed purchase does
                // not strand capacity
                if let Err(release_err) = self.inventory.release(tier.id, quantity).await {
                    tracing::warn!(
                        error = %release_err,
                        ticket_type_id = %tier.id,
                        "failed to release reservation after issuance error"
                    );
                }
                return Err(err);
            }
        };

        tracing::info!(
            ticket_code = %ticket.ticket_code,
            transaction_id = %receipt.transaction_id,
            "ticket issued"
        );

        let qr_payload = QrPayload {
            ticket_code: ticket.ticket_code.clone(),
            event_name: event.name.clone(),
            event_date: event.starts_at,
            event_location: event.location.clone(),
            ticket_type: tier.name.clone(),
            holder_name: buyer.name.clone(),
            holder_document: buyer.document.clone(),
            issued_at: ticket.purchased_at,
        };
        let qr_svg = qr_payload
            .to_svg()
            .map_err(|e| AppError::InternalServerError(format!("QR rendering failed: {e}")))?;

        Ok(IssuedTicket {
            ticket,
            qr_payload,
            qr_svg,
        })
    }

    async fn persist_with_fresh_code(
        &self,
        buyer_id: Uuid,
        tier: &crate::models::TicketType,
        quantity: i32,
        service_charge: Decimal,
        total_amount: Decimal,
    ) -> Result<Ticket, AppError> {
        let mut attempts = 0;
        loop {
            let code = ticket_code::generate();
            let new = NewTicket {
                ticket_code: code,
                event_id: tier.event_id,
                ticket_type_id: tier.id,
                buyer_id,
                price: tier.price,
                quantity,
                service_charge,
                total_amount,
                status: TicketStatus::Paid,
                purchased_at: Utc::now(),
            };
            match self.store.insert_ticket(new).await {
                Ok(ticket) => return Ok(ticket),
                Err(StoreError::DuplicateCode(code)) if attempts < CODE_RETRY_LIMIT => {
                    attempts += 1;
                    tracing::debug!(%code, attempts, "ticket code collision, regenerating");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
