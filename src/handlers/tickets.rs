use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Ticket, ValidationChannel};
use crate::routes::AppState;
use crate::services::issuance::quote;
use crate::services::mailer::MailAttachment;
use crate::services::payment::{ChargeRequest, PaymentReceipt};
use crate::services::validation::ValidationOutcome;
use crate::ticket_code;
use crate::utils::error::AppError;
use crate::utils::response::{success, success_with_status};

const MAX_UNITS_PER_PURCHASE: i32 = 10;

#[derive(Deserialize)]
pub struct CardDetails {
    pub number: String,
    pub holder: String,
    /// `MM/YY`
    pub expiry: String,
    pub cvv: String,
}

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub buyer_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub card: CardDetails,
}

#[derive(Serialize)]
pub struct PurchaseResponse {
    pub ticket: Ticket,
    pub qr_svg: String,
    pub receipt: PaymentReceipt,
}

pub async fn purchase(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Response, AppError> {
    if req.quantity < 1 || req.quantity > MAX_UNITS_PER_PURCHASE {
        return Err(AppError::ValidationError(format!(
            "quantity must be between 1 and {MAX_UNITS_PER_PURCHASE}"
        )));
    }
    let tier = state
        .store
        .ticket_type(req.ticket_type_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket type {}", req.ticket_type_id)))?;
    // early availability check so an obviously sold-out request is not
    // charged; the reserve inside issuance stays authoritative
    if tier.available < req.quantity {
        return Err(AppError::InsufficientCapacity(format!(
            "requested {} unit(s), only {} available",
            req.quantity, tier.available
        )));
    }

    let (_, _, total_amount) = quote(tier.price, req.quantity);
    let receipt = state
        .payment
        .charge(&ChargeRequest {
            card_number: req.card.number,
            card_holder: req.card.holder,
            expiry: req.card.expiry,
            cvv: req.card.cvv,
            amount: total_amount,
        })
        .await
        .map_err(|decline| AppError::PaymentDeclined(decline.reason))?;

    let issued = match state
        .issuance
        .issue(req.buyer_id, req.ticket_type_id, req.quantity, &receipt)
        .await
    {
        Ok(issued) => issued,
        Err(err) => {
            // charge went through but no ticket exists; flag the charge
            // for reversal
            tracing::warn!(
                transaction_id = %receipt.transaction_id,
                error = %err,
                "issuance failed after charge, transaction needs voiding"
            );
            return Err(err);
        }
    };

    send_confirmation_in_background(&state, &issued.ticket, issued.qr_svg.clone());

    Ok(success_with_status(
        PurchaseResponse {
            ticket: issued.ticket,
            qr_svg: issued.qr_svg,
            receipt,
        },
        "Ticket issued",
        StatusCode::CREATED,
    )
    .into_response())
}

/// Email is best-effort: failures are logged and never affect the
/// already-committed purchase.
fn send_confirmation_in_background(state: &AppState, ticket: &Ticket, qr_svg: String) {
    let store = state.store.clone();
    let mailer = state.mailer.clone();
    let ticket = ticket.clone();
    tokio::spawn(async move {
        let buyer = match store.user(ticket.buyer_id).await {
            Ok(Some(buyer)) => buyer,
            _ => return,
        };
        let event = match store.event(ticket.event_id).await {
            Ok(Some(event)) => event,
            _ => return,
        };
        let attachment = Some(MailAttachment {
            filename: format!("{}.svg", ticket.ticket_code),
            content_type: "image/svg+xml".to_string(),
            bytes: qr_svg.into_bytes(),
        });
        if let Err(err) = mailer
            .send_confirmation(&buyer.email, &ticket, &event, attachment)
            .await
        {
            tracing::warn!(
                error = %err,
                ticket_code = %ticket.ticket_code,
                "confirmation email failed; ticket remains valid"
            );
        }
    });
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let normalized = ticket_code::normalize(&code);
    let ticket = state
        .store
        .ticket_by_code(&normalized)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket '{normalized}'")))?;
    Ok(success(ticket, "Ticket found").into_response())
}

pub async fn cancel_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ticket = state.store.cancel_ticket(id).await?;
    Ok(success(ticket, "Ticket cancelled, capacity restored").into_response())
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub operator_id: Uuid,
    /// `qr`, `manual` or `rut`.
    pub channel: String,
}

pub async fn validate_ticket(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Json(req): Json<ValidateRequest>,
) -> Result<Response, AppError> {
    let channel: ValidationChannel = req
        .channel
        .parse()
        .map_err(AppError::ValidationError)?;
    let operator = state
        .store
        .user(req.operator_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("operator {}", req.operator_id)))?;
    if !operator.role.may_validate() {
        return Err(AppError::Forbidden(
            "only operators and administrators may validate tickets".into(),
        ));
    }
    if !operator.is_active {
        return Err(AppError::Forbidden("operator account is inactive".into()));
    }

    let outcome: ValidationOutcome = state
        .validation
        .validate(&identifier, operator.id, channel)
        .await?;
    let message = outcome.message.clone();
    Ok(success(outcome, message).into_response())
}
