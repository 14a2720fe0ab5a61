use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{EventStatus, NewEvent, NewTicketType};
use crate::routes::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{success, success_with_status};

#[derive(Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub description: Option<String>,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub total_capacity: i32,
}

pub async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<CreateEventRequest>,
) -> Result<Response, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::ValidationError("name must not be empty".into()));
    }
    if req.total_capacity < 1 {
        return Err(AppError::ValidationError(
            "total_capacity must be at least 1".into(),
        ));
    }
    let event = state
        .store
        .create_event(NewEvent {
            name: req.name.trim().to_string(),
            description: req.description,
            location: req.location,
            starts_at: req.starts_at,
            total_capacity: req.total_capacity,
        })
        .await?;
    Ok(success_with_status(event, "Event created", StatusCode::CREATED).into_response())
}

#[derive(Deserialize, Default)]
pub struct ListEventsQuery {
    pub status: Option<String>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Response, AppError> {
    let status = query
        .status
        .map(|s| s.parse::<EventStatus>())
        .transpose()
        .map_err(AppError::ValidationError)?;
    let events = state.store.list_events(status).await?;
    Ok(success(events, "Events listed").into_response())
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let event = state
        .store
        .event(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {id}")))?;
    Ok(success(event, "Event found").into_response())
}

pub async fn publish_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let event = state
        .store
        .event(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {id}")))?;
    if !event.status.can_transition_to(EventStatus::Published) {
        return Err(AppError::Conflict(format!(
            "event is {} and cannot be published",
            event.status
        )));
    }
    let event = state
        .store
        .set_event_status(id, EventStatus::Published)
        .await?;
    Ok(success(event, "Event published").into_response())
}

#[derive(Deserialize)]
pub struct CreateTicketTypeRequest {
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
}

pub async fn create_ticket_type(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<CreateTicketTypeRequest>,
) -> Result<Response, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::ValidationError("name must not be empty".into()));
    }
    if req.price < Decimal::ZERO {
        return Err(AppError::ValidationError(
            "price must not be negative".into(),
        ));
    }
    if req.quantity < 1 {
        return Err(AppError::ValidationError(
            "quantity must be at least 1".into(),
        ));
    }
    let event = state
        .store
        .event(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {event_id}")))?;
    let allotted: i64 = state
        .store
        .ticket_types_for_event(event_id)
        .await?
        .iter()
        .map(|tt| i64::from(tt.quantity))
        .sum();
    if allotted + i64::from(req.quantity) > i64::from(event.total_capacity) {
        return Err(AppError::ValidationError(format!(
            "allotting {} more unit(s) would exceed the event capacity of {}",
            req.quantity, event.total_capacity
        )));
    }
    let tt = state
        .store
        .create_ticket_type(NewTicketType {
            event_id,
            name: req.name.trim().to_string(),
            price: req.price,
            quantity: req.quantity,
        })
        .await?;
    Ok(success_with_status(tt, "Ticket type created", StatusCode::CREATED).into_response())
}

pub async fn list_ticket_types(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    if state.store.event(event_id).await?.is_none() {
        return Err(AppError::NotFound(format!("event {event_id}")));
    }
    let types = state.store.ticket_types_for_event(event_id).await?;
    Ok(success(types, "Ticket types listed").into_response())
}
