//! Persistence boundary.
//!
//! All state transitions that guard an invariant (inventory counters,
//! ticket status) are single atomic operations here, so callers never get
//! a chance to interleave a check with a write.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuditFilter, AuditLog, Event, EventStatus, NewAuditLog, NewEvent, NewTicket, NewTicketType,
    RegisterUser, Ticket, TicketType, User,
};

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("insufficient capacity: requested {requested}, available {available}")]
    InsufficientCapacity { requested: i32, available: i32 },

    #[error("ticket code '{0}' already exists")]
    DuplicateCode(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Outcome of the atomic paid -> validated transition.
#[derive(Debug, Clone)]
pub enum ValidateTransition {
    /// This call won the transition; the returned ticket carries the new
    /// validation stamp.
    Validated(Ticket),
    /// Someone got there first (or earlier); prior stamp is on the ticket.
    AlreadyValidated(Ticket),
    Cancelled(Ticket),
    /// Pending or refunded; not eligible for check-in.
    NotEligible(Ticket),
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    // -- users ------------------------------------------------------------
    async fn register_user(&self, new: RegisterUser) -> Result<User, StoreError>;
    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn user_by_document(&self, document: &str) -> Result<Option<User>, StoreError>;
    async fn set_user_active(&self, id: Uuid, active: bool) -> Result<User, StoreError>;

    // -- events -----------------------------------------------------------
    async fn create_event(&self, new: NewEvent) -> Result<Event, StoreError>;
    async fn event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;
    async fn list_events(&self, status: Option<EventStatus>) -> Result<Vec<Event>, StoreError>;
    async fn set_event_status(&self, id: Uuid, status: EventStatus) -> Result<Event, StoreError>;

    // -- ticket types -----------------------------------------------------
    async fn create_ticket_type(&self, new: NewTicketType) -> Result<TicketType, StoreError>;
    async fn ticket_type(&self, id: Uuid) -> Result<Option<TicketType>, StoreError>;
    async fn ticket_types_for_event(&self, event_id: Uuid)
        -> Result<Vec<TicketType>, StoreError>;

    // -- inventory --------------------------------------------------------
    /// Decrements `TicketType.available` and the parent
    /// `Event.available_capacity` by `qty`, both-or-neither.
    async fn reserve(&self, ticket_type_id: Uuid, qty: i32) -> Result<(), StoreError>;
    /// Symmetric increment, clamped so neither counter exceeds its total.
    async fn release(&self, ticket_type_id: Uuid, qty: i32) -> Result<(), StoreError>;

    // -- tickets ----------------------------------------------------------
    /// Fails with [`StoreError::DuplicateCode`] on a code collision so the
    /// caller can regenerate and retry.
    async fn insert_ticket(&self, new: NewTicket) -> Result<Ticket, StoreError>;
    async fn ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError>;
    async fn ticket_by_code(&self, code: &str) -> Result<Option<Ticket>, StoreError>;
    /// Most recent ticket for a buyer document, preferring unused (paid)
    /// tickets so a repeat buyer checks in with the right one.
    async fn ticket_for_document(&self, document: &str) -> Result<Option<Ticket>, StoreError>;
    async fn tickets_for_type(&self, ticket_type_id: Uuid) -> Result<Vec<Ticket>, StoreError>;

    /// Atomically moves a `paid` ticket to `validated`. Exactly one caller
    /// can win this transition; everyone else learns the current state.
    async fn transition_to_validated(
        &self,
        ticket_id: Uuid,
        operator_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ValidateTransition, StoreError>;

    /// Cancels a pending/paid ticket and restores both inventory counters
    /// in the same transaction. A second cancel is a conflict.
    async fn cancel_ticket(&self, ticket_id: Uuid) -> Result<Ticket, StoreError>;

    // -- audit ------------------------------------------------------------
    async fn append_audit(&self, entry: NewAuditLog) -> Result<AuditLog, StoreError>;
    /// Filtered audit rows, most recent first.
    async fn audit_logs(&self, filter: &AuditFilter) -> Result<Vec<AuditLog>, StoreError>;
}
