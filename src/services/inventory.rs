//! Inventory counters.
//!
//! Thin facade over the store's atomic reserve/release operations; its job
//! is tracing and keeping both counters (tier availability and event
//! capacity) behind a single call site.

use std::sync::Arc;

use uuid::Uuid;

use crate::store::TicketStore;
use crate::utils::error::AppError;

#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn TicketStore>,
}

impl InventoryService {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Takes `qty` units off a tier and its parent event, both-or-neither.
    pub async fn reserve(&self, ticket_type_id: Uuid, qty: i32) -> Result<(), AppError> {
        self.store.reserve(ticket_type_id, qty).await?;
        tracing::debug!(%ticket_type_id, qty, "inventory reserved");
        Ok(())
    }

    /// Returns `qty` units; idempotence per ticket is guarded by ticket
    /// status at the call site, not here.
    pub async fn release(&self, ticket_type_id: Uuid, qty: i32) -> Result<(), AppError> {
        self.store.release(ticket_type_id, qty).await?;
        tracing::debug!(%ticket_type_id, qty, "inventory released");
        Ok(())
    }
}
