//! In-memory store used by the test suite and local experiments.
//!
//! One mutex guards all tables, so every trait method is trivially atomic:
//! the check and the write of an inventory or status transition happen
//! under the same lock acquisition, matching the transactional guarantees
//! of the Postgres implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AuditFilter, AuditLog, Event, EventStatus, NewAuditLog, NewEvent, NewTicket, NewTicketType,
    RegisterUser, Ticket, TicketStatus, TicketType, User,
};
use crate::store::{StoreError, TicketStore, ValidateTransition};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    events: HashMap<Uuid, Event>,
    ticket_types: HashMap<Uuid, TicketType>,
    tickets: HashMap<Uuid, Ticket>,
    codes: HashMap<String, Uuid>,
    audit: Vec<AuditLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // poisoning only happens if a test panicked mid-write
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn register_user(&self, new: RegisterUser) -> Result<User, StoreError> {
        let mut t = self.lock();
        let email = new.email.to_lowercase();
        if t.users.values().any(|u| u.email == email) {
            return Err(StoreError::Conflict(format!(
                "email '{email}' is already registered"
            )));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email,
            document: new.document,
            role: new.role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn user_by_document(&self, document: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.document == document)
            .cloned())
    }

    async fn set_user_active(&self, id: Uuid, active: bool) -> Result<User, StoreError> {
        let mut t = self.lock();
        let user = t
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        user.is_active = active;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn create_event(&self, new: NewEvent) -> Result<Event, StoreError> {
        let mut t = self.lock();
        if t.events.values().any(|e| e.name == new.name) {
            return Err(StoreError::Conflict(format!(
                "event '{}' already exists",
                new.name
            )));
        }
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            location: new.location,
            starts_at: new.starts_at,
            total_capacity: new.total_capacity,
            available_capacity: new.total_capacity,
            status: EventStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        t.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.lock().events.get(&id).cloned())
    }

    async fn list_events(&self, status: Option<EventStatus>) -> Result<Vec<Event>, StoreError> {
        let t = self.lock();
        let mut events: Vec<Event> = t
            .events
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.starts_at);
        Ok(events)
    }

    async fn set_event_status(&self, id: Uuid, status: EventStatus) -> Result<Event, StoreError> {
        let mut t = self.lock();
        let event = t
            .events
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("event {id}")))?;
        event.status = status;
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn create_ticket_type(&self, new: NewTicketType) -> Result<TicketType, StoreError> {
        let mut t = self.lock();
        if !t.events.contains_key(&new.event_id) {
            return Err(StoreError::NotFound(format!("event {}", new.event_id)));
        }
        let now = Utc::now();
        let tt = TicketType {
            id: Uuid::new_v4(),
            event_id: new.event_id,
            name: new.name,
            price: new.price,
            quantity: new.quantity,
            available: new.quantity,
            created_at: now,
            updated_at: now,
        };
        t.ticket_types.insert(tt.id, tt.clone());
        Ok(tt)
    }

    async fn ticket_type(&self, id: Uuid) -> Result<Option<TicketType>, StoreError> {
        Ok(self.lock().ticket_types.get(&id).cloned())
    }

    async fn ticket_types_for_event(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<TicketType>, StoreError> {
        let t = self.lock();
        let mut types: Vec<TicketType> = t
            .ticket_types
            .values()
            .filter(|tt| tt.event_id == event_id)
            .cloned()
            .collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    async fn reserve(&self, ticket_type_id: Uuid, qty: i32) -> Result<(), StoreError> {
        let mut t = self.lock();
        let tt = t
            .ticket_types
            .get(&ticket_type_id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket type {ticket_type_id}")))?;
        if tt.available < qty {
            return Err(StoreError::InsufficientCapacity {
                requested: qty,
                available: tt.available,
            });
        }
        let event_id = tt.event_id;
        let now = Utc::now();
        if let Some(tt) = t.ticket_types.get_mut(&ticket_type_id) {
            tt.available -= qty;
            tt.updated_at = now;
        }
        if let Some(ev) = t.events.get_mut(&event_id) {
            ev.available_capacity = (ev.available_capacity - qty).max(0);
            ev.updated_at = now;
        }
        Ok(())
    }

    async fn release(&self, ticket_type_id: Uuid, qty: i32) -> Result<(), StoreError> {
        let mut t = self.lock();
        let tt = t
            .ticket_types
            .get(&ticket_type_id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket type {ticket_type_id}")))?;
        let event_id = tt.event_id;
        let now = Utc::now();
        if let Some(tt) = t.ticket_types.get_mut(&ticket_type_id) {
            tt.available = (tt.available + qty).min(tt.quantity);
            tt.updated_at = now;
        }
        if let Some(ev) = t.events.get_mut(&event_id) {
            ev.available_capacity = (ev.available_capacity + qty).min(ev.total_capacity);
            ev.updated_at = now;
        }
        Ok(())
    }

    async fn insert_ticket(&self, new: NewTicket) -> Result<Ticket, StoreError> {
        let mut t = self.lock();
        if t.codes.contains_key(&new.ticket_code) {
            return Err(StoreError::DuplicateCode(new.ticket_code));
        }
        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::new_v4(),
            ticket_code: new.ticket_code.clone(),
            event_id: new.event_id,
            ticket_type_id: new.ticket_type_id,
            buyer_id: new.buyer_id,
            price: new.price,
            quantity: new.quantity,
            service_charge: new.service_charge,
            total_amount: new.total_amount,
            status: new.status,
            purchased_at: new.purchased_at,
            validated_by: None,
            validated_at: None,
            created_at: now,
            updated_at: now,
        };
        t.codes.insert(new.ticket_code, ticket.id);
        t.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        Ok(self.lock().tickets.get(&id).cloned())
    }

    async fn ticket_by_code(&self, code: &str) -> Result<Option<Ticket>, StoreError> {
        let t = self.lock();
        Ok(t.codes.get(code).and_then(|id| t.tickets.get(id)).cloned())
    }

    async fn ticket_for_document(&self, document: &str) -> Result<Option<Ticket>, StoreError> {
        let t = self.lock();
        let buyer: Option<&User> = t.users.values().find(|u| u.document == document);
        let Some(buyer) = buyer else {
            return Ok(None);
        };
        let mut owned: Vec<&Ticket> = t
            .tickets
            .values()
            .filter(|tk| tk.buyer_id == buyer.id)
            .collect();
        owned.sort_by_key(|tk| {
            // paid first, then most recent
            (tk.status != TicketStatus::Paid, std::cmp::Reverse(tk.purchased_at))
        });
        Ok(owned.first().map(|tk| (*tk).clone()))
    }

    async fn tickets_for_type(&self, ticket_type_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        Ok(self
            .lock()
            .tickets
            .values()
            .filter(|tk| tk.ticket_type_id == ticket_type_id)
            .cloned()
            .collect())
    }

    async fn transition_to_validated(
        &self,
        ticket_id: Uuid,
        operator_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ValidateTransition, StoreError> {
        let mut t = self.lock();
        let ticket = t
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {ticket_id}")))?;
        match ticket.status {
            TicketStatus::Paid => {
                ticket.status = TicketStatus::Validated;
                ticket.validated_by = Some(operator_id);
                ticket.validated_at = Some(at);
                ticket.updated_at = at;
                Ok(ValidateTransition::Validated(ticket.clone()))
            }
            TicketStatus::Validated => Ok(ValidateTransition::AlreadyValidated(ticket.clone())),
            TicketStatus::Cancelled => Ok(ValidateTransition::Cancelled(ticket.clone())),
            TicketStatus::Pending | TicketStatus::Refunded => {
                Ok(ValidateTransition::NotEligible(ticket.clone()))
            }
        }
    }

    async fn cancel_ticket(&self, ticket_id: Uuid) -> Result<Ticket, StoreError> {
        let mut t = self.lock();
        let ticket = t
            .tickets
            .get(&ticket_id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {ticket_id}")))?;
        if !ticket.status.cancellable() {
            return Err(StoreError::Conflict(format!(
                "ticket is {} and cannot be cancelled",
                ticket.status
            )));
        }
        let (type_id, qty) = (ticket.ticket_type_id, ticket.quantity);
        let now = Utc::now();
        let mut cancelled = ticket.clone();
        if let Some(ticket) = t.tickets.get_mut(&ticket_id) {
            ticket.status = TicketStatus::Cancelled;
            ticket.updated_at = now;
            cancelled = ticket.clone();
        }
        let event_id = t.ticket_types.get(&type_id).map(|tt| tt.event_id);
        if let Some(tt) = t.ticket_types.get_mut(&type_id) {
            tt.available = (tt.available + qty).min(tt.quantity);
            tt.updated_at = now;
        }
        if let Some(ev) = event_id.and_then(|id| t.events.get_mut(&id)) {
            ev.available_capacity = (ev.available_capacity + qty).min(ev.total_capacity);
            ev.updated_at = now;
        }
        Ok(cancelled)
    }

    async fn append_audit(&self, entry: NewAuditLog) -> Result<AuditLog, StoreError> {
        let mut t = self.lock();
        let log = AuditLog {
            id: Uuid::new_v4(),
            ticket_code: entry.ticket_code,
            operator_id: entry.operator_id,
            event_id: entry.event_id,
            ticket_type_name: entry.ticket_type_name,
            result: entry.result,
            channel: entry.channel,
            fraud_flag: entry.fraud_flag,
            message: entry.message,
            created_at: Utc::now(),
        };
        t.audit.push(log.clone());
        Ok(log)
    }

    async fn audit_logs(&self, filter: &AuditFilter) -> Result<Vec<AuditLog>, StoreError> {
        let t = self.lock();
        let mut logs: Vec<AuditLog> = t
            .audit
            .iter()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            logs.truncate(limit.max(0) as usize);
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    async fn seed(store: &MemoryStore, quantity: i32) -> (User, Event, TicketType) {
        let user = store
            .register_user(RegisterUser {
                name: "Comprador".into(),
                email: "buyer@example.com".into(),
                document: "12345678-9".into(),
                role: UserRole::Client,
            })
            .await
            .unwrap();
        let event = store
            .create_event(NewEvent {
                name: "Feria".into(),
                description: None,
                location: "Santiago".into(),
                starts_at: Utc::now(),
                total_capacity: quantity,
            })
            .await
            .unwrap();
        let tt = store
            .create_ticket_type(NewTicketType {
                event_id: event.id,
                name: "General".into(),
                price: Decimal::new(10_000, 0),
                quantity,
            })
            .await
            .unwrap();
        (user, event, tt)
    }

    fn new_ticket(code: &str, event: &Event, tt: &TicketType, buyer: &User) -> NewTicket {
        NewTicket {
            ticket_code: code.into(),
            event_id: event.id,
            ticket_type_id: tt.id,
            buyer_id: buyer.id,
            price: tt.price,
            quantity: 1,
            service_charge: Decimal::ZERO,
            total_amount: tt.price,
            status: TicketStatus::Paid,
            purchased_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reserve_release_sequences_preserve_the_capacity_invariant() {
        let store = MemoryStore::new();
        let (_, event, tt) = seed(&store, 10).await;

        store.reserve(tt.id, 4).await.unwrap();
        store.reserve(tt.id, 3).await.unwrap();
        store.release(tt.id, 2).await.unwrap();
        store.reserve(tt.id, 1).await.unwrap();

        let tt = store.ticket_type(tt.id).await.unwrap().unwrap();
        assert_eq!(tt.available, 10 - 4 - 3 + 2 - 1);
        assert!(tt.available >= 0 && tt.available <= tt.quantity);

        let event = store.event(event.id).await.unwrap().unwrap();
        assert_eq!(event.available_capacity, tt.available);
    }

    #[tokio::test]
    async fn release_never_exceeds_the_allotment() {
        let store = MemoryStore::new();
        let (_, _, tt) = seed(&store, 5).await;
        store.release(tt.id, 3).await.unwrap();
        let tt = store.ticket_type(tt.id).await.unwrap().unwrap();
        assert_eq!(tt.available, 5);
    }

    #[tokio::test]
    async fn concurrent_reserves_cannot_oversell_the_last_unit() {
        let store = Arc::new(MemoryStore::new());
        let (_, _, tt) = seed(&store, 1).await;

        let (a, b) = tokio::join!(store.reserve(tt.id, 1), store.reserve(tt.id, 1));
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let failure = if a.is_err() { a } else { b };
        assert!(matches!(
            failure,
            Err(StoreError::InsufficientCapacity { requested: 1, available: 0 })
        ));

        let tt = store.ticket_type(tt.id).await.unwrap().unwrap();
        assert_eq!(tt.available, 0);
    }

    #[tokio::test]
    async fn concurrent_validations_succeed_at_most_once() {
        let store = Arc::new(MemoryStore::new());
        let (user, event, tt) = seed(&store, 5).await;
        store.reserve(tt.id, 1).await.unwrap();
        let ticket = store
            .insert_ticket(new_ticket("TKT-AB2CD-0000", &event, &tt, &user))
            .await
            .unwrap();

        let (op_a, op_b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let (a, b) = tokio::join!(
            store.transition_to_validated(ticket.id, op_a, now),
            store.transition_to_validated(ticket.id, op_b, now)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let wins = outcomes
            .iter()
            .filter(|o| matches!(o, ValidateTransition::Validated(_)))
            .count();
        let losses = outcomes
            .iter()
            .filter(|o| matches!(o, ValidateTransition::AlreadyValidated(_)))
            .count();
        assert_eq!((wins, losses), (1, 1));
    }

    #[tokio::test]
    async fn cancel_restores_inventory_exactly_once() {
        let store = MemoryStore::new();
        let (user, event, tt) = seed(&store, 3).await;
        store.reserve(tt.id, 1).await.unwrap();
        let ticket = store
            .insert_ticket(new_ticket("TKT-AB2CD-0001", &event, &tt, &user))
            .await
            .unwrap();

        store.cancel_ticket(ticket.id).await.unwrap();
        let refreshed = store.ticket_type(tt.id).await.unwrap().unwrap();
        assert_eq!(refreshed.available, 3);

        // second cancel is a conflict, inventory untouched
        assert!(matches!(
            store.cancel_ticket(ticket.id).await,
            Err(StoreError::Conflict(_))
        ));
        let refreshed = store.ticket_type(tt.id).await.unwrap().unwrap();
        assert_eq!(refreshed.available, 3);
    }

    #[tokio::test]
    async fn duplicate_codes_are_rejected_for_retry() {
        let store = MemoryStore::new();
        let (user, event, tt) = seed(&store, 5).await;
        store
            .insert_ticket(new_ticket("TKT-AB2CD-0002", &event, &tt, &user))
            .await
            .unwrap();
        let err = store
            .insert_ticket(new_ticket("TKT-AB2CD-0002", &event, &tt, &user))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode(_)));
    }

    #[tokio::test]
    async fn issued_minus_cancelled_matches_consumed_capacity() {
        let store = MemoryStore::new();
        let (user, event, tt) = seed(&store, 4).await;
        let mut ids = Vec::new();
        for i in 0..3 {
            store.reserve(tt.id, 1).await.unwrap();
            let t = store
                .insert_ticket(new_ticket(&format!("TKT-AB2C{i}-0000"), &event, &tt, &user))
                .await
                .unwrap();
            ids.push(t.id);
        }
        store.cancel_ticket(ids[0]).await.unwrap();

        let tt = store.ticket_type(tt.id).await.unwrap().unwrap();
        let live = store
            .tickets_for_type(tt.id)
            .await
            .unwrap()
            .iter()
            .filter(|t| matches!(t.status, TicketStatus::Paid | TicketStatus::Validated))
            .count() as i32;
        assert_eq!(tt.quantity - tt.available, live);
    }
}
