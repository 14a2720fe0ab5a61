//! Postgres-backed store.
//!
//! Status columns are TEXT with CHECK constraints; rows decode into the
//! domain enums through `TryFrom`, so a corrupt row surfaces as a distinct
//! error instead of a silent default. Every invariant-guarding transition
//! runs either as a single UPDATE with a status predicate or inside a
//! transaction holding `SELECT ... FOR UPDATE` row locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::{
    AuditFilter, AuditLog, Event, EventStatus, NewAuditLog, NewEvent, NewTicket, NewTicketType,
    RegisterUser, Ticket, TicketType, User, UserRole,
};
use crate::store::{StoreError, TicketStore, ValidateTransition};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
    } else {
        false
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    document: String,
    role: String,
    assigned_event: Option<Uuid>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role =
            UserRole::from_parts(&row.role, row.assigned_event).map_err(StoreError::Corrupt)?;
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            document: row.document,
            role,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    location: String,
    starts_at: DateTime<Utc>,
    total_capacity: i32,
    available_capacity: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            id: row.id,
            name: row.name,
            description: row.description,
            location: row.location,
            starts_at: row.starts_at,
            total_capacity: row.total_capacity,
            available_capacity: row.available_capacity,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TicketRow {
    id: Uuid,
    ticket_code: String,
    event_id: Uuid,
    ticket_type_id: Uuid,
    buyer_id: Uuid,
    price: Decimal,
    quantity: i32,
    service_charge: Decimal,
    total_amount: Decimal,
    status: String,
    purchased_at: DateTime<Utc>,
    validated_by: Option<Uuid>,
    validated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            ticket_code: row.ticket_code,
            event_id: row.event_id,
            ticket_type_id: row.ticket_type_id,
            buyer_id: row.buyer_id,
            price: row.price,
            quantity: row.quantity,
            service_charge: row.service_charge,
            total_amount: row.total_amount,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            purchased_at: row.purchased_at,
            validated_by: row.validated_by,
            validated_at: row.validated_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: Uuid,
    ticket_code: String,
    operator_id: Uuid,
    event_id: Option<Uuid>,
    ticket_type_name: Option<String>,
    result: String,
    channel: String,
    fraud_flag: bool,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditLog {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditLog {
            id: row.id,
            ticket_code: row.ticket_code,
            operator_id: row.operator_id,
            event_id: row.event_id,
            ticket_type_name: row.ticket_type_name,
            result: row.result.parse().map_err(StoreError::Corrupt)?,
            channel: row.channel.parse().map_err(StoreError::Corrupt)?,
            fraud_flag: row.fraud_flag,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

const TICKET_COLUMNS: &str = "id, ticket_code, event_id, ticket_type_id, buyer_id, price, \
     quantity, service_charge, total_amount, status, purchased_at, validated_by, validated_at, \
     created_at, updated_at";

#[async_trait]
impl TicketStore for PgStore {
    async fn register_user(&self, new: RegisterUser) -> Result<User, StoreError> {
        let row: Result<UserRow, sqlx::Error> = sqlx::query_as(
            "INSERT INTO users (id, name, email, document, role, assigned_event, is_active) \
             VALUES ($1, $2, lower($3), $4, $5, $6, TRUE) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.document)
        .bind(new.role.tag())
        .bind(new.role.assigned_event())
        .fetch_one(&self.pool)
        .await;
        match row {
            Ok(row) => row.try_into(),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "email '{}' is already registered",
                new.email.to_lowercase()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn user_by_document(&self, document: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE document = $1")
            .bind(document)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn set_user_active(&self, id: Uuid, active: bool) -> Result<User, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("user {id}")))?
            .try_into()
    }

    async fn create_event(&self, new: NewEvent) -> Result<Event, StoreError> {
        let row: Result<EventRow, sqlx::Error> = sqlx::query_as(
            "INSERT INTO events \
             (id, name, description, location, starts_at, total_capacity, available_capacity, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $6, 'draft') RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.location)
        .bind(new.starts_at)
        .bind(new.total_capacity)
        .fetch_one(&self.pool)
        .await;
        match row {
            Ok(row) => row.try_into(),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "event '{}' already exists",
                new.name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let row: Option<EventRow> = sqlx::query_as("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_events(&self, status: Option<EventStatus>) -> Result<Vec<Event>, StoreError> {
        let rows: Vec<EventRow> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM events WHERE status = $1 ORDER BY starts_at")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM events ORDER BY starts_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_event_status(&self, id: Uuid, status: EventStatus) -> Result<Event, StoreError> {
        let row: Option<EventRow> = sqlx::query_as(
            "UPDATE events SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("event {id}")))?
            .try_into()
    }

    async fn create_ticket_type(&self, new: NewTicketType) -> Result<TicketType, StoreError> {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM events WHERE id = $1")
            .bind(new.event_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("event {}", new.event_id)));
        }
        let tt: TicketType = sqlx::query_as(
            "INSERT INTO ticket_types (id, event_id, name, price, quantity, available) \
             VALUES ($1, $2, $3, $4, $5, $5) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.event_id)
        .bind(&new.name)
        .bind(new.price)
        .bind(new.quantity)
        .fetch_one(&self.pool)
        .await?;
        Ok(tt)
    }

    async fn ticket_type(&self, id: Uuid) -> Result<Option<TicketType>, StoreError> {
        Ok(sqlx::query_as("SELECT * FROM ticket_types WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn ticket_types_for_event(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<TicketType>, StoreError> {
        Ok(
            sqlx::query_as("SELECT * FROM ticket_types WHERE event_id = $1 ORDER BY name")
                .bind(event_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn reserve(&self, ticket_type_id: Uuid, qty: i32) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(i32, Uuid)> = sqlx::query_as(
            "SELECT available, event_id FROM ticket_types WHERE id = $1 FOR UPDATE",
        )
        .bind(ticket_type_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (available, event_id) = row
            .ok_or_else(|| StoreError::NotFound(format!("ticket type {ticket_type_id}")))?;
        if available < qty {
            return Err(StoreError::InsufficientCapacity {
                requested: qty,
                available,
            });
        }
        sqlx::query(
            "UPDATE ticket_types SET available = available - $2, updated_at = now() WHERE id = $1",
        )
        .bind(ticket_type_id)
        .bind(qty)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE events SET available_capacity = GREATEST(available_capacity - $2, 0), \
             updated_at = now() WHERE id = $1",
        )
        .bind(event_id)
        .bind(qty)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn release(&self, ticket_type_id: Uuid, qty: i32) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT event_id FROM ticket_types WHERE id = $1 FOR UPDATE")
                .bind(ticket_type_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (event_id,) = row
            .ok_or_else(|| StoreError::NotFound(format!("ticket type {ticket_type_id}")))?;
        sqlx::query(
            "UPDATE ticket_types SET available = LEAST(available + $2, quantity), \
             updated_at = now() WHERE id = $1",
        )
        .bind(ticket_type_id)
        .bind(qty)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE events SET available_capacity = LEAST(available_capacity + $2, total_capacity), \
             updated_at = now() WHERE id = $1",
        )
        .bind(event_id)
        .bind(qty)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_ticket(&self, new: NewTicket) -> Result<Ticket, StoreError> {
        let row: Result<TicketRow, sqlx::Error> = sqlx::query_as(
            "INSERT INTO tickets \
             (id, ticket_code, event_id, ticket_type_id, buyer_id, price, quantity, \
              service_charge, total_amount, status, purchased_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&new.ticket_code)
        .bind(new.event_id)
        .bind(new.ticket_type_id)
        .bind(new.buyer_id)
        .bind(new.price)
        .bind(new.quantity)
        .bind(new.service_charge)
        .bind(new.total_amount)
        .bind(new.status.as_str())
        .bind(new.purchased_at)
        .fetch_one(&self.pool)
        .await;
        match row {
            Ok(row) => row.try_into(),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateCode(new.ticket_code)),
            Err(e) => Err(e.into()),
        }
    }

    async fn ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let row: Option<TicketRow> = sqlx::query_as("SELECT * FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn ticket_by_code(&self, code: &str) -> Result<Option<Ticket>, StoreError> {
        let row: Option<TicketRow> =
            sqlx::query_as("SELECT * FROM tickets WHERE ticket_code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn ticket_for_document(&self, document: &str) -> Result<Option<Ticket>, StoreError> {
        let sql = format!(
            "SELECT t.{cols} FROM tickets t JOIN users u ON u.id = t.buyer_id \
             WHERE u.document = $1 \
             ORDER BY (t.status = 'paid') DESC, t.purchased_at DESC LIMIT 1",
            cols = TICKET_COLUMNS.replace(", ", ", t.")
        );
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(document)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn tickets_for_type(&self, ticket_type_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let rows: Vec<TicketRow> =
            sqlx::query_as("SELECT * FROM tickets WHERE ticket_type_id = $1")
                .bind(ticket_type_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn transition_to_validated(
        &self,
        ticket_id: Uuid,
        operator_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ValidateTransition, StoreError> {
        // single-statement CAS: the status predicate makes the transition
        // at-most-once even under concurrent scans
        let won: Option<TicketRow> = sqlx::query_as(
            "UPDATE tickets SET status = 'validated', validated_by = $2, validated_at = $3, \
             updated_at = now() WHERE id = $1 AND status = 'paid' RETURNING *",
        )
        .bind(ticket_id)
        .bind(operator_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = won {
            return Ok(ValidateTransition::Validated(row.try_into()?));
        }
        let current = self
            .ticket(ticket_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("ticket {ticket_id}")))?;
        Ok(match current.status {
            crate::models::TicketStatus::Validated => {
                ValidateTransition::AlreadyValidated(current)
            }
            crate::models::TicketStatus::Cancelled => ValidateTransition::Cancelled(current),
            _ => ValidateTransition::NotEligible(current),
        })
    }

    async fn cancel_ticket(&self, ticket_id: Uuid) -> Result<Ticket, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<TicketRow> =
            sqlx::query_as("SELECT * FROM tickets WHERE id = $1 FOR UPDATE")
                .bind(ticket_id)
                .fetch_optional(&mut *tx)
                .await?;
        let current: Ticket = row
            .ok_or_else(|| StoreError::NotFound(format!("ticket {ticket_id}")))?
            .try_into()?;
        if !current.status.cancellable() {
            return Err(StoreError::Conflict(format!(
                "ticket is {} and cannot be cancelled",
                current.status
            )));
        }
        let cancelled: TicketRow = sqlx::query_as(
            "UPDATE tickets SET status = 'cancelled', updated_at = now() \
             WHERE id = $1 RETURNING *",
        )
        .bind(ticket_id)
        .fetch_one(&mut *tx)
        .await?;
        let event_id: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE ticket_types SET available = LEAST(available + $2, quantity), \
             updated_at = now() WHERE id = $1 RETURNING event_id",
        )
        .bind(current.ticket_type_id)
        .bind(current.quantity)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((event_id,)) = event_id {
            sqlx::query(
                "UPDATE events SET available_capacity = \
                 LEAST(available_capacity + $2, total_capacity), updated_at = now() WHERE id = $1",
            )
            .bind(event_id)
            .bind(current.quantity)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        cancelled.try_into()
    }

    async fn append_audit(&self, entry: NewAuditLog) -> Result<AuditLog, StoreError> {
        let row: AuditRow = sqlx::query_as(
            "INSERT INTO audit_logs \
             (id, ticket_code, operator_id, event_id, ticket_type_name, result, channel, \
              fraud_flag, message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&entry.ticket_code)
        .bind(entry.operator_id)
        .bind(entry.event_id)
        .bind(&entry.ticket_type_name)
        .bind(entry.result.as_str())
        .bind(entry.channel.as_str())
        .bind(entry.fraud_flag)
        .bind(&entry.message)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn audit_logs(&self, filter: &AuditFilter) -> Result<Vec<AuditLog>, StoreError> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT * FROM audit_logs WHERE TRUE");
        if let Some(event_id) = filter.event_id {
            qb.push(" AND event_id = ").push_bind(event_id);
        }
        if let Some(from) = filter.from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND created_at <= ").push_bind(to);
        }
        if let Some(channel) = filter.channel {
            qb.push(" AND channel = ").push_bind(channel.as_str());
        }
        if let Some(result) = filter.result {
            qb.push(" AND result = ").push_bind(result.as_str());
        }
        if let Some(operator_id) = filter.operator_id {
            qb.push(" AND operator_id = ").push_bind(operator_id);
        }
        if filter.fraud_only {
            qb.push(" AND fraud_flag");
        }
        qb.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }
        let rows: Vec<AuditRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
