//! Check-in validation, the core state machine.
//!
//! A scan walks a fixed pipeline: normalize, checksum, duplicate-scan
//! guard, lookup, purchase-date plausibility, then the atomic
//! paid -> validated transition. Rejections (fraud included) are ordinary
//! outcomes, not errors, so every attempt lands in the audit log and the
//! operator always gets a displayable verdict.
//!
//! The duplicate-scan window is a process-local, time-bounded cache; it is
//! a best-effort replay signal, not the at-most-once guarantee (that is
//! the store's status predicate).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use moka::sync::Cache;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{
    NewAuditLog, Ticket, ValidationChannel, ValidationVerdict,
};
use crate::store::{TicketStore, ValidateTransition};
use crate::ticket_code;
use crate::utils::error::AppError;

/// Identical identifiers scanned within this window are treated as replays.
pub const DUPLICATE_SCAN_WINDOW_SECS: i64 = 300;

/// Tickets older than this at scan time are implausible.
const MAX_TICKET_AGE_DAYS: i64 = 365;

#[derive(Clone)]
struct RecentScan {
    operator_id: Uuid,
    scanned_at: DateTime<Utc>,
}

/// What the operator sees. `fraud` marks suspected forgery or replay, as
/// opposed to ordinary ineligibility like an already-used ticket.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub verdict: ValidationVerdict,
    pub fraud: bool,
    pub message: String,
    pub ticket: Option<Ticket>,
    /// Prior stamp, populated on "already used" so the operator can see
    /// who admitted the holder and when.
    pub validated_at: Option<DateTime<Utc>>,
    pub validated_by: Option<Uuid>,
}

impl ValidationOutcome {
    pub fn approved(&self) -> bool {
        self.verdict == ValidationVerdict::Approved
    }

    fn ok(ticket: Ticket) -> Self {
        let (validated_at, validated_by) = (ticket.validated_at, ticket.validated_by);
        Self {
            verdict: ValidationVerdict::Approved,
            fraud: false,
            message: "ticket validated".into(),
            ticket: Some(ticket),
            validated_at,
            validated_by,
        }
    }

    fn rejected(message: impl Into<String>, fraud: bool, ticket: Option<Ticket>) -> Self {
        Self {
            verdict: ValidationVerdict::Rejected,
            fraud,
            message: message.into(),
            ticket,
            validated_at: None,
            validated_by: None,
        }
    }
}

pub struct ValidationService {
    store: Arc<dyn TicketStore>,
    recent_scans: Cache<String, RecentScan>,
    scan_window: Duration,
}

impl ValidationService {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self::with_window(store, Duration::seconds(DUPLICATE_SCAN_WINDOW_SECS))
    }

    /// Window override, used by configuration and by tests that cannot
    /// wait five minutes.
    pub fn with_window(store: Arc<dyn TicketStore>, scan_window: Duration) -> Self {
        let mut ttl = scan_window
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(
                DUPLICATE_SCAN_WINDOW_SECS as u64,
            ));
        if ttl.is_zero() {
            ttl = std::time::Duration::from_millis(1);
        }
        let recent_scans = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();
        Self {
            store,
            recent_scans,
            scan_window,
        }
    }

    /// Validates one identifier: a scanned QR payload code, a hand-typed
    /// code, or a buyer document, depending on `channel`.
    pub async fn validate(
        &self,
        identifier: &str,
        operator_id: Uuid,
        channel: ValidationChannel,
    ) -> Result<ValidationOutcome, AppError> {
        let normalized = ticket_code::normalize(identifier);
        if normalized.is_empty() {
            return Err(AppError::ValidationError(
                "identifier must not be empty".into(),
            ));
        }

        let outcome = match self.run_checks(&normalized, operator_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // infrastructure failure: still leave an audit trail for
                // the attempt before propagating
                self.append_audit(
                    &normalized,
                    operator_id,
                    channel,
                    None,
                    ValidationVerdict::Error,
                    false,
                    &format!("validation aborted: {err}"),
                )
                .await;
                return Err(err);
            }
        };

        self.append_audit(
            &normalized,
            operator_id,
            channel,
            outcome.ticket.as_ref(),
            outcome.verdict,
            outcome.fraud,
            &outcome.message,
        )
        .await;

        Ok(outcome)
    }

    async fn run_checks(
        &self,
        normalized: &str,
        operator_id: Uuid,
    ) -> Result<ValidationOutcome, AppError> {
        let looks_like_code = ticket_code::has_code_shape(normalized);
        if looks_like_code && !ticket_code::verify(normalized) {
            return Ok(ValidationOutcome::rejected(
                "ticket code checksum is invalid",
                true,
                None,
            ));
        }

        if let Some(prev) = self.recent_scans.get(normalized) {
            let elapsed = Utc::now().signed_duration_since(prev.scanned_at);
            if elapsed <= self.scan_window {
                return Ok(ValidationOutcome::rejected(
                    format!(
                        "duplicate scan: already presented {}s ago to operator {}",
                        elapsed.num_seconds().max(0),
                        prev.operator_id
                    ),
                    true,
                    None,
                ));
            }
        }

        let ticket = if looks_like_code {
            self.store.ticket_by_code(normalized).await?
        } else {
            self.store.ticket_for_document(normalized).await?
        };
        let Some(ticket) = ticket else {
            let outcome = ValidationOutcome::rejected("ticket not found", false, None);
            self.remember_scan(normalized, operator_id);
            return Ok(outcome);
        };

        let now = Utc::now();
        if ticket.purchased_at > now {
            self.remember_scan(normalized, operator_id);
            return Ok(ValidationOutcome::rejected(
                "purchase date is in the future",
                true,
                Some(ticket),
            ));
        }
        if now.signed_duration_since(ticket.purchased_at) > Duration::days(MAX_TICKET_AGE_DAYS) {
            self.remember_scan(normalized, operator_id);
            return Ok(ValidationOutcome::rejected(
                "ticket is too old to be valid",
                true,
                Some(ticket),
            ));
        }

        let outcome = match self
            .store
            .transition_to_validated(ticket.id, operator_id, now)
            .await?
        {
            ValidateTransition::Validated(ticket) => ValidationOutcome::ok(ticket),
            ValidateTransition::AlreadyValidated(ticket) => {
                let (at, by) = (ticket.validated_at, ticket.validated_by);
                let mut outcome = ValidationOutcome::rejected(
                    "ticket already used",
                    false,
                    Some(ticket),
                );
                outcome.validated_at = at;
                outcome.validated_by = by;
                outcome
            }
            ValidateTransition::Cancelled(ticket) => {
                ValidationOutcome::rejected("ticket is cancelled", false, Some(ticket))
            }
            ValidateTransition::NotEligible(ticket) => ValidationOutcome::rejected(
                format!("ticket is {} and not eligible for check-in", ticket.status),
                false,
                Some(ticket),
            ),
        };
        self.remember_scan(normalized, operator_id);
        Ok(outcome)
    }

    fn remember_scan(&self, normalized: &str, operator_id: Uuid) {
        // first scan wins the window; replays must keep reporting the
        // original operator and time
        if self.recent_scans.get(normalized).is_none() {
            self.recent_scans.insert(
                normalized.to_string(),
                RecentScan {
                    operator_id,
                    scanned_at: Utc::now(),
                },
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_audit(
        &self,
        identifier: &str,
        operator_id: Uuid,
        channel: ValidationChannel,
        ticket: Option<&Ticket>,
        verdict: ValidationVerdict,
        fraud: bool,
        message: &str,
    ) {
        let ticket_type_name = match ticket {
            Some(t) => match self.store.ticket_type(t.ticket_type_id).await {
                Ok(tt) => tt.map(|tt| tt.name),
                Err(_) => None,
            },
            None => None,
        };
        let entry = NewAuditLog {
            ticket_code: ticket
                .map(|t| t.ticket_code.clone())
                .unwrap_or_else(|| identifier.to_string()),
            operator_id,
            event_id: ticket.map(|t| t.event_id),
            ticket_type_name,
            result: verdict,
            channel,
            fraud_flag: fraud,
            message: message.to_string(),
        };
        if let Err(err) = self.store.append_audit(entry).await {
            // degraded mode: the operator still gets the verdict, but the
            // attempt is missing from the log
            tracing::warn!(error = %err, identifier, "failed to write audit record");
        }
    }
}
