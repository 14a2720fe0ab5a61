use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use chrono::Duration;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, security_header_layers};
use crate::handlers::{self, audit, events, tickets, users};
use crate::report::{PdfRenderer, PlainTextRenderer};
use crate::services::{
    AlwaysApprove, AuditService, IssuanceService, NoopMailer, PaymentProcessor, TicketMailer,
    ValidationService,
};
use crate::store::{MemoryStore, TicketStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TicketStore>,
    pub payment: Arc<dyn PaymentProcessor>,
    pub mailer: Arc<dyn TicketMailer>,
    pub pdf: Arc<dyn PdfRenderer>,
    pub issuance: IssuanceService,
    pub validation: Arc<ValidationService>,
    pub audit: AuditService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TicketStore>,
        payment: Arc<dyn PaymentProcessor>,
        mailer: Arc<dyn TicketMailer>,
        pdf: Arc<dyn PdfRenderer>,
        scan_window: Duration,
    ) -> Self {
        Self {
            issuance: IssuanceService::new(store.clone()),
            validation: Arc::new(ValidationService::with_window(store.clone(), scan_window)),
            audit: AuditService::new(store.clone()),
            store,
            payment,
            mailer,
            pdf,
        }
    }

    /// Fully in-process wiring: memory store, approving payment double,
    /// no email. Used by the test suite.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(AlwaysApprove),
            Arc::new(NoopMailer),
            Arc::new(PlainTextRenderer),
            Duration::seconds(crate::services::validation::DUPLICATE_SCAN_WINDOW_SECS),
        )
    }
}

pub fn create_routes(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/users", post(users::register))
        .route("/users/:id", get(users::get_user))
        .route("/users/:id/active", put(users::set_active))
        .route("/events", post(events::create_event).get(events::list_events))
        .route("/events/:id", get(events::get_event))
        .route("/events/:id/publish", post(events::publish_event))
        .route(
            "/events/:id/ticket-types",
            post(events::create_ticket_type).get(events::list_ticket_types),
        )
        .route("/tickets", post(tickets::purchase))
        .route("/tickets/:code", get(tickets::get_ticket))
        .route("/tickets/cancel/:id", put(tickets::cancel_ticket))
        .route("/tickets/validate/:code", post(tickets::validate_ticket))
        .route("/audit/logs", get(audit::list_logs))
        .route("/audit/stats", get(audit::stats))
        .route("/audit/export.csv", get(audit::export_csv))
        .route("/audit/generate-pdf", post(audit::generate_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer());
    for layer in security_header_layers() {
        router = router.layer(layer);
    }
    router
}
