//! End-to-end flows through the HTTP router over the in-memory store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use taquilla_server::models::{Event, Ticket};
use taquilla_server::report::PlainTextRenderer;
use taquilla_server::routes::{create_routes, AppState};
use taquilla_server::services::mailer::MailError;
use taquilla_server::services::{
    AlwaysApprove, AlwaysDecline, MailAttachment, NoopMailer, TicketMailer,
};
use taquilla_server::store::{MemoryStore, TicketStore};

fn app() -> Router {
    create_routes(AppState::in_memory())
}

/// Mailer double that records every delivery instead of sending it.
#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<(String, Option<MailAttachment>)>>,
}

#[async_trait]
impl TicketMailer for CapturingMailer {
    async fn send_confirmation(
        &self,
        to: &str,
        _ticket: &Ticket,
        _event: &Event,
        attachment: Option<MailAttachment>,
    ) -> Result<(), MailError> {
        self.sent.lock().unwrap().push((to.to_string(), attachment));
        Ok(())
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

async fn register(app: &Router, name: &str, email: &str, document: &str, role: &str) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/users",
        Some(json!({
            "name": name,
            "email": email,
            "document": document,
            "role": role,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    body["data"].clone()
}

/// Creates a published event with one "General" tier and returns
/// `(event, ticket_type)`.
async fn published_event(app: &Router, capacity: i32) -> (Value, Value) {
    let (status, body) = send(
        app,
        "POST",
        "/events",
        Some(json!({
            "name": "Concierto en el Parque",
            "location": "Parque O'Higgins",
            "starts_at": "2026-11-20T20:00:00Z",
            "total_capacity": capacity,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create event failed: {body}");
    let event = body["data"].clone();
    let event_id = event["id"].as_str().unwrap().to_string();

    let (status, _) = send(app, "POST", &format!("/events/{event_id}/publish"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        app,
        "POST",
        &format!("/events/{event_id}/ticket-types"),
        Some(json!({"name": "General", "price": "15000", "quantity": capacity})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create tier failed: {body}");
    (event, body["data"].clone())
}

fn card() -> Value {
    json!({
        "number": "4242 4242 4242 4242",
        "holder": "Compradora de Prueba",
        "expiry": "12/29",
        "cvv": "123",
    })
}

async fn buy(app: &Router, buyer_id: &str, tier_id: &str, quantity: i32) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/tickets",
        Some(json!({
            "buyer_id": buyer_id,
            "ticket_type_id": tier_id,
            "quantity": quantity,
            "card": card(),
        })),
    )
    .await
}

#[tokio::test]
async fn purchase_validate_and_audit_round_trip() {
    let app = app();
    let buyer = register(&app, "Compradora", "buyer@test.cl", "12.345.678-9", "client").await;
    let operator = register(&app, "Portero", "door@test.cl", "9876543-2", "operator").await;
    let (_, tier) = published_event(&app, 20).await;

    // purchase two units
    let (status, body) = buy(
        &app,
        buyer["id"].as_str().unwrap(),
        tier["id"].as_str().unwrap(),
        2,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "purchase failed: {body}");
    let ticket = body["data"]["ticket"].clone();
    let code = ticket["ticket_code"].as_str().unwrap().to_string();
    assert_eq!(ticket["status"], "paid");
    // 2 x 15000 + 10% service charge
    assert_eq!(ticket["total_amount"], "33000.00");
    assert!(body["data"]["qr_svg"].as_str().unwrap().contains("<svg"));

    // the tier inventory moved
    let event_id = tier["event_id"].as_str().unwrap();
    let (_, body) = send(&app, "GET", &format!("/events/{event_id}/ticket-types"), None).await;
    assert_eq!(body["data"][0]["available"], json!(18));

    // ticket is fetchable by code
    let (status, _) = send(&app, "GET", &format!("/tickets/{code}"), None).await;
    assert_eq!(status, StatusCode::OK);

    // first scan approves
    let validate_body = json!({
        "operator_id": operator["id"],
        "channel": "qr",
    });
    let (status, body) = send(
        &app,
        "POST",
        &format!("/tickets/validate/{code}"),
        Some(validate_body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["verdict"], "approved");
    assert_eq!(body["data"]["fraud"], json!(false));

    // replay within the window is flagged
    let (status, body) = send(
        &app,
        "POST",
        &format!("/tickets/validate/{code}"),
        Some(validate_body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["verdict"], "rejected");
    assert_eq!(body["data"]["fraud"], json!(true));
    assert!(body["data"]["message"]
        .as_str()
        .unwrap()
        .contains("duplicate scan"));

    // both attempts were audited
    let (status, body) = send(&app, "GET", "/audit/logs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = send(&app, "GET", "/audit/stats", None).await;
    assert_eq!(body["data"]["total"], json!(2));
    assert_eq!(body["data"]["by_result"]["approved"], json!(1));
    assert_eq!(body["data"]["fraud_count"], json!(1));

    // CSV export carries both rows plus a header
    let request = Request::builder()
        .method("GET")
        .uri("/audit/export.csv")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    let csv = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(String::from_utf8_lossy(&csv).trim_end().lines().count(), 3);

    // report generation goes through the renderer collaborator
    let (status, _) = send(&app, "POST", "/audit/generate-pdf", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn cancelled_ticket_restores_capacity_and_rejects_checkin() {
    let app = app();
    let buyer = register(&app, "Cliente", "c@test.cl", "11.111.111-1", "client").await;
    let operator = register(&app, "Op", "op@test.cl", "22.222.222-2", "operator").await;
    let (_, tier) = published_event(&app, 5).await;

    let (status, body) = buy(
        &app,
        buyer["id"].as_str().unwrap(),
        tier["id"].as_str().unwrap(),
        1,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let ticket_id = body["data"]["ticket"]["id"].as_str().unwrap().to_string();
    let code = body["data"]["ticket"]["ticket_code"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, _) = send(&app, "PUT", &format!("/tickets/cancel/{ticket_id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    // capacity is back
    let event_id = tier["event_id"].as_str().unwrap();
    let (_, body) = send(&app, "GET", &format!("/events/{event_id}/ticket-types"), None).await;
    assert_eq!(body["data"][0]["available"], json!(5));

    // cancelling twice is a conflict
    let (status, _) = send(&app, "PUT", &format!("/tickets/cancel/{ticket_id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // a cancelled ticket cannot check in
    let (status, body) = send(
        &app,
        "POST",
        &format!("/tickets/validate/{code}"),
        Some(json!({"operator_id": operator["id"], "channel": "manual"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["verdict"], "rejected");
    assert!(body["data"]["message"].as_str().unwrap().contains("cancelled"));
}

#[tokio::test]
async fn oversold_purchase_is_rejected_with_conflict() {
    let app = app();
    let buyer = register(&app, "Cliente", "c2@test.cl", "33.333.333-3", "client").await;
    let (_, tier) = published_event(&app, 2).await;
    let (buyer_id, tier_id) = (
        buyer["id"].as_str().unwrap().to_string(),
        tier["id"].as_str().unwrap().to_string(),
    );

    let (status, _) = buy(&app, &buyer_id, &tier_id, 2).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = buy(&app, &buyer_id, &tier_id, 1).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_CAPACITY");
}

#[tokio::test]
async fn role_and_input_checks_guard_the_validate_endpoint() {
    let app = app();
    let buyer = register(&app, "Cliente", "c3@test.cl", "44.444.444-4", "client").await;
    let operator = register(&app, "Op", "op3@test.cl", "55.555.555-5", "operator").await;
    let (_, tier) = published_event(&app, 3).await;
    let (status, body) = buy(
        &app,
        buyer["id"].as_str().unwrap(),
        tier["id"].as_str().unwrap(),
        1,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let code = body["data"]["ticket"]["ticket_code"]
        .as_str()
        .unwrap()
        .to_string();

    // a client may not validate
    let (status, _) = send(
        &app,
        "POST",
        &format!("/tickets/validate/{code}"),
        Some(json!({"operator_id": buyer["id"], "channel": "qr"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // unknown channel is a 400
    let (status, _) = send(
        &app,
        "POST",
        &format!("/tickets/validate/{code}"),
        Some(json!({"operator_id": operator["id"], "channel": "carrier-pigeon"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // a deactivated operator is refused until re-enabled
    let operator_id = operator["id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/users/{operator_id}/active"),
        Some(json!({"active": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &app,
        "POST",
        &format!("/tickets/validate/{code}"),
        Some(json!({"operator_id": operator["id"], "channel": "qr"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/users/{operator_id}/active"),
        Some(json!({"active": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // document ("rut") lookup works end-to-end
    let (status, body) = send(
        &app,
        "POST",
        "/tickets/validate/44.444.444-4",
        Some(json!({"operator_id": operator["id"], "channel": "rut"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["verdict"], "approved");
    assert_eq!(body["data"]["ticket"]["ticket_code"], json!(code));
}

#[tokio::test]
async fn declined_payment_leaves_no_ticket_and_no_inventory_movement() {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        store.clone(),
        Arc::new(AlwaysDecline),
        Arc::new(NoopMailer),
        Arc::new(PlainTextRenderer),
        Duration::seconds(300),
    );
    let app = create_routes(state);
    let buyer = register(&app, "Cliente", "decline@test.cl", "88.888.888-8", "client").await;
    let (_, tier) = published_event(&app, 4).await;

    let (status, body) = buy(
        &app,
        buyer["id"].as_str().unwrap(),
        tier["id"].as_str().unwrap(),
        2,
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED, "body: {body}");
    assert_eq!(body["error"]["code"], "PAYMENT_DECLINED");

    // neither counter moved and nothing was persisted
    let tier_id: Uuid = tier["id"].as_str().unwrap().parse().unwrap();
    let tt = store.ticket_type(tier_id).await.unwrap().unwrap();
    assert_eq!(tt.available, 4);
    let event = store.event(tt.event_id).await.unwrap().unwrap();
    assert_eq!(event.available_capacity, 4);
    assert!(store.tickets_for_type(tier_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn purchase_emails_the_buyer_with_the_qr_ticket_attached() {
    let mailer = Arc::new(CapturingMailer::default());
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(AlwaysApprove),
        mailer.clone(),
        Arc::new(PlainTextRenderer),
        Duration::seconds(300),
    );
    let app = create_routes(state);
    let buyer = register(&app, "Cliente", "mail@test.cl", "99.999.999-9", "client").await;
    let (_, tier) = published_event(&app, 3).await;

    let (status, body) = buy(
        &app,
        buyer["id"].as_str().unwrap(),
        tier["id"].as_str().unwrap(),
        1,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let code = body["data"]["ticket"]["ticket_code"]
        .as_str()
        .unwrap()
        .to_string();

    // delivery runs off the request path; wait for the spawned task
    for _ in 0..100 {
        if !mailer.sent.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (to, attachment) = &sent[0];
    assert_eq!(to, "mail@test.cl");
    let attachment = attachment.as_ref().expect("confirmation carries the ticket");
    assert_eq!(attachment.filename, format!("{code}.svg"));
    assert_eq!(attachment.content_type, "image/svg+xml");
    assert!(String::from_utf8_lossy(&attachment.bytes).contains("<svg"));
}

#[tokio::test]
async fn duplicate_email_and_event_names_conflict() {
    let app = app();
    register(&app, "Uno", "dup@test.cl", "66.666.666-6", "client").await;
    let (status, body) = send(
        &app,
        "POST",
        "/users",
        Some(json!({
            "name": "Dos",
            "email": "DUP@test.cl",
            "document": "77.777.777-7",
            "role": "client",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "body: {body}");

    // same document under a fresh email also conflicts
    let (status, _) = send(
        &app,
        "POST",
        "/users",
        Some(json!({
            "name": "Tres",
            "email": "tres@test.cl",
            "document": "66.666.666-6",
            "role": "client",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    published_event(&app, 2).await;
    let (status, _) = send(
        &app,
        "POST",
        "/events",
        Some(json!({
            "name": "Concierto en el Parque",
            "location": "Otro lugar",
            "starts_at": "2026-12-01T20:00:00Z",
            "total_capacity": 10,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn tier_allotments_cannot_exceed_event_capacity() {
    let app = app();
    let (event, _) = published_event(&app, 10).await;
    let event_id = event["id"].as_str().unwrap();

    // the General tier already allots all 10 seats
    let (status, body) = send(
        &app,
        "POST",
        &format!("/events/{event_id}/ticket-types"),
        Some(json!({"name": "VIP", "price": "40000", "quantity": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
}
