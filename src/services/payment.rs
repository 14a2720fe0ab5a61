//! Payment collaborator.
//!
//! The core treats payment as a black-box precondition to issuance, so the
//! processor is a trait: the simulator below stands in for a real gateway
//! and the test doubles make purchase flows deterministic.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Cards the simulator will accept, the usual gateway test numbers.
const KNOWN_TEST_CARDS: &[&str] = &[
    "4242424242424242",
    "4111111111111111",
    "4000056655665556",
    "5555555555554444",
    "5200828282828210",
    "378282246310005",
    "371449635398431",
    "6011111111111117",
];

const DEFAULT_DECLINE_RATE: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub card_number: String,
    pub card_holder: String,
    /// `MM/YY`
    pub expiry: String,
    pub cvv: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub card_type: &'static str,
    pub auth_code: String,
}

/// A declined charge is an expected outcome, distinct from a gateway
/// being unreachable (which surfaces as an upstream error elsewhere).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct PaymentDecline {
    pub reason: String,
}

impl PaymentDecline {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, PaymentDecline>;
}

/// Luhn mod-10 check over a digits-only card number.
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn card_type(digits: &str) -> &'static str {
    match digits.as_bytes().first() {
        Some(b'4') => "visa",
        Some(b'5') => "mastercard",
        Some(b'3') => "amex",
        Some(b'6') => "discover",
        _ => "unknown",
    }
}

/// Simulated gateway: Luhn check, allow-list of test cards, and a
/// configurable random decline rate on otherwise-valid charges.
pub struct SimulatedProcessor {
    decline_rate: f64,
}

impl SimulatedProcessor {
    pub fn new() -> Self {
        Self {
            decline_rate: DEFAULT_DECLINE_RATE,
        }
    }

    pub fn with_decline_rate(decline_rate: f64) -> Self {
        Self { decline_rate }
    }

    fn validate(&self, request: &ChargeRequest) -> Result<String, PaymentDecline> {
        let digits: String = request
            .card_number
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        if digits.len() < 13 || digits.len() > 19 {
            return Err(PaymentDecline::new("card number has an invalid length"));
        }
        if !luhn_valid(&digits) {
            return Err(PaymentDecline::new("card number failed the Luhn check"));
        }
        if !KNOWN_TEST_CARDS.contains(&digits.as_str()) {
            return Err(PaymentDecline::new("card is not accepted by this merchant"));
        }
        if request.cvv.len() < 3 || !request.cvv.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PaymentDecline::new("invalid security code"));
        }
        if request.amount <= Decimal::ZERO {
            return Err(PaymentDecline::new("charge amount must be positive"));
        }
        Ok(digits)
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentProcessor for SimulatedProcessor {
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, PaymentDecline> {
        let digits = self.validate(request)?;
        let declined = rand::thread_rng().gen_bool(self.decline_rate.clamp(0.0, 1.0));
        if declined {
            return Err(PaymentDecline::new("issuer declined the transaction"));
        }
        let auth_code: String = {
            let mut rng = rand::thread_rng();
            (0..6).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect()
        };
        Ok(PaymentReceipt {
            transaction_id: Uuid::new_v4().to_string(),
            card_type: card_type(&digits),
            auth_code,
        })
    }
}

/// Test double: approves every charge.
pub struct AlwaysApprove;

#[async_trait]
impl PaymentProcessor for AlwaysApprove {
    async fn charge(&self, _request: &ChargeRequest) -> Result<PaymentReceipt, PaymentDecline> {
        Ok(PaymentReceipt {
            transaction_id: Uuid::new_v4().to_string(),
            card_type: "visa",
            auth_code: "000000".into(),
        })
    }
}

/// Test double: declines every charge.
pub struct AlwaysDecline;

#[async_trait]
impl PaymentProcessor for AlwaysDecline {
    async fn charge(&self, _request: &ChargeRequest) -> Result<PaymentReceipt, PaymentDecline> {
        Err(PaymentDecline::new("declined by test double"))
    }
}
