pub mod audit;
pub mod inventory;
pub mod issuance;
pub mod mailer;
pub mod payment;
pub mod validation;

pub use audit::AuditService;
pub use inventory::InventoryService;
pub use issuance::{IssuanceService, IssuedTicket};
pub use mailer::{MailAttachment, NoopMailer, SmtpMailer, TicketMailer};
pub use payment::{
    AlwaysApprove, AlwaysDecline, ChargeRequest, PaymentDecline, PaymentProcessor, PaymentReceipt,
    SimulatedProcessor,
};
pub use validation::{ValidationOutcome, ValidationService};
