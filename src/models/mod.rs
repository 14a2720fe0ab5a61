pub mod audit_log;
pub mod event;
pub mod ticket;
pub mod ticket_type;
pub mod user;

pub use audit_log::{
    AuditFilter, AuditLog, AuditStats, NewAuditLog, OperatorStat, ValidationChannel,
    ValidationVerdict,
};
pub use event::{Event, EventStatus, NewEvent};
pub use ticket::{NewTicket, QrPayload, Ticket, TicketStatus};
pub use ticket_type::{NewTicketType, TicketType};
pub use user::{RegisterUser, User, UserRole};
