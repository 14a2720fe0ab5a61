pub mod csv;
pub mod pdf;

pub use csv::render_csv;
pub use pdf::{AuditReport, PdfRenderer, PlainTextRenderer};
