pub mod config;
pub mod handlers;
pub mod models;
pub mod report;
pub mod routes;
pub mod services;
pub mod store;
pub mod ticket_code;
pub mod utils;
