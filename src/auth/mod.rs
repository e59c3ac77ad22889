// Authentication and account management

pub mod audit_logger;
pub mod middleware;
pub mod password;
pub mod service;
pub mod token;
pub mod user_store;

pub use audit_logger::{AuditEvent, AuditLogger};
pub use service::AuthService;
pub use token::TokenService;
pub use user_store::{InMemoryUserStore, PgUserStore, UserStore};
