// Remote configuration with encryption at rest

pub mod crypto;
pub mod service;
pub mod store;

pub use crypto::{mask, ConfigCipher};
pub use service::{ConfigHistoryView, ConfigService, CreateConfigRequest, UpdateConfigRequest};
pub use store::{ConfigStore, InMemoryConfigStore, PgConfigStore};
