pub mod auth;
pub mod database;
pub mod messaging;

pub use auth::{AccessTokenSource, AuthError, ServiceAccountKey, TokenResponse, FIREBASE_SCOPES};
pub use database::{ConditionalDelete, DatabaseError, RealtimeDatabaseClient};
pub use messaging::{MessagingClient, MessagingError, SendReceipt};
