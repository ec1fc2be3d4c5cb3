//! HTTP middleware for the gateway.
pub mod auth;

pub use auth::{AuthError, AuthLayer, Authenticator, Claims, TokenConfig};
