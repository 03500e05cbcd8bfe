//! Shared data types.

pub mod client;

pub use client::{ClientRegistration, ClientValidationError, GrantType, RegisteredClient};
