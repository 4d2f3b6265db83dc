// Linked accounts: owner-scoped listing and unlinking
pub mod accounts;

// HTTP surface
pub mod api;

// Caller identity
pub mod auth;

// Service configuration
pub mod config;

// Credential model and encrypted storage
pub mod credentials;

pub mod error;

// Token freshness and refresh
pub mod freshness;

// Authorization code flow and CSRF state
pub mod oauth;

// Provider adapter contract and registry
pub mod provider;

pub use error::LinkError;
