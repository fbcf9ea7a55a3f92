//! Identity and credential core: password and OAuth sign-in, access and
//! password-reset tokens, and the HTTP surface over them.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod oauth;
pub mod state;
