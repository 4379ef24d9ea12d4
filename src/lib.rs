//! Dynamic Client Registration Management (DCRM) library crate.
//!
//! Registers, reads, updates and deletes OAuth2/OIDC clients per RFC 7591,
//! keeping each OAuth consumer application paired with a service provider in
//! the application-management store.

pub mod config;
pub mod dcr;
pub mod errors;
pub mod storage;
