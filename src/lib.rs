//! # Ensaluti (Sign-in & Registration Workflows)
//!
//! `ensaluti` drives the account lifecycle around email + password sign-in:
//! registration with bounded-time email validation, confirmation links backed
//! by single-use tokens, sign-in with lockout handling, and sign-out.
//!
//! ## Confirmation Flow
//!
//! Registration creates the account first and emails the confirmation link
//! second. A failed delivery never rolls the account back; the resend endpoint
//! covers recovery, and until the link is followed the account cannot sign in.
//!
//! ## Error Surface
//!
//! Endpoints that could reveal whether an address is registered collapse their
//! failures into a single outcome: every confirmation failure reads the same,
//! and resend always answers with the same notice.
//!
//! ## Storage
//!
//! Accounts, confirmation tokens and sessions live behind the `IdentityStore`
//! trait. The `PostgreSQL` store only keeps `SHA-256` digests of tokens and
//! Argon2 hashes of passwords; an in-memory store backs tests and DSN-less
//! development runs.

pub mod cli;
pub mod email;
pub mod ensaluti;
pub mod store;
pub mod workflow;
