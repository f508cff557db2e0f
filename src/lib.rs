//! Points terminal for the Tio Wicho loyalty program.
//!
//! The ledger service owns customers and transactions. This crate validates
//! what waiters type, talks to the ledger over HTTP, and keeps one customer
//! snapshot per session consistent with it.

pub mod models;
pub mod repositories;
pub mod services;
pub mod settings;
