//! # SOTAforge Core
//!
//! Shared, runtime-agnostic logic for SOTAforge: document models, the
//! conversation transcript, history trimming, tool-result normalization,
//! and the document store abstraction.
//!
//! This crate contains no tokio, sqlx, or network dependencies. Everything
//! here is either a pure function or a trait the application crate
//! implements against real I/O.

pub mod models;
pub mod store;
pub mod transcript;
