//! Gatehouse - Keyed Admission Rate Limiting
//!
//! This crate implements an in-process abuse-prevention rate limiter: a
//! per-key, time-windowed admission gate with automatic blocking and
//! recovery, plus the HTTP plumbing to enforce it either as an axum
//! middleware inside an existing service or as a standalone admission
//! service.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
