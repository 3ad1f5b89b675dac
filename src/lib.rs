//! Gatehouse - Request Admission Control
//!
//! This crate implements the abuse-mitigation layer of a small social
//! networking application: a per-identity POST cooldown, a per-identity
//! upload quota over a sliding window, and failed-login lockouts. The
//! decisions are exposed as a library and over gRPC for the web layer.

pub mod admission;
pub mod config;
pub mod error;
pub mod grpc;
