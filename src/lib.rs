//! Tally - Fixed-Window Rate Limiting Service
//!
//! This crate implements an in-memory, per-identifier rate limiter with
//! named policies, and an HTTP service that exposes it. All accounting is
//! held in process memory and is lost on restart; running several
//! processes requires moving the window store to shared storage.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
