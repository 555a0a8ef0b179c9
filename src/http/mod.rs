//! HTTP surface of the rate limit service.

pub mod headers;
mod middleware;
mod server;
mod service;

pub use middleware::{enforce, rejection, PolicyGuard, RejectionBody};
pub use server::HttpServer;
pub use service::{router, AppState, CheckRequest, PolicyView};
