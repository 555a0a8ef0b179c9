//! Rate limiting logic and state management.

mod identifier;
mod limiter;
mod policy;
mod sweeper;
mod window;

pub use identifier::{Identifier, FORWARDED_FOR_HEADER, USER_ID_HEADER};
pub use limiter::{Decision, RateLimiter};
pub use policy::{Policy, PolicySpec, PolicyTable};
pub use sweeper::Sweeper;
pub use window::{now_millis, WindowEntry, WindowStore};
