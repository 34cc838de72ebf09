pub mod auth;
pub mod client_ip;
pub mod rate_limit;
pub mod trace;

pub use auth::{auth_middleware, CurrentUser};
pub use client_ip::ClientIp;
pub use rate_limit::rate_limit_middleware;
pub use trace::trace_middleware;
