pub mod auth;
pub mod encode;
pub mod rate_limit;
