pub mod connection;
pub mod events;
pub mod purge;
pub mod rate_limiter;
pub mod registry;
pub mod relay;
pub mod sweeper;
pub mod validation;
