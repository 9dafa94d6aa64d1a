pub mod config;
pub mod engine;
pub mod index;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod scenario;
pub mod session;
pub mod store;
