pub mod audit;
pub mod authenticator;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod schema;
pub mod state;
pub mod storage;
pub mod verification;
pub mod workers;
pub mod workflow;

pub use workers::{default_handlers, JobExecution, JobHandler, Worker};
