pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod evaluator;
pub mod extract;
pub mod lessons;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod routes;
pub mod service;
pub mod store;
pub mod workflow;

pub use config::Config;
pub use error::{AcademyError, Result};
pub use service::Academy;
pub use store::{MemoryStore, PgStore, Repo, Store};
