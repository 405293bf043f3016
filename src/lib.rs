pub mod access;
pub mod activity;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod hints;
pub mod intake;
pub mod jobs;
pub mod models;
pub mod mutation;
pub mod query;
pub mod routes;
pub mod schema;
pub mod state;
pub mod utils;
pub mod workers;

pub use workers::{default_handlers, Worker};
