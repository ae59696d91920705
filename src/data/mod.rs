//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations
//! - Repo and model entities

mod database;
mod models;

pub use database::Database;
pub use models::*;
