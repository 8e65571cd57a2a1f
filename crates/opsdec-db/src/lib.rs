//! opsdec-db: SQLite persistence for the opsdec activity monitor.
//!
//! Provides the connection pool, embedded migrations, row models, and
//! typed query modules. All other components talk to the database
//! exclusively through the functions in [`queries`].

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
