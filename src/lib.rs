pub mod config;
pub mod error;
pub mod guard;
pub mod ids;
pub mod models;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
