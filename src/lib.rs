pub mod agent;
pub mod bus;
pub mod chat;
pub mod config;
pub mod entity;
pub mod error;
pub mod manager;
pub mod server;
pub mod state;
pub mod store;
