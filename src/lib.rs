pub mod config;
pub mod messages;
pub mod room;
pub mod routes;
pub mod server;
pub mod store;
