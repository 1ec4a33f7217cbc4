//! Gateway server, bearer auth guard and session transport multiplexer

pub mod auth;
pub mod router;
pub mod server;
pub mod session;
pub mod tools;

pub use server::Gateway;
