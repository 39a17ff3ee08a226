//! Sync client: connection lifecycle, session tasks and the public API.

mod connection;
mod session;


pub use connection::SyncClient;
