//! Client half of a driver session: find a driver in the catalog, run it
//! as a child process and call its procedures over the pipes.

pub mod catalog;
pub mod config;
pub mod cursor;
pub mod session;
pub mod transport;

pub use catalog::{DriverCatalog, DriverEntry};
pub use config::ClientConfig;
pub use cursor::Cursor;
pub use session::Session;

#[cfg(test)]
mod tests;
