//! Chat transports.

pub mod export;

pub use export::JsonExportTransport;
