//! GLPI REST access: session lifecycle, search and item fetches, and the
//! mapping of field-indexed rows into typed records.

pub mod api_types;
pub mod client;
pub mod fields;
pub mod session;
pub mod types;

pub use client::GlpiClient;
pub use session::{SessionManager, SessionSettings};
