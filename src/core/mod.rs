//! core
//!
//! Domain types shared across the crate: validated object ids and decoded
//! commit records. Nothing here touches the external tool.

pub mod commit;
pub mod types;
