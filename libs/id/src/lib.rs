//! # hm-id
//!
//! Typed identifiers used by the health manager.
//!
//! ## Two families
//!
//! - **Guids** are minted elsewhere on the platform (the controller, the
//!   worker nodes) and arrive as opaque strings. We never generate them; we
//!   only validate that they are non-empty and keep the types apart so an
//!   instance guid cannot be passed where an app guid is expected.
//! - **Message IDs** are minted here, one per pending start/stop record.
//!   They use the prefixed ULID format `msg_{ulid}` so they sort by creation
//!   time in logs and on the wire.
//!
//! Examples:
//! - `AppGuid::parse("7f3c…")`
//! - `msg_01HV4Z2WQXKJNM8GPQY6VBKC3D`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Joins guids into composite store keys. Guids may not contain it.
pub const KEY_SEPARATOR: char = ':';

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
