//! Wire-facing types
//!
//! RESP2 values used for every reply, the RESP2 frame codec used by the
//! connection layer, and the memcache command shape accepted by the service.

mod types;
mod resp;
mod memcache;

pub use types::{RespValue, RespError};
pub use resp::{RespParser, RespEncoder};
pub use memcache::{McCommand, McCommandType};
