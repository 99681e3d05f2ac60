//! Binary wire codec for events, accounts and instruction arguments
//!
//! Layouts are never hard-coded here: every read and write is driven by a
//! field list from a resolved [`Schema`](crate::schema::Schema). Integers are
//! little-endian; strings and byte vectors carry a u32 length prefix; vectors
//! carry a u32 element count.

mod decoder;
mod encoder;
mod value;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use value::{Record, Value};
