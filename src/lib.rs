//! A MessagePack binary serialization codec.
//!
//! [`Packer`] walks an in-memory [`Value`] and produces bytes; [`Unpacker`]
//! consumes bytes fed to it incrementally and produces [`Value`]s, tolerating
//! fragmentation at any point in the stream. [`registry`] lets either side
//! bind extension typecodes (and, on the packer side, host types) to custom
//! handlers, per-instance or process-wide.

mod buffer;
pub mod error;
mod marker;
pub mod pack;
pub mod registry;
pub mod unpack;
pub mod value;

pub use error::{Error, Result};
pub use marker::ObjectType;
pub use pack::Packer;
pub use unpack::{Unpacker, UnpackerConfig};
pub use value::{ExtValue, HandlerOutcome, OtherValue, Value};
