use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod bincode;

pub use self::bincode::BincodeCodec;

/// Codec trait for serializing and deserializing messages
///
/// Used for envelopes on the wire and for typed request payloads. Codecs are
/// cloned into the reader and dispatcher tasks.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Encode a value into bytes
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode bytes into a value
    fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T>;
}
