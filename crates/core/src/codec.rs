//! Argument and result codec contracts
//!
//! The call core never looks inside arguments or results. A context carries
//! one [`CallArgs`] and one [`CallResults`] and threads them through to the
//! point where the call message is assembled and the reply is decoded.
//!
//! Provided implementations:
//! - `()`: void arguments / ignored results
//! - `Vec<u8>`: raw argument bytes
//! - [`RawResults`]: captures raw reply bytes
//! - [`JsonArgs`] / [`JsonResults`]: serde-JSON adapters

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes call arguments into a message body
pub trait CallArgs: Send + Sync {
    /// Append the encoded arguments to `out`
    fn encode(&self, out: &mut Vec<u8>) -> Result<()>;
}

/// Decodes a reply body into caller-owned storage
pub trait CallResults: Send + Sync {
    /// Decode `input` and store the result
    fn decode(&self, input: &[u8]) -> Result<()>;
}

impl CallArgs for () {
    fn encode(&self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

impl CallResults for () {
    fn decode(&self, _input: &[u8]) -> Result<()> {
        Ok(())
    }
}

impl CallArgs for Vec<u8> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(self);
        Ok(())
    }
}

/// Captures the raw reply body
#[derive(Debug, Default)]
pub struct RawResults {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl RawResults {
    /// Empty result slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the decoded bytes, if a reply was decoded
    pub fn take(&self) -> Option<Vec<u8>> {
        self.bytes.lock().take()
    }
}

impl CallResults for RawResults {
    fn decode(&self, input: &[u8]) -> Result<()> {
        *self.bytes.lock() = Some(input.to_vec());
        Ok(())
    }
}

/// Serializes a value as JSON arguments
#[derive(Debug, Clone)]
pub struct JsonArgs<T>(pub T);

impl<T: Serialize + Send + Sync> CallArgs for JsonArgs<T> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        serde_json::to_writer(out, &self.0)?;
        Ok(())
    }
}

/// Deserializes a JSON reply body
#[derive(Debug)]
pub struct JsonResults<T> {
    value: Mutex<Option<T>>,
}

impl<T> Default for JsonResults<T> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

impl<T> JsonResults<T> {
    /// Empty result slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the decoded value, if a reply was decoded
    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }
}

impl<T: DeserializeOwned + Send> CallResults for JsonResults<T> {
    fn decode(&self, input: &[u8]) -> Result<()> {
        let value: T = serde_json::from_slice(input)
            .map_err(|e| Error::Codec(format!("reply body: {}", e)))?;
        *self.value.lock() = Some(value);
        Ok(())
    }
}
