//! Service and method identity.
//!
//! pw_rpc identifies services and methods by a 65599-coefficient hash of
//! their fully-qualified names; both ends derive the 32-bit ids from the
//! same strings, so the function must stay bit-exact with the reference
//! implementation.

use super::RpcError;

const HASH_COEFFICIENT: u32 = 65599;

/// 32-bit pw_rpc name hash.
///
/// Seeded with the byte length of the string, then folds in each code
/// point scaled by a running power of 65599, wrapping modulo 2^32.
///
/// # Arguments
///
/// * `s` - The fully-qualified service name or bare method name.
///
/// # Returns
///
/// The id both ends derive for that name.
pub fn hash(s: &str) -> u32 {
    let mut hash = s.len() as u32;
    let mut coefficient = HASH_COEFFICIENT;
    for ch in s.chars() {
        hash = hash.wrapping_add(coefficient.wrapping_mul(ch as u32));
        coefficient = coefficient.wrapping_mul(HASH_COEFFICIENT);
    }
    hash
}

/// Identity of one logical call: the service and method name hashes.
///
/// At most one call per key is live on a connection at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub service_id: u32,
    pub method_id: u32,
}

impl StreamKey {
    /// Derives the key from a service and method name pair.
    ///
    /// # Arguments
    ///
    /// * `service_name` - Fully-qualified service name, e.g.
    ///   `"pw.rpc.Benchmark"`.
    /// * `method_name` - Bare method name, e.g. `"UnaryEcho"`.
    pub fn new(service_name: &str, method_name: &str) -> Self {
        Self {
            service_id: hash(service_name),
            method_id: hash(method_name),
        }
    }

    pub const fn from_ids(service_id: u32, method_id: u32) -> Self {
        Self { service_id, method_id }
    }

    /// Parses a full method name of the form `/Service/Method`, hashing the
    /// service and method parts independently.
    ///
    /// # Arguments
    ///
    /// * `method` - Full method name: empty leading part, service, method.
    ///
    /// # Returns
    ///
    /// The call key, or [`RpcError::InvalidMethodName`] when the name does
    /// not split into exactly those three parts.
    pub fn for_method(method: &str) -> Result<Self, RpcError> {
        let parts: Vec<&str> = method.split('/').collect();
        match parts.as_slice() {
            ["", service_name, method_name] => Ok(Self::new(service_name, method_name)),
            _ => Err(RpcError::InvalidMethodName(method.to_string())),
        }
    }
}
