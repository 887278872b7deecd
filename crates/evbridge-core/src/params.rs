//! Write parameters handed to mutating native calls.
//!
//! The native side reads them as a fixed 16-byte little-endian block:
//!
//! ```text
//! [0..4)   flags        bit 0 = use_generation
//! [4..8)   generation
//! [8..12)  expiration   seconds, 0 = namespace default
//! [12..16) policy       WritePolicy discriminant
//! ```

/// How the backend acknowledges a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum WritePolicy {
    #[default]
    Async = 0,
    Oneshot = 1,
    Retry = 2,
    Assured = 3,
}

impl WritePolicy {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Async),
            1 => Some(Self::Oneshot),
            2 => Some(Self::Retry),
            3 => Some(Self::Assured),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteParameters {
    pub use_generation: bool,
    pub generation: u32,
    pub expiration: u32,
    pub policy: WritePolicy,
}

impl WriteParameters {
    pub const ENCODED_LEN: usize = 16;

    /// Overwrite `buf` with the native layout.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.clear();
        buf.extend_from_slice(&(self.use_generation as u32).to_le_bytes());
        buf.extend_from_slice(&self.generation.to_le_bytes());
        buf.extend_from_slice(&self.expiration.to_le_bytes());
        buf.extend_from_slice(&(self.policy as u32).to_le_bytes());
    }

    /// Parse the native layout. An empty block means "no parameters".
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self {
            use_generation: word(0) & 1 != 0,
            generation: word(4),
            expiration: word(8),
            policy: WritePolicy::from_raw(word(12))?,
        })
    }
}
