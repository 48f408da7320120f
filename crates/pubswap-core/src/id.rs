//! Identity types for pubswap
//!
//! Peers are 64-bit ids, topics are opaque strings and content keys are
//! SHA-256 digests rendered as lowercase hex.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::{PubswapError, PubswapResult};

/// Remote peer identity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PeerId(pub u64);

impl PeerId {
    pub const ZERO: PeerId = PeerId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        PeerId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        PeerId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({:016x})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Longest topic the wire format can carry
pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// Named interest channel
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Topic(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that the topic can be announced: non-empty and at most
    /// `MAX_TOPIC_LEN` bytes
    pub fn validate(&self) -> PubswapResult<()> {
        if self.0.is_empty() {
            return Err(PubswapError::InvalidKeyEncoding("empty topic".into()));
        }
        if self.0.len() > MAX_TOPIC_LEN {
            return Err(PubswapError::InvalidKeyEncoding(format!(
                "topic of {} bytes exceeds {}",
                self.0.len(),
                MAX_TOPIC_LEN
            )));
        }
        Ok(())
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Topic(s.to_owned())
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Topic(s)
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({:?})", self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content key size in bytes (SHA-256)
pub const CONTENT_KEY_SIZE: usize = 32;

/// Content-addressed identifier for a block of data
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContentKey(pub [u8; CONTENT_KEY_SIZE]);

impl ContentKey {
    #[inline]
    pub fn new(bytes: [u8; CONTENT_KEY_SIZE]) -> Self {
        ContentKey(bytes)
    }

    /// Key of a block: SHA-256 of its data
    pub fn for_data(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; CONTENT_KEY_SIZE];
        out.copy_from_slice(&digest);
        ContentKey(out)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; CONTENT_KEY_SIZE] {
        &self.0
    }

    /// Build from a raw slice; the slice must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> PubswapResult<Self> {
        let arr: [u8; CONTENT_KEY_SIZE] = bytes.try_into().map_err(|_| {
            PubswapError::InvalidKeyEncoding(format!(
                "expected {} bytes, got {}",
                CONTENT_KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(ContentKey(arr))
    }

    /// Parse the lowercase or uppercase hex form
    pub fn from_hex(s: &str) -> PubswapResult<Self> {
        let s = s.trim();
        if s.len() != CONTENT_KEY_SIZE * 2 || !s.is_ascii() {
            return Err(PubswapError::InvalidKeyEncoding(s.to_owned()));
        }

        let mut out = [0u8; CONTENT_KEY_SIZE];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| PubswapError::InvalidKeyEncoding(s.to_owned()))?;
        }
        Ok(ContentKey(out))
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(CONTENT_KEY_SIZE * 2);
        for b in self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form, enough to tell keys apart in logs
        write!(
            f,
            "Key({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Publication identity: a content key announced under a topic
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Publication {
    pub topic: Topic,
    pub value: ContentKey,
}

impl Publication {
    pub fn new(topic: impl Into<Topic>, value: ContentKey) -> Self {
        Publication {
            topic: topic.into(),
            value,
        }
    }
}

impl fmt::Display for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.topic, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_roundtrip() {
        let id = PeerId::new(0xDEADBEEF_CAFEBABE);
        let recovered = PeerId::from_bytes(id.to_bytes());
        assert_eq!(id, recovered);
        assert_eq!(id.to_string(), "deadbeefcafebabe");
    }

    #[test]
    fn test_content_key_hex() {
        let key = ContentKey::for_data(b"hello");
        let hex = key.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentKey::from_hex(&hex).unwrap(), key);
        assert_eq!(ContentKey::from_hex(&hex.to_uppercase()).unwrap(), key);
    }

    #[test]
    fn test_content_key_rejects_bad_hex() {
        assert!(matches!(
            ContentKey::from_hex("abc"),
            Err(PubswapError::InvalidKeyEncoding(_))
        ));
        let bad = "zz".repeat(CONTENT_KEY_SIZE);
        assert!(matches!(
            ContentKey::from_hex(&bad),
            Err(PubswapError::InvalidKeyEncoding(_))
        ));
        // Multi-byte characters must not cause a slicing panic
        let wide = "é".repeat(CONTENT_KEY_SIZE);
        assert!(ContentKey::from_hex(&wide).is_err());
    }

    #[test]
    fn test_topic_validate() {
        assert!(Topic::from("news").validate().is_ok());
        assert!(Topic::from("t".repeat(MAX_TOPIC_LEN)).validate().is_ok());
        assert!(matches!(
            Topic::from("").validate(),
            Err(PubswapError::InvalidKeyEncoding(_))
        ));
        assert!(matches!(
            Topic::from("t".repeat(MAX_TOPIC_LEN + 1)).validate(),
            Err(PubswapError::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn test_content_key_from_slice() {
        assert!(ContentKey::from_slice(&[0u8; 31]).is_err());
        assert_eq!(
            ContentKey::from_slice(&[7u8; 32]).unwrap(),
            ContentKey::new([7u8; 32])
        );
    }

    #[test]
    fn test_publication_ordering() {
        let a = Publication::new("a", ContentKey::new([2; 32]));
        let b = Publication::new("b", ContentKey::new([1; 32]));
        assert!(a < b);
    }
}
