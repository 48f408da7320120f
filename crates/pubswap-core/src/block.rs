//! Content blocks

use bytes::Bytes;

use crate::ContentKey;

/// Raw content payload, keyed by the hash of its data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    key: ContentKey,
    data: Bytes,
}

impl Block {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Block {
            key: ContentKey::for_data(&data),
            data,
        }
    }

    #[inline]
    pub fn key(&self) -> ContentKey {
        self.key
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_key_is_content_hash() {
        let a = Block::new(Bytes::from_static(b"payload"));
        let b = Block::new(b"payload".to_vec());
        assert_eq!(a.key(), b.key());
        assert_eq!(a.len(), 7);
        assert_ne!(a.key(), Block::new(Bytes::from_static(b"other")).key());
    }
}
