//! Binary frame codec
//!
//! Frame = length prefix (4 bytes LE) + body. Body layout, all integers LE:
//! - Byte 0: Wire version
//! - Byte 1: Flags (bit 0 = full)
//! - u32 subscribe count, then per entry:
//!   u16 topic length, topic (UTF-8), i32 priority, u8 cancel
//! - u32 publish count, then per entry:
//!   u16 topic length, topic, u16 value length (32), value, i32 priority, u8 cancel
//! - u32 block count, then per block: u32 length, data

use bytes::{Buf, BufMut, Bytes, BytesMut};

use pubswap_core::{
    Block, ContentKey, Delta, Entry, Publication, PubswapError, PubswapResult, Topic,
    CONTENT_KEY_SIZE, MAX_TOPIC_LEN,
};

use crate::WireMessage;

/// Length prefix size in bytes
pub const LEN_PREFIX_SIZE: usize = 4;

/// Maximum body size accepted or produced
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Current wire version
pub const WIRE_VERSION: u8 = 1;

/// Flag bit: message is a full snapshot
pub const FLAG_FULL: u8 = 0x01;

const BODY_HEADER_SIZE: usize = 2;
const COUNT_SIZE: usize = 4;
// u16 len + i32 priority + u8 cancel
const MIN_SUB_ENTRY_SIZE: usize = 2 + 4 + 1;
// topic len + value len + value + priority + cancel
const MIN_PUB_ENTRY_SIZE: usize = 2 + 2 + CONTENT_KEY_SIZE + 4 + 1;
const MIN_BLOCK_SIZE: usize = 4;

impl WireMessage {
    /// Size of the encoded body (without length prefix)
    pub fn encoded_len(&self) -> PubswapResult<usize> {
        let mut len = BODY_HEADER_SIZE + COUNT_SIZE * 3;

        for topic in self.subscribe_section().keys() {
            len += MIN_SUB_ENTRY_SIZE + checked_topic_len(topic)?;
        }
        for publication in self.publish_section().keys() {
            len += MIN_PUB_ENTRY_SIZE + checked_topic_len(&publication.topic)?;
        }
        for block in self.block_section().values() {
            len += MIN_BLOCK_SIZE + block.len();
        }

        Ok(len)
    }

    /// Encode into a single length-prefixed frame
    pub fn encode(&self) -> PubswapResult<Bytes> {
        let body_len = self.encoded_len()?;
        if body_len > MAX_MESSAGE_SIZE {
            return Err(PubswapError::FrameTooLarge {
                size: body_len,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + body_len);
        buf.put_u32_le(body_len as u32);
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(if self.is_full() { FLAG_FULL } else { 0 });

        let subs = self.subscribe_section();
        buf.put_u32_le(subs.len() as u32);
        for delta in subs.values() {
            put_topic(&mut buf, delta.identity());
            buf.put_i32_le(delta.priority());
            buf.put_u8(delta.is_cancel() as u8);
        }

        let pubs = self.publish_section();
        buf.put_u32_le(pubs.len() as u32);
        for delta in pubs.values() {
            let publication = delta.identity();
            put_topic(&mut buf, &publication.topic);
            buf.put_u16_le(CONTENT_KEY_SIZE as u16);
            buf.put_slice(publication.value.as_bytes());
            buf.put_i32_le(delta.priority());
            buf.put_u8(delta.is_cancel() as u8);
        }

        let blocks = self.block_section();
        buf.put_u32_le(blocks.len() as u32);
        for block in blocks.values() {
            buf.put_u32_le(block.len() as u32);
            buf.put_slice(block.data());
        }

        debug_assert_eq!(buf.len(), LEN_PREFIX_SIZE + body_len);
        Ok(buf.freeze())
    }

    /// Decode exactly one complete frame; trailing bytes are an error
    pub fn decode(frame: &[u8]) -> PubswapResult<Self> {
        match Self::decode_frame(frame)? {
            Some((msg, used)) if used == frame.len() => Ok(msg),
            Some((_, used)) => Err(PubswapError::malformed(format!(
                "{} trailing bytes after frame",
                frame.len() - used
            ))),
            None => Err(PubswapError::malformed("truncated frame")),
        }
    }

    /// Decode the frame at the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the message
    /// and the number of bytes consumed.
    pub fn decode_frame(buf: &[u8]) -> PubswapResult<Option<(Self, usize)>> {
        let Some(body_len) = peek_frame_len(buf)? else {
            return Ok(None);
        };
        if buf.len() < LEN_PREFIX_SIZE + body_len {
            return Ok(None);
        }

        let body = &buf[LEN_PREFIX_SIZE..LEN_PREFIX_SIZE + body_len];
        let msg = Self::decode_body(body)?;
        Ok(Some((msg, LEN_PREFIX_SIZE + body_len)))
    }

    /// Decode a body without its length prefix
    pub fn decode_body(mut body: &[u8]) -> PubswapResult<Self> {
        let buf = &mut body;

        let version = take_u8(buf, "version")?;
        if version != WIRE_VERSION {
            return Err(PubswapError::malformed(format!(
                "unsupported wire version {}",
                version
            )));
        }
        let flags = take_u8(buf, "flags")?;
        if flags & !FLAG_FULL != 0 {
            return Err(PubswapError::malformed(format!("unknown flags {:#04x}", flags)));
        }

        let mut msg = WireMessage::new(flags & FLAG_FULL != 0);

        let count = take_count(buf, MIN_SUB_ENTRY_SIZE, "subscribe")?;
        for _ in 0..count {
            let topic = take_topic(buf)?;
            let priority = take_i32(buf, "subscribe priority")?;
            let cancel = take_bool(buf, "subscribe cancel")?;
            msg.insert_decoded(Delta {
                entry: Entry::new(topic, priority),
                cancel,
            });
        }

        let count = take_count(buf, MIN_PUB_ENTRY_SIZE, "publish")?;
        for _ in 0..count {
            let topic = take_topic(buf)?;
            let value_len = take_u16(buf, "value length")? as usize;
            if value_len != CONTENT_KEY_SIZE {
                return Err(PubswapError::malformed(format!(
                    "content key of {} bytes",
                    value_len
                )));
            }
            need(buf, CONTENT_KEY_SIZE, "value")?;
            let value = ContentKey::from_slice(&buf[..CONTENT_KEY_SIZE])
                .map_err(|e| PubswapError::malformed(e.to_string()))?;
            buf.advance(CONTENT_KEY_SIZE);
            let priority = take_i32(buf, "publish priority")?;
            let cancel = take_bool(buf, "publish cancel")?;
            msg.insert_decoded(Delta {
                entry: Entry::new(Publication { topic, value }, priority),
                cancel,
            });
        }

        let count = take_count(buf, MIN_BLOCK_SIZE, "block")?;
        for _ in 0..count {
            let len = take_u32(buf, "block length")? as usize;
            need(buf, len, "block data")?;
            let data = Bytes::copy_from_slice(&buf[..len]);
            buf.advance(len);
            msg.add_block(Block::new(data));
        }

        if buf.has_remaining() {
            return Err(PubswapError::malformed(format!(
                "{} unparsed bytes in body",
                buf.remaining()
            )));
        }

        Ok(msg)
    }
}

/// Read the body length of the frame at the front of `buf`
pub fn peek_frame_len(buf: &[u8]) -> PubswapResult<Option<usize>> {
    if buf.len() < LEN_PREFIX_SIZE {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(PubswapError::FrameTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(Some(len))
}

fn checked_topic_len(topic: &Topic) -> PubswapResult<usize> {
    if topic.len() > MAX_TOPIC_LEN {
        return Err(PubswapError::InvalidKeyEncoding(format!(
            "topic of {} bytes exceeds {}",
            topic.len(),
            MAX_TOPIC_LEN
        )));
    }
    Ok(topic.len())
}

fn put_topic(buf: &mut BytesMut, topic: &Topic) {
    buf.put_u16_le(topic.len() as u16);
    buf.put_slice(topic.as_str().as_bytes());
}

#[inline]
fn need(buf: &&[u8], n: usize, what: &str) -> PubswapResult<()> {
    if buf.remaining() < n {
        return Err(PubswapError::malformed(format!(
            "truncated {}: need {}, have {}",
            what,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn take_u8(buf: &mut &[u8], what: &str) -> PubswapResult<u8> {
    need(buf, 1, what)?;
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8], what: &str) -> PubswapResult<u16> {
    need(buf, 2, what)?;
    Ok(buf.get_u16_le())
}

fn take_u32(buf: &mut &[u8], what: &str) -> PubswapResult<u32> {
    need(buf, 4, what)?;
    Ok(buf.get_u32_le())
}

fn take_i32(buf: &mut &[u8], what: &str) -> PubswapResult<i32> {
    need(buf, 4, what)?;
    Ok(buf.get_i32_le())
}

fn take_bool(buf: &mut &[u8], what: &str) -> PubswapResult<bool> {
    match take_u8(buf, what)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(PubswapError::malformed(format!(
            "{} byte {} is not a bool",
            what, other
        ))),
    }
}

/// Read a count and reject it early if the rest of the body cannot hold it
fn take_count(buf: &mut &[u8], min_item: usize, what: &str) -> PubswapResult<usize> {
    let count = take_u32(buf, what)? as usize;
    if count.saturating_mul(min_item) > buf.remaining() {
        return Err(PubswapError::malformed(format!(
            "{} count {} exceeds body",
            what, count
        )));
    }
    Ok(count)
}

fn take_topic(buf: &mut &[u8]) -> PubswapResult<Topic> {
    let len = take_u16(buf, "topic length")? as usize;
    need(buf, len, "topic")?;
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| PubswapError::malformed("topic is not UTF-8"))?
        .to_owned();
    buf.advance(len);
    Ok(Topic::from(s))
}
