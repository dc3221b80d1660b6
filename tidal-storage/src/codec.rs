//! Binary framing for persisted records.
//!
//! Every record stored by the partition processor uses the same frame:
//!
//! ```text
//! +----------+----------+----------+----------+
//! |  CRC32   |  Length  |   Kind   | Payload  |
//! | (4 bytes)| (4 bytes)| (1 byte) | (N bytes)|
//! +----------+----------+----------+----------+
//! ```
//!
//! - CRC32: checksum of Length + Kind + Payload (NOT including CRC itself)
//! - Length: payload length in bytes
//! - Kind: record discriminant, catches cross-type decodes
//! - Payload: record fields, little-endian, strings length-prefixed
//!
//! All integers are stored in little-endian format.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tidal_core::{Offset, PlanStep, TxId, TxKey};

use crate::error::{StorageError, StorageResult};

/// Size of the record frame header in bytes.
const FRAME_HEADER_SIZE: usize = 9; // 4 + 4 + 1

/// Maximum payload size of a single record.
const RECORD_PAYLOAD_BYTES_MAX: u32 = 64 * 1024;

/// Record discriminant stored in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Consumer checkpoint record.
    Checkpoint = 1,
    /// Partition tx-meta record.
    TxMeta = 2,
    /// Data-log bounds record.
    Bounds = 3,
}

impl RecordKind {
    fn from_u8(value: u8, key: &str) -> StorageResult<Self> {
        match value {
            1 => Ok(Self::Checkpoint),
            2 => Ok(Self::TxMeta),
            3 => Ok(Self::Bounds),
            _ => Err(StorageError::Corruption {
                key: key.to_string(),
                reason: "unknown record kind",
            }),
        }
    }
}

fn compute_crc(length: u32, kind: u8, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(&[kind]);
    hasher.update(payload);
    hasher.finalize()
}

/// Frames a payload with CRC, length and kind.
fn encode_frame(kind: RecordKind, payload: &[u8]) -> StorageResult<Bytes> {
    let length = payload.len();
    if length > RECORD_PAYLOAD_BYTES_MAX as usize {
        #[allow(clippy::cast_possible_truncation)] // Truncated value is fine for error reporting.
        return Err(StorageError::RecordTooLarge {
            size: length as u32,
            max: RECORD_PAYLOAD_BYTES_MAX,
        });
    }
    #[allow(clippy::cast_possible_truncation)]
    let length = length as u32;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32_le(compute_crc(length, kind as u8, payload));
    buf.put_u32_le(length);
    buf.put_u8(kind as u8);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Unframes a record, verifying CRC, length and kind.
fn decode_frame(expected: RecordKind, key: &str, mut buf: Bytes) -> StorageResult<Bytes> {
    if buf.remaining() < FRAME_HEADER_SIZE {
        return Err(StorageError::Corruption {
            key: key.to_string(),
            reason: "record shorter than frame header",
        });
    }

    let crc = buf.get_u32_le();
    let length = buf.get_u32_le();
    let kind = buf.get_u8();

    if buf.remaining() != length as usize {
        return Err(StorageError::Corruption {
            key: key.to_string(),
            reason: "payload length mismatch",
        });
    }
    if compute_crc(length, kind, &buf) != crc {
        return Err(StorageError::Corruption {
            key: key.to_string(),
            reason: "checksum mismatch",
        });
    }
    if RecordKind::from_u8(kind, key)? != expected {
        return Err(StorageError::Corruption {
            key: key.to_string(),
            reason: "record kind mismatch",
        });
    }
    Ok(buf)
}

fn put_string(buf: &mut BytesMut, value: &str) {
    #[allow(clippy::cast_possible_truncation)] // Bounded by RECORD_PAYLOAD_BYTES_MAX at framing.
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn get_string(buf: &mut Bytes, key: &str) -> StorageResult<String> {
    if buf.remaining() < 4 {
        return Err(StorageError::Corruption {
            key: key.to_string(),
            reason: "truncated string length",
        });
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(StorageError::Corruption {
            key: key.to_string(),
            reason: "truncated string body",
        });
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| StorageError::Corruption {
        key: key.to_string(),
        reason: "string is not valid UTF-8",
    })
}

fn get_u64(buf: &mut Bytes, key: &str) -> StorageResult<u64> {
    if buf.remaining() < 8 {
        return Err(StorageError::Corruption {
            key: key.to_string(),
            reason: "truncated integer field",
        });
    }
    Ok(buf.get_u64_le())
}

/// Persisted checkpoint state of one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// First unread log position.
    pub offset: Offset,
    /// Session fencing generation.
    pub generation: u64,
    /// Session fencing step.
    pub step: u64,
    /// Current exclusive reader session; empty if none.
    pub session: String,
    /// Total backward offset movement, carried through unchanged.
    pub offset_rewind_sum: u64,
    /// Read-rule generation, carried through unchanged.
    pub read_rule_generation: u64,
}

impl CheckpointRecord {
    /// Encodes the record into its framed binary form.
    ///
    /// # Errors
    /// Returns `RecordTooLarge` if the session string exceeds the record limit.
    pub fn encode(&self) -> StorageResult<Bytes> {
        let mut payload = BytesMut::with_capacity(48 + self.session.len());
        payload.put_u64_le(self.offset.get());
        payload.put_u64_le(self.generation);
        payload.put_u64_le(self.step);
        payload.put_u64_le(self.offset_rewind_sum);
        payload.put_u64_le(self.read_rule_generation);
        put_string(&mut payload, &self.session);
        encode_frame(RecordKind::Checkpoint, &payload)
    }

    /// Decodes a framed checkpoint record.
    ///
    /// # Errors
    /// Returns `Corruption` if the frame or payload is invalid.
    pub fn decode(key: &str, raw: Bytes) -> StorageResult<Self> {
        let mut payload = decode_frame(RecordKind::Checkpoint, key, raw)?;
        let offset = Offset::new(get_u64(&mut payload, key)?);
        let generation = get_u64(&mut payload, key)?;
        let step = get_u64(&mut payload, key)?;
        let offset_rewind_sum = get_u64(&mut payload, key)?;
        let read_rule_generation = get_u64(&mut payload, key)?;
        let session = get_string(&mut payload, key)?;
        Ok(Self {
            offset,
            generation,
            step,
            session,
            offset_rewind_sum,
            read_rule_generation,
        })
    }
}

/// Persisted ordering key of the last resolved transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxMetaRecord {
    /// `(plan_step, tx_id)` of the most recently resolved transaction.
    pub last_resolved: TxKey,
}

impl TxMetaRecord {
    /// Encodes the record into its framed binary form.
    ///
    /// # Errors
    /// Never fails in practice; the payload is fixed-size.
    pub fn encode(&self) -> StorageResult<Bytes> {
        let mut payload = BytesMut::with_capacity(16);
        payload.put_u64_le(self.last_resolved.plan_step.get());
        payload.put_u64_le(self.last_resolved.tx_id.get());
        encode_frame(RecordKind::TxMeta, &payload)
    }

    /// Decodes a framed tx-meta record.
    ///
    /// # Errors
    /// Returns `Corruption` if the frame or payload is invalid.
    pub fn decode(key: &str, raw: Bytes) -> StorageResult<Self> {
        let mut payload = decode_frame(RecordKind::TxMeta, key, raw)?;
        let plan_step = PlanStep::new(get_u64(&mut payload, key)?);
        let tx_id = TxId::new(get_u64(&mut payload, key)?);
        Ok(Self {
            last_resolved: TxKey::new(plan_step, tx_id),
        })
    }
}

/// Persisted begin/end bounds of the partition's data log.
///
/// Written by the data-plane collaborator; this crate only decodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundsRecord {
    /// First valid log position.
    pub begin: Offset,
    /// Position one past the last appended record.
    pub end: Offset,
}

impl BoundsRecord {
    /// Encodes the record into its framed binary form.
    ///
    /// # Errors
    /// Never fails in practice; the payload is fixed-size.
    pub fn encode(&self) -> StorageResult<Bytes> {
        let mut payload = BytesMut::with_capacity(16);
        payload.put_u64_le(self.begin.get());
        payload.put_u64_le(self.end.get());
        encode_frame(RecordKind::Bounds, &payload)
    }

    /// Decodes a framed bounds record.
    ///
    /// # Errors
    /// Returns `Corruption` if the frame or payload is invalid, or if
    /// `begin > end`.
    pub fn decode(key: &str, raw: Bytes) -> StorageResult<Self> {
        let mut payload = decode_frame(RecordKind::Bounds, key, raw)?;
        let begin = Offset::new(get_u64(&mut payload, key)?);
        let end = Offset::new(get_u64(&mut payload, key)?);
        if begin > end {
            return Err(StorageError::Corruption {
                key: key.to_string(),
                reason: "bounds begin exceeds end",
            });
        }
        Ok(Self { begin, end })
    }
}
