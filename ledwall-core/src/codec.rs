//! Binary wire format for the LED stream.
//!
//! Snapshot frame (device → client), one 11-byte record per LED in index
//! order, no index field:
//! ```text
//! ┌─────┬───────┬──────┬──────────────────────────────┐
//! │ red │ green │ blue │ timestamp (u64 BE, seconds)  │
//! │ 1 B │ 1 B   │ 1 B  │ 8 B                          │
//! └─────┴───────┴──────┴──────────────────────────────┘
//! ```
//!
//! Update frame (client → device), exactly 5 bytes:
//! ```text
//! ┌────────────────────┬─────┬───────┬──────┐
//! │ index (u16 BE)     │ red │ green │ blue │
//! │ 2 B                │ 1 B │ 1 B   │ 1 B  │
//! └────────────────────┴─────┴───────┴──────┘
//! ```
//!
//! Keepalive travels out of band as the text frames `"ping"` / `"pong"`.

use chrono::DateTime;
use thiserror::Error;

use crate::clock::Timestamp;
use crate::color::Color;

pub const SNAPSHOT_RECORD_LEN: usize = 11;
pub const UPDATE_FRAME_LEN: usize = 5;
pub const MAX_INDEX: usize = u16::MAX as usize;

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed frame: {len} bytes is not a positive multiple of {record_len}")]
    MalformedFrame { len: usize, record_len: usize },
    #[error("LED index {0} does not fit in 16 bits")]
    IndexOutOfRange(usize),
    #[error("Timestamp {0} is outside the representable range")]
    TimestampOutOfRange(u64),
}

/// One LED as carried by a snapshot frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub color: Color,
    pub timestamp: Timestamp,
}

impl SnapshotEntry {
    pub fn new(color: Color, timestamp: Timestamp) -> Self {
        Self { color, timestamp }
    }
}

/// A request to change one LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateFrame {
    pub index: u16,
    pub color: Color,
}

/// Out-of-band text frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keepalive {
    Ping,
    Pong,
}

impl Keepalive {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            PING => Some(Self::Ping),
            PONG => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => PING,
            Self::Pong => PONG,
        }
    }
}

/// Decode a snapshot frame. Partial trailing records reject the whole frame.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<SnapshotEntry>, CodecError> {
    if bytes.is_empty() || bytes.len() % SNAPSHOT_RECORD_LEN != 0 {
        return Err(CodecError::MalformedFrame {
            len: bytes.len(),
            record_len: SNAPSHOT_RECORD_LEN,
        });
    }

    bytes
        .chunks_exact(SNAPSHOT_RECORD_LEN)
        .map(|record| {
            let color = Color::rgb(record[0], record[1], record[2]);
            let mut secs = [0u8; 8];
            secs.copy_from_slice(&record[3..SNAPSHOT_RECORD_LEN]);
            let secs = u64::from_be_bytes(secs);
            let timestamp = i64::try_from(secs)
                .ok()
                .and_then(|s| DateTime::from_timestamp(s, 0))
                .ok_or(CodecError::TimestampOutOfRange(secs))?;
            Ok(SnapshotEntry { color, timestamp })
        })
        .collect()
}

/// Encode a snapshot frame. Sub-second precision is dropped and pre-epoch
/// timestamps are sent as zero.
pub fn encode_snapshot<'a>(entries: impl IntoIterator<Item = &'a SnapshotEntry>) -> Vec<u8> {
    let entries = entries.into_iter();
    let mut out = Vec::with_capacity(entries.size_hint().0 * SNAPSHOT_RECORD_LEN);
    for entry in entries {
        let secs = u64::try_from(entry.timestamp.timestamp()).unwrap_or(0);
        out.extend_from_slice(&<[u8; 3]>::from(entry.color));
        out.extend_from_slice(&secs.to_be_bytes());
    }
    out
}

/// Encode a 5-byte update frame: big-endian `u16` index, then RGB.
/// Indices past [`MAX_INDEX`] fail with [`CodecError::IndexOutOfRange`].
pub fn encode_update(index: usize, color: Color) -> Result<[u8; UPDATE_FRAME_LEN], CodecError> {
    let index = u16::try_from(index).map_err(|_| CodecError::IndexOutOfRange(index))?;
    let [high, low] = index.to_be_bytes();
    let [red, green, blue] = <[u8; 3]>::from(color);
    Ok([high, low, red, green, blue])
}

/// Decode an update frame. Anything but exactly 5 bytes is malformed.
pub fn decode_update(bytes: &[u8]) -> Result<UpdateFrame, CodecError> {
    let frame: [u8; UPDATE_FRAME_LEN] =
        bytes.try_into().map_err(|_| CodecError::MalformedFrame {
            len: bytes.len(),
            record_len: UPDATE_FRAME_LEN,
        })?;
    Ok(UpdateFrame {
        index: u16::from_be_bytes([frame[0], frame[1]]),
        color: Color::rgb(frame[2], frame[3], frame[4]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> Timestamp {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn record(rgb: [u8; 3], secs: u64) -> Vec<u8> {
        let mut out = rgb.to_vec();
        out.extend_from_slice(&secs.to_be_bytes());
        out
    }

    #[test]
    fn test_decode_two_led_snapshot() {
        let mut bytes = record([255, 0, 0], 1_700_000_000);
        bytes.extend(record([0, 0, 255], 1_700_000_005));
        assert_eq!(bytes.len(), 22);

        let entries = decode_snapshot(&bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].color, Color::rgb(255, 0, 0));
        assert_eq!(entries[0].timestamp, at(1_700_000_000));
        assert_eq!(entries[1].color, Color::rgb(0, 0, 255));
        assert_eq!(entries[1].timestamp, at(1_700_000_005));
    }

    #[test]
    fn test_decode_rejects_trailing_partial_record() {
        let mut bytes = record([1, 2, 3], 10);
        bytes.extend(record([4, 5, 6], 20));
        bytes.push(0);
        assert_eq!(bytes.len(), 23);
        assert_eq!(
            decode_snapshot(&bytes),
            Err(CodecError::MalformedFrame { len: 23, record_len: 11 })
        );
    }

    #[test]
    fn test_decode_rejects_every_misaligned_length() {
        for k in 0..4 {
            for extra in 1..SNAPSHOT_RECORD_LEN {
                let bytes = vec![0u8; k * SNAPSHOT_RECORD_LEN + extra];
                assert!(
                    matches!(decode_snapshot(&bytes), Err(CodecError::MalformedFrame { .. })),
                    "length {} should be rejected",
                    bytes.len()
                );
            }
        }
    }

    #[test]
    fn test_decode_rejects_empty_frame() {
        assert!(matches!(
            decode_snapshot(&[]),
            Err(CodecError::MalformedFrame { len: 0, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unrepresentable_timestamp() {
        let bytes = record([0, 0, 0], u64::MAX);
        assert_eq!(
            decode_snapshot(&bytes),
            Err(CodecError::TimestampOutOfRange(u64::MAX))
        );
    }

    #[test]
    fn test_timestamp_is_big_endian_seconds() {
        let entries = [SnapshotEntry::new(Color::rgb(0xaa, 0xbb, 0xcc), at(0x0102_0304))];
        let bytes = encode_snapshot(&entries);
        assert_eq!(
            bytes,
            vec![0xaa, 0xbb, 0xcc, 0, 0, 0, 0, 0x01, 0x02, 0x03, 0x04]
        );
        assert_eq!(decode_snapshot(&bytes).unwrap(), entries);
    }

    #[test]
    fn test_encode_snapshot_drops_subsecond_precision() {
        let ts = DateTime::from_timestamp(42, 900_000_000).unwrap();
        let bytes = encode_snapshot(&[SnapshotEntry::new(Color::WHITE, ts)]);
        assert_eq!(decode_snapshot(&bytes).unwrap()[0].timestamp, at(42));
    }

    #[test]
    fn test_encode_update_layout() {
        let frame = encode_update(1, Color::rgb(255, 0, 0)).unwrap();
        assert_eq!(frame, [0x00, 0x01, 0xff, 0x00, 0x00]);

        let frame = encode_update(0x1234, Color::rgb(1, 2, 3)).unwrap();
        assert_eq!(frame, [0x12, 0x34, 1, 2, 3]);
    }

    #[test]
    fn test_encode_update_recovers_index_and_color() {
        for index in [0usize, 1, 255, 256, 4095, 65_534, MAX_INDEX] {
            let color = Color::rgb((index % 251) as u8, 17, 200);
            let frame = encode_update(index, color).unwrap();
            let parsed_index = u16::from_be_bytes([frame[0], frame[1]]) as usize;
            assert_eq!(parsed_index, index);
            assert_eq!((frame[2], frame[3], frame[4]), color.to_rgb());
        }
    }

    #[test]
    fn test_encode_update_index_out_of_range() {
        assert_eq!(
            encode_update(MAX_INDEX + 1, Color::BLACK),
            Err(CodecError::IndexOutOfRange(65_536))
        );
    }

    #[test]
    fn test_decode_update() {
        let frame = decode_update(&[0x00, 0x07, 10, 20, 30]).unwrap();
        assert_eq!(frame.index, 7);
        assert_eq!(frame.color, Color::rgb(10, 20, 30));

        assert!(decode_update(&[0, 1, 2, 3]).is_err());
        assert!(decode_update(&[0, 1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_keepalive_parse() {
        assert_eq!(Keepalive::parse("ping"), Some(Keepalive::Ping));
        assert_eq!(Keepalive::parse("pong"), Some(Keepalive::Pong));
        assert_eq!(Keepalive::parse("PONG"), None);
        assert_eq!(Keepalive::Ping.as_str(), PING);
    }
}
