use std::io::{Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// Bytes occupied by the envelope's size prefix, id and timestamp.
const ENVELOPE_HEADER_SIZE: u32 = 4 + 8 + 8;

/// One event as carried on the wire: an id, a wall-clock timestamp and an
/// opaque payload.
///
/// The stream encoding is big-endian: a u32 size counting itself, the u64 id,
/// the timestamp as signed unix nanoseconds, then the payload. The log itself
/// never interprets payloads; this envelope is what producers and consumers
/// layer on top of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: u64,
    pub timestamp: SystemTime,
    pub data: Vec<u8>,
}

impl Event {
    pub fn new(id: u64, timestamp: SystemTime, data: Vec<u8>) -> Self {
        Self {
            id,
            timestamp,
            data,
        }
    }

    /// Writes the encoded event to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let size = u32::try_from(self.data.len())
            .ok()
            .and_then(|len| len.checked_add(ENVELOPE_HEADER_SIZE))
            .ok_or(Error::Unsupported("event data too large for envelope"))?;
        writer.write_all(&size.to_be_bytes())?;
        writer.write_all(&self.id.to_be_bytes())?;
        writer.write_all(&unix_nanos(self.timestamp)?.to_be_bytes())?;
        writer.write_all(&self.data)?;
        Ok(())
    }

    /// Reads one encoded event from `reader`.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut size_buf = [0u8; 4];
        reader.read_exact(&mut size_buf)?;
        let size = u32::from_be_bytes(size_buf);
        if size < ENVELOPE_HEADER_SIZE {
            return Err(Error::CorruptEnvelope("size below envelope header"));
        }

        let mut field = [0u8; 8];
        reader.read_exact(&mut field)?;
        let id = u64::from_be_bytes(field);
        reader.read_exact(&mut field)?;
        let nanos = i64::from_be_bytes(field);

        let mut data = vec![0u8; (size - ENVELOPE_HEADER_SIZE) as usize];
        reader.read_exact(&mut data)?;

        Ok(Self {
            id,
            timestamp: from_unix_nanos(nanos),
            data,
        })
    }
}

fn unix_nanos(timestamp: SystemTime) -> Result<i64> {
    match timestamp.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_nanos())
            .map_err(|_| Error::Unsupported("timestamp exceeds envelope range")),
        Err(err) => i64::try_from(err.duration().as_nanos())
            .map(|nanos| -nanos)
            .map_err(|_| Error::Unsupported("timestamp exceeds envelope range")),
    }
}

fn from_unix_nanos(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}
