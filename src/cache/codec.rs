//! Binary framing for the emergency cache file.
//!
//! Format:
//! ```text
//! [magic: 4 bytes "RCFG"][version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying a regconf cache file.
pub const MAGIC: [u8; 4] = *b"RCFG";

/// Rejects cache payloads larger than 64 MB.
const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

/// Writes `value` with header, length prefix and checksum.
pub fn encode<T: Serialize>(value: &T, writer: &mut impl Write) -> IoResult<()> {
    let data = serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    if data.len() > MAX_PAYLOAD_SIZE {
        return Err(invalid(format!(
            "payload size {} exceeds maximum {MAX_PAYLOAD_SIZE}",
            data.len()
        )));
    }

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;

    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&data)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Reads a value written by `encode`, verifying header and checksum.
///
/// # Errors
/// `ErrorKind::InvalidData` for a bad header, version, size or checksum;
/// `ErrorKind::UnexpectedEof` for a truncated file.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid(format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}")));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(invalid(format!(
            "unsupported codec version: {} (expected {CODEC_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(invalid(format!("payload size {len} exceeds maximum {MAX_PAYLOAD_SIZE}")));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();

    if stored_crc != computed_crc {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"
        )));
    }

    serde_json::from_slice(&data).map_err(|e| invalid(format!("deserialization failed: {e}")))
}
