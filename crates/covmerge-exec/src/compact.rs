//! Primitive encodings shared by every block: big-endian integers, variable
//! length ints, packed boolean arrays and Java's modified UTF-8.

use std::io::{self, Read};

use crate::error::ExecError;

const MAX_UTF_BYTES: usize = u16::MAX as usize;
const MAX_ARRAY_LEN: u32 = i32::MAX as u32;
const INITIAL_PROBE_CAPACITY: usize = 4096;

/// Reads a single byte, returning `None` on a clean end of stream.
pub(crate) fn read_block_type<R: Read>(input: &mut R) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match input.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

pub(crate) fn read_u8<R: Read>(input: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(input: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

pub(crate) fn read_i64<R: Read>(input: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

pub(crate) fn read_bool<R: Read>(input: &mut R) -> io::Result<bool> {
    Ok(read_u8(input)? != 0)
}

pub(crate) fn put_var_int(out: &mut Vec<u8>, mut value: u32) {
    while value & 0xFFFF_FF80 != 0 {
        out.push(0x80 | (value & 0x7F) as u8);
        value >>= 7;
    }
    out.push(value as u8);
}

pub(crate) fn read_var_int<R: Read>(input: &mut R) -> Result<u32, ExecError> {
    let mut value: u32 = 0;
    let mut shift = 0u32;
    loop {
        let byte = read_u8(input)?;
        if shift > 28 {
            return Err(ExecError::Malformed("variable length int overflows".into()));
        }
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Probe arrays are packed LSB-first, eight probes per byte.
pub(crate) fn put_bool_array(out: &mut Vec<u8>, values: &[bool]) -> Result<(), ExecError> {
    let len = u32::try_from(values.len())
        .ok()
        .filter(|len| *len <= MAX_ARRAY_LEN)
        .ok_or_else(|| ExecError::Malformed(format!("probe array too long: {}", values.len())))?;
    put_var_int(out, len);

    for chunk in values.chunks(8) {
        let packed = chunk
            .iter()
            .enumerate()
            .filter(|(_, hit)| **hit)
            .fold(0u8, |acc, (bit, _)| acc | (1 << bit));
        out.push(packed);
    }
    Ok(())
}

pub(crate) fn read_bool_array<R: Read>(input: &mut R) -> Result<Vec<bool>, ExecError> {
    let len = read_var_int(input)?;
    if len > MAX_ARRAY_LEN {
        return Err(ExecError::Malformed(format!("negative probe array length: {}", len as i32)));
    }

    let len = len as usize;
    let mut values = Vec::with_capacity(len.min(INITIAL_PROBE_CAPACITY));
    let mut packed = 0u8;
    for i in 0..len {
        if i % 8 == 0 {
            packed = read_u8(input)?;
        }
        values.push(packed & (1 << (i % 8)) != 0);
    }
    Ok(values)
}

pub(crate) fn put_utf(out: &mut Vec<u8>, value: &str) -> Result<(), ExecError> {
    let mut encoded = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => encoded.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                encoded.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                encoded.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                encoded.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                encoded.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                encoded.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }

    if encoded.len() > MAX_UTF_BYTES {
        return Err(ExecError::StringTooLong(encoded.len()));
    }
    out.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
    out.extend_from_slice(&encoded);
    Ok(())
}

pub(crate) fn read_utf<R: Read>(input: &mut R) -> Result<String, ExecError> {
    let len = read_u16(input)? as usize;
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes)?;

    let mut units = Vec::with_capacity(len);
    let mut iter = bytes.iter().copied();
    while let Some(first) = iter.next() {
        let unit = match first {
            b if b & 0x80 == 0 => u16::from(b),
            b if b & 0xE0 == 0xC0 => {
                let second = continuation(iter.next())?;
                (u16::from(b & 0x1F) << 6) | second
            }
            b if b & 0xF0 == 0xE0 => {
                let second = continuation(iter.next())?;
                let third = continuation(iter.next())?;
                (u16::from(b & 0x0F) << 12) | (second << 6) | third
            }
            b => {
                return Err(ExecError::Malformed(format!(
                    "invalid modified UTF-8 lead byte 0x{:02x}",
                    b
                )))
            }
        };
        units.push(unit);
    }

    String::from_utf16(&units).map_err(|e| ExecError::Malformed(e.to_string()))
}

fn continuation(byte: Option<u8>) -> Result<u16, ExecError> {
    match byte {
        Some(b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
        Some(b) => Err(ExecError::Malformed(format!(
            "invalid modified UTF-8 continuation byte 0x{:02x}",
            b
        ))),
        None => Err(ExecError::Malformed("truncated modified UTF-8 sequence".into())),
    }
}
