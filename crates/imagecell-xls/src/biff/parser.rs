//! Low-level binary parsing helpers for BIFF8 records.
//!
//! All multi-byte integers in BIFF8 are little-endian.

use crate::error::{XlsError, XlsResult};

/// Borrow `len` bytes at `offset`, advancing `offset`.
#[inline]
fn take<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> XlsResult<&'a [u8]> {
    let end = offset.checked_add(len).filter(|&end| end <= data.len());
    match end {
        Some(end) => {
            let bytes = &data[*offset..end];
            *offset = end;
            Ok(bytes)
        }
        None => Err(XlsError::Parse(format!(
            "unexpected end of data at offset {}, need {} bytes",
            *offset, len
        ))),
    }
}

/// Read a `u8` from a byte slice at `offset`, advancing `offset`.
#[inline]
pub fn read_u8(data: &[u8], offset: &mut usize) -> XlsResult<u8> {
    Ok(take(data, offset, 1)?[0])
}

/// Read a `u16` (little-endian), advancing `offset`.
#[inline]
pub fn read_u16(data: &[u8], offset: &mut usize) -> XlsResult<u16> {
    let b = take(data, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

/// Read a `u32` (little-endian), advancing `offset`.
#[inline]
pub fn read_u32(data: &[u8], offset: &mut usize) -> XlsResult<u32> {
    let b = take(data, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Read 8 raw bytes, advancing `offset`.
#[inline]
pub fn read_bytes8(data: &[u8], offset: &mut usize) -> XlsResult<[u8; 8]> {
    let b = take(data, offset, 8)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(b);
    Ok(out)
}

/// Read an `f64` (IEEE 754 double, little-endian).
#[inline]
pub fn read_f64(data: &[u8], offset: &mut usize) -> XlsResult<f64> {
    read_bytes8(data, offset).map(f64::from_le_bytes)
}

/// Decode an RK-encoded number.
///
/// RK encoding (4 bytes):
/// - Bit 0: if 1, the decoded number should be divided by 100
/// - Bit 1: if 1, bits 2..31 are a signed 30-bit integer; otherwise they are
///   the upper 30 bits of an IEEE 754 double whose lower 34 bits are zero
#[inline]
pub fn decode_rk(rk: u32) -> f64 {
    let div100 = (rk & 0x01) != 0;
    let is_integer = (rk & 0x02) != 0;

    let value = if is_integer {
        ((rk as i32) >> 2) as f64
    } else {
        let upper = (rk & 0xFFFF_FFFC) as u64;
        f64::from_bits(upper << 32)
    };

    if div100 {
        value / 100.0
    } else {
        value
    }
}

/// Read an RK value from 4 bytes at `offset`.
#[inline]
pub fn read_rk(data: &[u8], offset: &mut usize) -> XlsResult<f64> {
    let raw = read_u32(data, offset)?;
    Ok(decode_rk(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rk_integer() {
        let rk = (42u32 << 2) | 0x02;
        assert_eq!(decode_rk(rk), 42.0);
    }

    #[test]
    fn test_decode_rk_integer_negative() {
        let rk = ((-5i32 << 2) as u32) | 0x02;
        assert_eq!(decode_rk(rk), -5.0);
    }

    #[test]
    fn test_decode_rk_integer_div100() {
        let rk = (4200u32 << 2) | 0x03;
        assert_eq!(decode_rk(rk), 42.0);
    }

    #[test]
    fn test_decode_rk_float() {
        let bits = 42.0_f64.to_bits();
        let rk = ((bits >> 32) as u32) & 0xFFFF_FFFC;
        assert_eq!(decode_rk(rk), 42.0);
    }

    #[test]
    fn test_decode_rk_observed_values() {
        assert_eq!(decode_rk(0x000000AA), 42.0);
        assert!((decode_rk(0x000004EB) - 3.14).abs() < f64::EPSILON);
        assert_eq!(decode_rk(0xFFFFFE72), -100.0);
        assert_eq!(decode_rk(0x00000002), 0.0);
    }

    #[test]
    fn test_read_u16() {
        let data = [0x34, 0x12];
        let mut off = 0;
        assert_eq!(read_u16(&data, &mut off).unwrap(), 0x1234);
        assert_eq!(off, 2);
    }

    #[test]
    fn test_read_f64() {
        let bytes = 2.5_f64.to_le_bytes();
        let mut off = 0;
        assert_eq!(read_f64(&bytes, &mut off).unwrap(), 2.5);
        assert_eq!(off, 8);
    }

    #[test]
    fn test_short_read_is_error_and_keeps_offset() {
        let data = [0x01, 0x02, 0x03];
        let mut off = 1;
        assert!(read_u32(&data, &mut off).is_err());
        assert_eq!(off, 1);
    }
}
