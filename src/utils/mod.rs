//! Small encoding and hashing helpers shared by the builders, the writer and the loader.

use md5::{Digest as Md5Digest, Md5};
use sha1::{Digest as Sha1Digest, Sha1};

use crate::Result;

/// Largest value representable by the ECMA-335 compressed unsigned integer encoding.
pub const MAX_COMPRESSED_UINT: u32 = 0x1FFF_FFFF;

/// Append `value` in the ECMA-335 II.23.2 compressed unsigned format.
///
/// # Errors
/// Returns [`crate::Error::InvalidArgument`] if `value` exceeds [`MAX_COMPRESSED_UINT`].
pub fn write_compressed_uint(value: u32, buffer: &mut Vec<u8>) -> Result<()> {
    #[allow(clippy::cast_possible_truncation)]
    let (high, low) = ((value >> 8) as u8, value as u8);
    if value <= 0x7F {
        buffer.push(low);
    } else if value <= 0x3FFF {
        buffer.extend_from_slice(&[0x80 | high, low]);
    } else if value <= MAX_COMPRESSED_UINT {
        buffer.extend_from_slice(&(value | 0xC000_0000).to_be_bytes());
    } else {
        return Err(invalid_argument!(
            "value",
            "Value {:#x} can not be compressed",
            value
        ));
    }

    Ok(())
}

/// Append `value` in the ECMA-335 II.23.2 compressed signed format.
///
/// # Errors
/// Returns [`crate::Error::InvalidArgument`] if `value` lies outside of -2^28..2^28.
pub fn write_compressed_int(value: i32, buffer: &mut Vec<u8>) -> Result<()> {
    #[allow(clippy::cast_sign_loss)]
    let (encoded, width) = if (-0x40..=0x3F).contains(&value) {
        (((value << 1) as u32 & 0x7E) | u32::from(value < 0), 7)
    } else if (-0x2000..=0x1FFF).contains(&value) {
        (((value << 1) as u32 & 0x3FFE) | u32::from(value < 0), 14)
    } else if (-0x1000_0000..=0x0FFF_FFFF).contains(&value) {
        (
            ((value << 1) as u32 & 0x1FFF_FFFE) | u32::from(value < 0),
            29,
        )
    } else {
        return Err(invalid_argument!(
            "value",
            "Value {} can not be compressed",
            value
        ));
    };

    #[allow(clippy::cast_possible_truncation)]
    let (high, low) = ((encoded >> 8) as u8, encoded as u8);
    match width {
        7 => buffer.push(low),
        14 => buffer.extend_from_slice(&[0x80 | high, low]),
        _ => buffer.extend_from_slice(&(encoded | 0xC000_0000).to_be_bytes()),
    }

    Ok(())
}

/// Round `value` up to the next multiple of `alignment` (which must be a power of two).
#[must_use]
pub const fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Pad `buffer` with zero bytes until its length is a multiple of `alignment`.
pub fn pad_to(buffer: &mut Vec<u8>, alignment: usize) {
    let remainder = buffer.len() % alignment;
    if remainder != 0 {
        buffer.resize(buffer.len() + alignment - remainder, 0);
    }
}

/// Computes the MD5 hash of input bytes.
#[must_use]
pub fn compute_md5(data: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    Md5Digest::update(&mut hasher, data);
    hasher.finalize().to_vec()
}

/// Computes the SHA-1 hash of input bytes.
///
/// SHA-1 is what the format uses for public key tokens and default file hashes, it is not
/// used here for anything security related.
#[must_use]
pub fn compute_sha1(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    Sha1Digest::update(&mut hasher, data);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::parser::Parser;

    #[test]
    fn compressed_uint_vectors() {
        // ECMA-335 II.23.2 examples
        let cases: &[(u32, &[u8])] = &[
            (0x03, &[0x03]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x80]),
            (0x2E57, &[0xAE, 0x57]),
            (0x3FFF, &[0xBF, 0xFF]),
            (0x4000, &[0xC0, 0x00, 0x40, 0x00]),
            (0x1FFF_FFFF, &[0xDF, 0xFF, 0xFF, 0xFF]),
        ];

        for (value, expected) in cases {
            let mut buffer = Vec::new();
            write_compressed_uint(*value, &mut buffer).unwrap();
            assert_eq!(&buffer, expected, "value {value:#x}");

            let mut parser = Parser::new(&buffer);
            assert_eq!(parser.read_compressed_uint().unwrap(), *value);
        }

        assert!(write_compressed_uint(0x2000_0000, &mut Vec::new()).is_err());
    }

    #[test]
    fn compressed_int_vectors() {
        let cases: &[(i32, &[u8])] = &[
            (3, &[0x06]),
            (-3, &[0x7B]),
            (64, &[0x80, 0x80]),
            (-64, &[0x01]),
            (8192, &[0xC0, 0x00, 0x40, 0x00]),
            (-8192, &[0x80, 0x01]),
            (268_435_455, &[0xDF, 0xFF, 0xFF, 0xFE]),
            (-268_435_456, &[0xC0, 0x00, 0x00, 0x01]),
        ];

        for (value, expected) in cases {
            let mut buffer = Vec::new();
            write_compressed_int(*value, &mut buffer).unwrap();
            assert_eq!(&buffer, expected, "value {value}");

            let mut parser = Parser::new(&buffer);
            assert_eq!(parser.read_compressed_int().unwrap(), *value);
        }
    }

    #[test]
    fn alignment() {
        assert_eq!(align_to(0, 4), 0);
        assert_eq!(align_to(1, 4), 4);
        assert_eq!(align_to(0x201, 0x200), 0x400);

        let mut buffer = vec![1, 2, 3];
        pad_to(&mut buffer, 4);
        assert_eq!(buffer, vec![1, 2, 3, 0]);
    }

    #[test]
    fn hashes() {
        assert_eq!(
            compute_sha1(b"abc"),
            vec![
                0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78, 0x50,
                0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d
            ]
        );
        assert_eq!(compute_md5(b"").len(), 16);
    }
}
