//! Endian-aware primitive reading and writing.
//!
//! [`CilIO`] abstracts over the numeric types that appear in PE headers, metadata tables
//! and method bodies. The free functions read from slices with explicit bounds checks;
//! [`WriteLe`] appends little-endian values to a growable buffer and is what the writer
//! uses to produce every structure of an image.

use crate::Result;

/// Trait for numeric types that can be converted from and to raw bytes.
pub trait CilIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;
    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cilio {
    ($($ty:ty => $size:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $size];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cilio!(
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f32 => 4, f64 => 8,
);

/// Safely reads a value of type `T` in little-endian byte order from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is too short.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would pass the end of `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Reads a 2 or 4 byte little-endian index depending on `is_large`, widened to `u32`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would pass the end of `data`.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    let res = if is_large {
        read_le_at::<u32>(data, offset)?
    } else {
        u32::from(read_le_at::<u16>(data, offset)?)
    };

    Ok(res)
}

/// Safely reads a value of type `T` in big-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would pass the end of `data`.
pub fn read_be_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_be_bytes(read))
}

/// Little-endian append helpers for growable byte buffers.
pub trait WriteLe {
    /// Append `value` in little-endian byte order
    fn write_le<T: CilIO>(&mut self, value: T);

    /// Append a 2 or 4 byte index depending on `is_large`
    fn write_le_dyn(&mut self, value: u32, is_large: bool);

    /// Overwrite 4 bytes at `offset` with `value` in little-endian byte order
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
    fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()>;
}

impl WriteLe for Vec<u8> {
    fn write_le<T: CilIO>(&mut self, value: T) {
        self.extend_from_slice(value.to_le_bytes().as_ref());
    }

    fn write_le_dyn(&mut self, value: u32, is_large: bool) {
        if is_large {
            self.write_le::<u32>(value);
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let value = value as u16;
            self.write_le::<u16>(value);
        }
    }

    fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let Some(slot) = self.get_mut(offset..offset + 4) else {
            return Err(out_of_bounds_error!());
        };
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_values() {
        assert_eq!(read_le::<u8>(&TEST_BUFFER).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&TEST_BUFFER).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&TEST_BUFFER).unwrap(), 0x0403_0201);
        assert_eq!(read_le::<u64>(&TEST_BUFFER).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn read_at_advances() {
        let mut offset = 2;
        assert_eq!(read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap(), 0x0403);
        assert_eq!(offset, 4);
        assert_eq!(read_be_at::<u16>(&TEST_BUFFER, &mut offset).unwrap(), 0x0506);
        assert_eq!(read_le_at_dyn(&TEST_BUFFER, &mut offset, false).unwrap(), 0x0807);
        assert!(read_le_at::<u8>(&TEST_BUFFER, &mut offset).is_err());
    }

    #[test]
    fn write_and_patch() {
        let mut buffer = Vec::new();
        buffer.write_le::<u16>(0xBEEF);
        buffer.write_le::<u32>(0);
        buffer.write_le_dyn(7, false);
        buffer.write_le_dyn(7, true);
        assert_eq!(buffer.len(), 2 + 4 + 2 + 4);

        buffer.patch_u32(2, 0xCAFE_BABE).unwrap();
        assert_eq!(&buffer[..6], &[0xEF, 0xBE, 0xBE, 0xBA, 0xFE, 0xCA]);
        assert!(buffer.patch_u32(10, 1).is_err());
    }
}
