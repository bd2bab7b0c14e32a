//! The metadata root and its stream headers (ECMA-335 II.24.2.1).
//!
//! The writer produces a root naming the `#~`, `#Strings`, `#US`, `#GUID` and `#Blob`
//! streams; the loader reads it back to locate each heap and the table stream.

use crate::{
    file::io::{read_le, read_le_at, WriteLe},
    utils::pad_to,
    Result,
};

/// Magic signature of the metadata root ("BSJB")
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// Names of the streams the writer emits, in layout order.
pub const STREAM_NAMES: [&str; 5] = ["#~", "#Strings", "#US", "#GUID", "#Blob"];

/// Location of one stream relative to the metadata root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset from the start of the metadata root
    pub offset: u32,
    /// Size in bytes, a multiple of 4
    pub size: u32,
    /// Stream name
    pub name: String,
}

impl StreamHeader {
    /// Parse one stream header, returning it and the number of bytes consumed.
    ///
    /// # Errors
    /// Returns an error if the header is truncated or names an unknown stream.
    pub fn from(data: &[u8]) -> Result<(StreamHeader, usize)> {
        if data.len() < 9 {
            return Err(out_of_bounds_error!());
        }

        let name_bytes = &data[8..data.len().min(8 + 32)];
        let Some(name_length) = name_bytes.iter().position(|byte| *byte == 0) else {
            return Err(malformed_error!("Unterminated stream header name"));
        };
        let name = String::from_utf8_lossy(&name_bytes[..name_length]).into_owned();

        if !STREAM_NAMES.iter().any(|valid_name| name == *valid_name) {
            return Err(malformed_error!("Invalid stream header name - {}", name));
        }

        Ok((
            StreamHeader {
                offset: read_le::<u32>(data)?,
                size: read_le::<u32>(&data[4..])?,
                name,
            },
            8 + ((name_length + 1 + 3) & !3),
        ))
    }
}

/// The metadata root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    /// Major version, 1
    pub major_version: u16,
    /// Minor version, 1
    pub minor_version: u16,
    /// Runtime version string, e.g. `v4.0.30319`
    pub version: String,
    /// The streams
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Parse the metadata root.
    ///
    /// # Errors
    /// Returns an error if the magic does not match or a stream lies outside of `data`.
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 20 {
            return Err(out_of_bounds_error!());
        }

        let signature = read_le::<u32>(data)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {}",
                signature
            ));
        }

        let version_length = read_le_at::<u32>(data, &mut 12)? as usize;
        let Some(version_bytes) = data.get(16..16 + version_length) else {
            return Err(out_of_bounds_error!());
        };
        let version = String::from_utf8_lossy(version_bytes)
            .trim_end_matches('\0')
            .to_string();

        let mut offset = 16 + version_length + 2;
        let stream_count = read_le_at::<u16>(data, &mut offset)?;
        if stream_count == 0 || stream_count > 5 {
            return Err(malformed_error!("Invalid stream count - {}", stream_count));
        }

        let mut stream_headers = Vec::with_capacity(stream_count as usize);
        for _ in 0..stream_count {
            let Some(rest) = data.get(offset..) else {
                return Err(out_of_bounds_error!());
            };
            let (header, consumed) = StreamHeader::from(rest)?;
            match header.offset.checked_add(header.size) {
                Some(end) if end as usize <= data.len() => {}
                _ => return Err(out_of_bounds_error!()),
            }
            offset += consumed;
            stream_headers.push(header);
        }

        Ok(Root {
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            version,
            stream_headers,
        })
    }

    /// Find a stream by name.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|header| header.name == name)
    }

    /// Size of the root header for the given version string and streams.
    #[must_use]
    pub fn header_size(version: &str, names: &[&str]) -> usize {
        let version_length = (version.len() + 1 + 3) & !3;
        20 + version_length
            + names
                .iter()
                .map(|name| 8 + ((name.len() + 1 + 3) & !3))
                .sum::<usize>()
    }

    /// Serialize the root and stream headers.
    #[must_use]
    pub fn write(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(128);
        buffer.write_le::<u32>(CIL_HEADER_MAGIC);
        buffer.write_le::<u16>(self.major_version);
        buffer.write_le::<u16>(self.minor_version);
        buffer.write_le::<u32>(0);

        let version_length = (self.version.len() + 1 + 3) & !3;
        #[allow(clippy::cast_possible_truncation)]
        let padded_length = version_length as u32;
        buffer.write_le::<u32>(padded_length);
        buffer.extend_from_slice(self.version.as_bytes());
        buffer.resize(16 + version_length, 0);

        buffer.write_le::<u16>(0);
        #[allow(clippy::cast_possible_truncation)]
        let stream_count = self.stream_headers.len() as u16;
        buffer.write_le::<u16>(stream_count);
        for header in &self.stream_headers {
            buffer.write_le::<u32>(header.offset);
            buffer.write_le::<u32>(header.size);
            buffer.extend_from_slice(header.name.as_bytes());
            buffer.push(0);
            pad_to(&mut buffer, 4);
        }

        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let header_bytes = [
            0x42, 0x53, 0x4A, 0x42,
            0x01, 0x00,
            0x01, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            b'v', b'4', b'.', b'0', 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
            0x01, 0x00,

            0x24, 0x00, 0x00, 0x00, // StreamHeader
            0x04, 0x00, 0x00, 0x00,
            0x23, 0x7E, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let parsed_header = Root::read(&header_bytes).unwrap();
        assert_eq!(parsed_header.major_version, 1);
        assert_eq!(parsed_header.version, "v4.0");
        assert_eq!(parsed_header.stream_headers.len(), 1);
        assert_eq!(parsed_header.stream("#~").unwrap().offset, 0x24);
        assert!(parsed_header.stream("#Blob").is_none());
    }

    #[test]
    fn write_read() {
        let root = Root {
            major_version: 1,
            minor_version: 1,
            version: "v4.0.30319".to_string(),
            stream_headers: STREAM_NAMES
                .iter()
                .map(|name| StreamHeader {
                    offset: 0,
                    size: 0,
                    name: (*name).to_string(),
                })
                .collect(),
        };

        let bytes = root.write();
        assert_eq!(bytes.len(), Root::header_size(&root.version, &STREAM_NAMES));
        assert_eq!(Root::read(&bytes).unwrap(), root);
    }

    #[test]
    fn invalid() {
        assert!(Root::read(&[0u8; 10]).is_err());
        assert!(Root::read(&[0u8; 40]).is_err());
        assert!(StreamHeader::from(&[0x6C, 0, 0, 0, 0xA4, 0x45, 0, 0, 0x24, 0x7E, 0x00]).is_err());
    }
}
