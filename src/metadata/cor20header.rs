//! The CLI header (ECMA-335 II.25.3.3), pointed to by data directory 14 of the PE image.

use bitflags::bitflags;

use crate::{file::io::WriteLe, file::parser::Parser, Result};

/// Size of the CLI header in bytes.
pub const COR20_HEADER_SIZE: u32 = 72;

bitflags! {
    /// Runtime flags of the CLI header
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ComImageFlags: u32 {
        /// The image contains IL only
        const IL_ONLY = 0x0000_0001;
        /// The image can only be loaded into a 32-bit process
        const REQUIRED_32BIT = 0x0000_0002;
        /// The image is strong name signed
        const STRONG_NAME_SIGNED = 0x0000_0008;
        /// The entry point field holds an RVA instead of a token
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        /// Prefer running as a 32-bit process
        const PREFERRED_32BIT = 0x0002_0000;
    }
}

/// The CLI header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cor20Header {
    /// Major runtime version, 2
    pub major_runtime_version: u16,
    /// Minor runtime version, 5
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub meta_data_rva: u32,
    /// Size of the metadata
    pub meta_data_size: u32,
    /// Runtime flags
    pub flags: ComImageFlags,
    /// Token of the entry point method, 0 if none
    pub entry_point_token: u32,
    /// RVA of the embedded managed resources
    pub resource_rva: u32,
    /// Size of the embedded managed resources
    pub resource_size: u32,
    /// RVA of the strong name signature
    pub strong_name_signature_rva: u32,
    /// Size of the strong name signature
    pub strong_name_signature_size: u32,
}

impl Cor20Header {
    /// Parse the header.
    ///
    /// # Errors
    /// Returns an error if the data is shorter than 72 bytes or the size field is wrong.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_HEADER_SIZE as usize {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;

        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 {
            return Err(malformed_error!("Metadata directory cannot be empty"));
        }

        let flags = ComImageFlags::from_bits_truncate(parser.read_le::<u32>()?);
        let entry_point_token = parser.read_le::<u32>()?;
        let resource_rva = parser.read_le::<u32>()?;
        let resource_size = parser.read_le::<u32>()?;
        let strong_name_signature_rva = parser.read_le::<u32>()?;
        let strong_name_signature_size = parser.read_le::<u32>()?;

        Ok(Cor20Header {
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
        })
    }

    /// Serialize the header; the reserved directories are written as zero.
    #[must_use]
    pub fn write(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(COR20_HEADER_SIZE as usize);
        buffer.write_le::<u32>(COR20_HEADER_SIZE);
        buffer.write_le::<u16>(self.major_runtime_version);
        buffer.write_le::<u16>(self.minor_runtime_version);
        buffer.write_le::<u32>(self.meta_data_rva);
        buffer.write_le::<u32>(self.meta_data_size);
        buffer.write_le::<u32>(self.flags.bits());
        buffer.write_le::<u32>(self.entry_point_token);
        buffer.write_le::<u32>(self.resource_rva);
        buffer.write_le::<u32>(self.resource_size);
        buffer.write_le::<u32>(self.strong_name_signature_rva);
        buffer.write_le::<u32>(self.strong_name_signature_size);
        // code manager table, vtable fixups, export address table jumps, managed native header
        buffer.resize(COR20_HEADER_SIZE as usize, 0);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read() {
        let header = Cor20Header {
            major_runtime_version: 2,
            minor_runtime_version: 5,
            meta_data_rva: 0x2050,
            meta_data_size: 0x400,
            flags: ComImageFlags::IL_ONLY,
            entry_point_token: 0x0600_0001,
            ..Default::default()
        };

        let bytes = header.write();
        assert_eq!(bytes.len(), 72);
        assert_eq!(Cor20Header::read(&bytes).unwrap(), header);
    }

    #[test]
    fn invalid() {
        assert!(Cor20Header::read(&[0u8; 16]).is_err());
        let mut bytes = Cor20Header::default().write();
        assert!(Cor20Header::read(&bytes).is_err());
        bytes[0] = 0x40;
        assert!(Cor20Header::read(&bytes).is_err());
    }
}
