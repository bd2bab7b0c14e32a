//! PE container access for persisted modules.
//!
//! A [`File`] owns the raw bytes of an image (either in memory or memory-mapped from disk)
//! together with the `goblin` view of its PE structure. The loader uses it to find the CLI
//! header and to translate relative virtual addresses into file offsets.
//!
//! ```rust,no_run
//! use dotemit::file::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("out/Sample.dll"))?;
//! let (clr_rva, clr_size) = file.clr()?;
//! let offset = file.rva_to_offset(clr_rva as usize)?;
//! println!("CLI header at {offset:#x}, {clr_size} bytes");
//! # Ok::<(), dotemit::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{Error::Empty, Result};
use goblin::pe::{header::Header, section_table::SectionTable, PE};
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

/// Source of the raw bytes of an image.
pub trait Backend: Send + Sync {
    /// Get a bounds-checked slice of the data
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is not fully contained.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Get all of the data
    fn data(&self) -> &[u8];

    /// Get the length of the data
    fn len(&self) -> usize;
}

/// A parsed PE image together with the bytes it was parsed from.
#[self_referencing]
pub struct File {
    data: Box<dyn Backend>,
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Memory-map and parse the image at `file`.
    ///
    /// # Errors
    /// Returns an error if the file can not be read, is empty, is not a PE file or has no
    /// CLI header data directory.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;
        Self::load(input)
    }

    /// Parse an image held in memory.
    ///
    /// # Errors
    /// Returns an error if the data is empty, is not a PE file or has no CLI header data
    /// directory.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);
        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);
        File::try_new(data, |data| {
            let pe = PE::parse(data.data())?;
            match pe.header.optional_header.as_ref() {
                Some(optional_header) => {
                    if optional_header
                        .data_directories
                        .get_clr_runtime_header()
                        .is_none()
                    {
                        Err(malformed_error!(
                            "File does not have a CLR runtime header directory"
                        ))
                    } else {
                        Ok(pe)
                    }
                }
                None => Err(malformed_error!("File does not have an OptionalHeader")),
            }
        })
    }

    /// Size of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_data(|data| data.len())
    }

    /// Returns true if the image has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Preferred load address.
    #[must_use]
    pub fn imagebase(&self) -> u64 {
        self.with_pe(|pe| pe.image_base)
    }

    /// Returns true for PE32+ images.
    #[must_use]
    pub fn is_64(&self) -> bool {
        self.with_pe(|pe| pe.is_64)
    }

    /// The COFF and optional headers.
    #[must_use]
    pub fn header(&self) -> &Header {
        self.with_pe(|pe| &pe.header)
    }

    /// RVA and size of the CLI header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the directory is absent.
    pub fn clr(&self) -> Result<(u32, u32)> {
        self.with_pe(|pe| {
            let Some(optional_header) = pe.header.optional_header.as_ref() else {
                return Err(malformed_error!("File does not have an OptionalHeader"));
            };

            match optional_header.data_directories.get_clr_runtime_header() {
                Some(clr_dir) => Ok((clr_dir.virtual_address, clr_dir.size)),
                None => Err(malformed_error!(
                    "File does not have a CLR runtime header directory"
                )),
            }
        })
    }

    /// RVA and size of the native resource directory, if present.
    #[must_use]
    pub fn resource_directory(&self) -> Option<(u32, u32)> {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .as_ref()
                .and_then(|header| header.data_directories.get_resource_table())
                .map(|directory| (directory.virtual_address, directory.size))
                .filter(|(rva, size)| *rva != 0 && *size != 0)
        })
    }

    /// Iterate the section headers.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// All of the image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// A bounds-checked slice of the image bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is not fully contained.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Translate a relative virtual address into a file offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section contains `rva`.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        self.with_pe(|pe| {
            let rva_u32 = u32::try_from(rva)
                .map_err(|_| malformed_error!("RVA too large to fit in u32: {}", rva))?;

            for section in &pe.sections {
                let Some(section_max) = section.virtual_address.checked_add(section.virtual_size)
                else {
                    return Err(malformed_error!(
                        "Section malformed, causing integer overflow - {} + {}",
                        section.virtual_address,
                        section.virtual_size
                    ));
                };

                if section.virtual_address <= rva_u32 && section_max > rva_u32 {
                    return Ok((rva - section.virtual_address as usize)
                        + section.pointer_to_raw_data as usize);
                }
            }

            Err(malformed_error!(
                "RVA could not be converted to offset - {}",
                rva
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        assert!(matches!(File::from_mem(Vec::new()), Err(Empty)));
    }

    #[test]
    fn not_a_pe() {
        assert!(File::from_mem(vec![0x4D, 0x5A, 0x00, 0x01]).is_err());
    }
}
