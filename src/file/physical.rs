//! Memory-mapped backend for images read from disk.

use super::Backend;
use crate::Result;
use memmap2::Mmap;
use std::{fs, path::Path};

/// Backing store that maps a file into memory.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file can not be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;
        // The mapping stays valid while `Physical` lives; saved images are not rewritten
        // while a loader holds them.
        let mmap = unsafe { Mmap::map(&file) }?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if offset_end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn physical() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4, 5]).unwrap();
        file.flush().unwrap();

        let physical = Physical::new(file.path()).unwrap();
        assert_eq!(physical.len(), 5);
        assert_eq!(physical.data_slice(1, 3).unwrap(), &[2, 3, 4]);
        assert!(physical.data_slice(4, 2).is_err());
    }

    #[test]
    fn missing_file() {
        assert!(Physical::new("/definitely/not/here.dll").is_err());
    }
}
