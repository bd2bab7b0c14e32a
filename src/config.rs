//! Options for emission and persistence.
//!
//! [`EmitOptions`] is attached to an [`crate::emit::AssemblyBuilder`] when it is created
//! and governs defaults of the builders. [`SaveOptions`] is passed to
//! [`crate::emit::AssemblyBuilder::save_with`] and controls the shape of the written image.
//!
//! ```rust
//! use dotemit::config::{ImageFileMachine, PortableExecutableKinds, SaveOptions};
//!
//! let options = SaveOptions::new()
//!     .with_machine(ImageFileMachine::Amd64)
//!     .with_pe_kind(PortableExecutableKinds::IL_ONLY | PortableExecutableKinds::PE32_PLUS);
//! assert!(options.is_pe32_plus());
//! ```

use bitflags::bitflags;

bitflags! {
    /// Nature of the code in a persisted image.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PortableExecutableKinds: u32 {
        /// Contains only IL
        const IL_ONLY = 0x0001;
        /// Must be loaded into a 32-bit process
        const REQUIRED_32BIT = 0x0002;
        /// PE32+ image for 64-bit platforms
        const PE32_PLUS = 0x0004;
        /// Contains pure unmanaged code
        const UNMANAGED_32BIT = 0x0008;
        /// Prefers a 32-bit process where available
        const PREFERRED_32BIT = 0x0010;
    }
}

impl Default for PortableExecutableKinds {
    fn default() -> Self {
        PortableExecutableKinds::IL_ONLY
    }
}

/// Target machine written to the COFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
pub enum ImageFileMachine {
    /// x86
    #[default]
    I386 = 0x014C,
    /// x64
    Amd64 = 0x8664,
    /// ARM64
    Arm64 = 0xAA64,
    /// Itanium
    IA64 = 0x0200,
}

/// Kind of the persisted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PEFileKinds {
    /// A library
    #[default]
    Dll,
    /// A console application
    ConsoleApplication,
    /// A windowed application
    WindowApplication,
}

/// Shape of the image written by `Save`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    /// Code kind flags, mapped onto the CLI header flags
    pub pe_kind: PortableExecutableKinds,
    /// Target machine
    pub machine: ImageFileMachine,
    /// Library or application
    pub file_kind: PEFileKinds,
    /// File alignment of sections, a power of two between 512 and 64K
    pub file_alignment: u32,
    /// Memory alignment of sections
    pub section_alignment: u32,
    /// Runtime version string in the metadata root
    pub runtime_version: String,
    /// COFF timestamp; the default of zero keeps output deterministic
    pub timestamp: u32,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            pe_kind: PortableExecutableKinds::IL_ONLY,
            machine: ImageFileMachine::I386,
            file_kind: PEFileKinds::Dll,
            file_alignment: 0x200,
            section_alignment: 0x2000,
            runtime_version: "v4.0.30319".to_string(),
            timestamp: 0,
        }
    }
}

impl SaveOptions {
    /// Default options: an IL-only x86 library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the code kind flags.
    #[must_use]
    pub fn with_pe_kind(mut self, pe_kind: PortableExecutableKinds) -> Self {
        self.pe_kind = pe_kind;
        self
    }

    /// Set the target machine.
    #[must_use]
    pub fn with_machine(mut self, machine: ImageFileMachine) -> Self {
        self.machine = machine;
        self
    }

    /// Set the file kind.
    #[must_use]
    pub fn with_file_kind(mut self, file_kind: PEFileKinds) -> Self {
        self.file_kind = file_kind;
        self
    }

    /// Set the file alignment.
    #[must_use]
    pub fn with_file_alignment(mut self, alignment: u32) -> Self {
        self.file_alignment = alignment;
        self
    }

    /// Set the runtime version string.
    #[must_use]
    pub fn with_runtime_version(mut self, version: &str) -> Self {
        self.runtime_version = version.to_string();
        self
    }

    /// Set the COFF timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns true if a PE32+ image is written.
    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.pe_kind.contains(PortableExecutableKinds::PE32_PLUS)
            || matches!(
                self.machine,
                ImageFileMachine::Amd64 | ImageFileMachine::Arm64 | ImageFileMachine::IA64
            )
    }
}

/// Builder defaults of one assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOptions {
    /// Initial value of `InitLocals` for new methods
    pub init_locals: bool,
    /// Whether `Save` may finalize types that are still open
    pub finalize_on_save: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        EmitOptions {
            init_locals: true,
            finalize_on_save: true,
        }
    }
}

impl EmitOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `InitLocals` default.
    #[must_use]
    pub fn with_init_locals(mut self, enabled: bool) -> Self {
        self.init_locals = enabled;
        self
    }

    /// Allow or forbid implicit finalization on `Save`.
    #[must_use]
    pub fn with_finalize_on_save(mut self, enabled: bool) -> Self {
        self.finalize_on_save = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = SaveOptions::default();
        assert_eq!(options.pe_kind, PortableExecutableKinds::IL_ONLY);
        assert_eq!(options.runtime_version, "v4.0.30319");
        assert_eq!(options.timestamp, 0);
        assert!(!options.is_pe32_plus());

        let emit = EmitOptions::default();
        assert!(emit.init_locals);
        assert!(emit.finalize_on_save);
    }

    #[test]
    fn machine_implies_pe32_plus() {
        let options = SaveOptions::new().with_machine(ImageFileMachine::Arm64);
        assert!(options.is_pe32_plus());
    }
}
