//! PE/COFF image layout (ECMA-335 II.25).
//!
//! The image always has a `.text` section holding the import address table, the CLI
//! header, method bodies, managed resources, the strong name signature area, metadata,
//! and for PE32 images the import directory and the native entry stub that jumps to
//! `mscoree.dll`. Optional sections follow: `.sdata` for the initial data of RVA fields,
//! `.rsrc` for Win32 resources and `.reloc` for the fixup of the entry stub.
//!
//! The section set is decided before the metadata is lowered, so method body RVAs are
//! known up front. Everything after that is computed from sizes alone.

use log::debug;

use crate::{
    config::{PEFileKinds, PortableExecutableKinds, SaveOptions},
    file::io::WriteLe,
    metadata::cor20header::{ComImageFlags, Cor20Header, COR20_HEADER_SIZE},
    utils::align_to,
    writer::{
        metadata::ModuleContent,
        win32res::{self, ResourceEntry},
    },
    Result,
};

const DOS_HEADER_SIZE: u32 = 0x80;
const PE_SIGNATURE_SIZE: u32 = 4;
const COFF_HEADER_SIZE: u32 = 20;
const SECTION_HEADER_SIZE: u32 = 40;
/// Offset of `CheckSum` within the optional header, identical for PE32 and PE32+
const CHECKSUM_OFFSET: usize = (DOS_HEADER_SIZE + PE_SIGNATURE_SIZE + COFF_HEADER_SIZE + 64) as usize;

const IMAGE_SCN_CNT_CODE: u32 = 0x0000_0020;
const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;
const IMAGE_SCN_MEM_DISCARDABLE: u32 = 0x0200_0000;
const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;
const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000;

const IMPORT_DIRECTORY_SIZE: u32 = 40;
const DLL_NAME: &[u8] = b"mscoree.dll\0";

/// The classic DOS header and "This program cannot be run in DOS mode." stub.
fn dos_header() -> Vec<u8> {
    let mut header = Vec::with_capacity(DOS_HEADER_SIZE as usize);
    header.extend_from_slice(&[
        0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0xFF, 0xFF,
        0x00, 0x00, 0xB8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00,
    ]);
    header.resize(0x3C, 0);
    header.write_le::<u32>(DOS_HEADER_SIZE);
    header.extend_from_slice(&[
        0x0E, 0x1F, 0xBA, 0x0E, 0x00, 0xB4, 0x09, 0xCD, 0x21, 0xB8, 0x01, 0x4C, 0xCD, 0x21,
    ]);
    header.extend_from_slice(b"This program cannot be run in DOS mode.\r\r\n$");
    header.resize(DOS_HEADER_SIZE as usize, 0);
    header
}

/// Standard PE checksum: 16-bit one's complement sum of the file without the checksum
/// field, plus the file size.
pub(crate) fn pe_checksum(image: &[u8], checksum_offset: usize) -> u32 {
    let mut checksum: u64 = 0;
    let mut offset = 0;
    while offset < image.len() {
        if offset == checksum_offset {
            offset += 4;
            continue;
        }
        let word = match image.get(offset..offset + 2) {
            Some(bytes) => u64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            None => u64::from(image[offset]),
        };
        checksum += word;
        if checksum > 0xFFFF {
            checksum = (checksum & 0xFFFF) + (checksum >> 16);
        }
        offset += 2;
    }

    checksum += image.len() as u64;
    while checksum > 0xFFFF {
        checksum = (checksum & 0xFFFF) + (checksum >> 16);
    }
    #[allow(clippy::cast_possible_truncation)]
    let checksum = checksum as u32;
    checksum
}

/// CLI header flags for the requested code kind.
fn cli_flags(pe_kind: PortableExecutableKinds) -> ComImageFlags {
    let mut flags = ComImageFlags::empty();
    if pe_kind.contains(PortableExecutableKinds::IL_ONLY) {
        flags |= ComImageFlags::IL_ONLY;
    }
    if pe_kind.contains(PortableExecutableKinds::REQUIRED_32BIT) {
        flags |= ComImageFlags::REQUIRED_32BIT;
    }
    if pe_kind.contains(PortableExecutableKinds::PREFERRED_32BIT) {
        flags |= ComImageFlags::REQUIRED_32BIT | ComImageFlags::PREFERRED_32BIT;
    }
    flags
}

/// Section set and header geometry of one image.
#[derive(Debug, Clone)]
pub(crate) struct PeLayout {
    pe32_plus: bool,
    imports: bool,
    field_data: bool,
    win32_resources: bool,
    file_alignment: u32,
    section_alignment: u32,
}

impl PeLayout {
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an alignment that is not a power of
    /// two between 512 and 64K, or a section alignment below the file alignment.
    pub fn new(options: &SaveOptions, field_data: bool, win32_resources: bool) -> Result<Self> {
        let file_alignment = options.file_alignment;
        if !file_alignment.is_power_of_two() || !(0x200..=0x1_0000).contains(&file_alignment) {
            return Err(invalid_argument!(
                "fileAlignment",
                "File alignment {:#x} is not a power of two between 0x200 and 0x10000",
                file_alignment
            ));
        }
        let section_alignment = options.section_alignment;
        if !section_alignment.is_power_of_two() || section_alignment < file_alignment {
            return Err(invalid_argument!(
                "sectionAlignment",
                "Section alignment {:#x} is invalid for file alignment {:#x}",
                section_alignment,
                file_alignment
            ));
        }

        let pe32_plus = options.is_pe32_plus();
        Ok(PeLayout {
            pe32_plus,
            imports: !pe32_plus,
            field_data,
            win32_resources,
            file_alignment,
            section_alignment,
        })
    }

    fn section_count(&self) -> u32 {
        1 + u32::from(self.field_data) + u32::from(self.win32_resources) + u32::from(self.imports)
    }

    fn optional_header_size(&self) -> u32 {
        if self.pe32_plus {
            240
        } else {
            224
        }
    }

    fn headers_size(&self) -> u32 {
        DOS_HEADER_SIZE
            + PE_SIGNATURE_SIZE
            + COFF_HEADER_SIZE
            + self.optional_header_size()
            + SECTION_HEADER_SIZE * self.section_count()
    }

    fn text_rva(&self) -> u32 {
        align_to(self.headers_size(), self.section_alignment)
    }

    fn iat_size(&self) -> u32 {
        if self.imports {
            8
        } else {
            0
        }
    }

    /// RVA of the first method body.
    pub fn body_rva(&self) -> u32 {
        self.text_rva() + self.iat_size() + COR20_HEADER_SIZE
    }

    fn image_base(&self, file_kind: PEFileKinds) -> u64 {
        match (self.pe32_plus, file_kind) {
            (false, PEFileKinds::Dll) => 0x1000_0000,
            (false, _) => 0x0040_0000,
            (true, PEFileKinds::Dll) => 0x1_8000_0000,
            (true, _) => 0x1_4000_0000,
        }
    }
}

struct Section {
    name: &'static [u8],
    characteristics: u32,
    rva: u32,
    data: Vec<u8>,
}

/// Offsets within `.text` of the import structures and the entry stub.
struct Imports {
    directory: u32,
    lookup: u32,
    hint_name: u32,
    dll_name: u32,
    stub: u32,
}

impl Imports {
    fn new(start: u32) -> Self {
        let directory = align_to(start, 4);
        let lookup = directory + IMPORT_DIRECTORY_SIZE;
        let hint_name = lookup + 8;
        // hint + "_CorXxxMain\0"
        let dll_name = hint_name + 2 + 12;
        #[allow(clippy::cast_possible_truncation)]
        let end = dll_name + DLL_NAME.len() as u32;
        // The jump operand must be 4-byte aligned
        let stub = align_to(end + 2, 4) - 2;
        Imports {
            directory,
            lookup,
            hint_name,
            dll_name,
            stub,
        }
    }

    fn end(&self) -> u32 {
        self.stub + 6
    }
}

/// Write the complete image of one module.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the metadata does not serialize to the size it
/// was laid out with.
#[allow(clippy::too_many_lines)]
pub(crate) fn write_image(
    layout: &PeLayout,
    mut content: ModuleContent,
    win32_resources: &[ResourceEntry],
    options: &SaveOptions,
) -> Result<Vec<u8>> {
    let text_rva = layout.text_rva();
    let cli_offset = layout.iat_size();
    let body_offset = cli_offset + COR20_HEADER_SIZE;
    #[allow(clippy::cast_possible_truncation)]
    let (bodies_size, resources_size) = (content.bodies.len() as u32, content.resources.len() as u32);
    let resource_offset = align_to(body_offset + bodies_size, 8);
    let strong_name_offset = align_to(resource_offset + resources_size, 8);
    let metadata_offset = align_to(strong_name_offset + content.strong_name_size, 4);
    #[allow(clippy::cast_possible_truncation)]
    let metadata_size = content.metadata_size(&options.runtime_version) as u32;
    let imports = layout
        .imports
        .then(|| Imports::new(metadata_offset + metadata_size));
    let text_size = imports
        .as_ref()
        .map_or(metadata_offset + metadata_size, Imports::end);

    let mut next_rva = align_to(text_rva + text_size, layout.section_alignment);
    let mut allocate = |size: usize| {
        let rva = next_rva;
        #[allow(clippy::cast_possible_truncation)]
        let size = size as u32;
        next_rva = align_to(rva + size, layout.section_alignment);
        rva
    };

    let field_data_rva = if layout.field_data {
        allocate(content.field_data.len())
    } else {
        0
    };
    let resource_section = if layout.win32_resources {
        let size = win32res::build_section(win32_resources, 0).len();
        let rva = allocate(size);
        Some((rva, win32res::build_section(win32_resources, rva)))
    } else {
        None
    };
    let reloc_rva = if layout.imports { allocate(12) } else { 0 };

    let metadata = content.metadata(field_data_rva, &options.runtime_version)?;
    if metadata.len() != metadata_size as usize {
        return Err(malformed_error!(
            "Metadata size mismatch - laid out {}, written {}",
            metadata_size,
            metadata.len()
        ));
    }

    let image_base = layout.image_base(options.file_kind);
    let is_dll = options.file_kind == PEFileKinds::Dll;

    // .text
    let mut text = Vec::with_capacity(text_size as usize);
    if let Some(imports) = &imports {
        text.write_le::<u32>(text_rva + imports.hint_name);
        text.write_le::<u32>(0);
    }
    let cli_header = Cor20Header {
        major_runtime_version: 2,
        minor_runtime_version: 5,
        meta_data_rva: text_rva + metadata_offset,
        meta_data_size: metadata_size,
        flags: cli_flags(options.pe_kind),
        entry_point_token: content.entry_point,
        resource_rva: if resources_size > 0 {
            text_rva + resource_offset
        } else {
            0
        },
        resource_size: resources_size,
        strong_name_signature_rva: if content.strong_name_size > 0 {
            text_rva + strong_name_offset
        } else {
            0
        },
        strong_name_signature_size: content.strong_name_size,
    };
    text.extend_from_slice(&cli_header.write());
    text.extend_from_slice(&content.bodies);
    text.resize(resource_offset as usize, 0);
    text.extend_from_slice(&content.resources);
    text.resize((strong_name_offset + content.strong_name_size) as usize, 0);
    text.resize(metadata_offset as usize, 0);
    text.extend_from_slice(&metadata);

    if let Some(imports) = &imports {
        text.resize(imports.directory as usize, 0);
        text.write_le::<u32>(text_rva + imports.lookup);
        text.write_le::<u32>(0);
        text.write_le::<u32>(0);
        text.write_le::<u32>(text_rva + imports.dll_name);
        text.write_le::<u32>(text_rva);
        text.resize((imports.directory + IMPORT_DIRECTORY_SIZE) as usize, 0);

        text.write_le::<u32>(text_rva + imports.hint_name);
        text.write_le::<u32>(0);

        text.write_le::<u16>(0);
        text.extend_from_slice(if is_dll {
            b"_CorDllMain\0"
        } else {
            b"_CorExeMain\0"
        });
        text.extend_from_slice(DLL_NAME);
        text.resize(imports.stub as usize, 0);
        text.extend_from_slice(&[0xFF, 0x25]);
        #[allow(clippy::cast_possible_truncation)]
        let iat = (image_base as u32).wrapping_add(text_rva);
        text.write_le::<u32>(iat);
    }

    let mut sections = vec![Section {
        name: b".text\0\0\0",
        characteristics: IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ,
        rva: text_rva,
        data: text,
    }];
    if layout.field_data {
        sections.push(Section {
            name: b".sdata\0\0",
            characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA
                | IMAGE_SCN_MEM_READ
                | IMAGE_SCN_MEM_WRITE,
            rva: field_data_rva,
            data: std::mem::take(&mut content.field_data),
        });
    }
    if let Some((rva, data)) = resource_section {
        sections.push(Section {
            name: b".rsrc\0\0\0",
            characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
            rva,
            data,
        });
    }
    if let Some(imports) = &imports {
        let fixup = text_rva + imports.stub + 2;
        let mut reloc = Vec::with_capacity(12);
        reloc.write_le::<u32>(fixup & !0xFFF);
        reloc.write_le::<u32>(12);
        #[allow(clippy::cast_possible_truncation)]
        let entry = (3 << 12) | (fixup & 0xFFF) as u16;
        reloc.write_le::<u16>(entry);
        reloc.write_le::<u16>(0);
        sections.push(Section {
            name: b".reloc\0\0",
            characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA
                | IMAGE_SCN_MEM_DISCARDABLE
                | IMAGE_SCN_MEM_READ,
            rva: reloc_rva,
            data: reloc,
        });
    }

    let headers_size = align_to(layout.headers_size(), layout.file_alignment);
    let mut raw_offsets = Vec::with_capacity(sections.len());
    let mut raw_offset = headers_size;
    for section in &sections {
        raw_offsets.push(raw_offset);
        #[allow(clippy::cast_possible_truncation)]
        let raw_size = align_to(section.data.len() as u32, layout.file_alignment);
        raw_offset += raw_size;
    }
    let file_size = raw_offset;
    let raw_size = |section: &Section| {
        #[allow(clippy::cast_possible_truncation)]
        let size = align_to(section.data.len() as u32, layout.file_alignment);
        size
    };
    let image_size = sections.last().map_or(headers_size, |section| {
        #[allow(clippy::cast_possible_truncation)]
        let end = section.rva + section.data.len() as u32;
        align_to(end, layout.section_alignment)
    });

    let mut image = Vec::with_capacity(file_size as usize);
    image.extend_from_slice(&dos_header());
    image.extend_from_slice(b"PE\0\0");

    // COFF header
    let mut characteristics: u16 = 0x0002;
    characteristics |= if layout.pe32_plus { 0x0020 } else { 0x0100 };
    if is_dll {
        characteristics |= 0x2000;
    }
    image.write_le::<u16>(options.machine as u16);
    #[allow(clippy::cast_possible_truncation)]
    let section_count = sections.len() as u16;
    image.write_le::<u16>(section_count);
    image.write_le::<u32>(options.timestamp);
    image.write_le::<u32>(0);
    image.write_le::<u32>(0);
    #[allow(clippy::cast_possible_truncation)]
    let optional_header_size = layout.optional_header_size() as u16;
    image.write_le::<u16>(optional_header_size);
    image.write_le::<u16>(characteristics);

    // Optional header, standard fields
    image.write_le::<u16>(if layout.pe32_plus { 0x20B } else { 0x10B });
    image.push(8);
    image.push(0);
    image.write_le::<u32>(raw_size(&sections[0]));
    image.write_le::<u32>(sections[1..].iter().map(raw_size).sum::<u32>());
    image.write_le::<u32>(0);
    image.write_le::<u32>(imports.as_ref().map_or(0, |imports| text_rva + imports.stub));
    image.write_le::<u32>(text_rva);
    if layout.pe32_plus {
        image.write_le::<u64>(image_base);
    } else {
        image.write_le::<u32>(sections.get(1).map_or(0, |section| section.rva));
        #[allow(clippy::cast_possible_truncation)]
        let base = image_base as u32;
        image.write_le::<u32>(base);
    }

    // Windows specific fields
    image.write_le::<u32>(layout.section_alignment);
    image.write_le::<u32>(layout.file_alignment);
    image.write_le::<u16>(4);
    image.write_le::<u16>(0);
    image.write_le::<u16>(0);
    image.write_le::<u16>(0);
    image.write_le::<u16>(4);
    image.write_le::<u16>(0);
    image.write_le::<u32>(0);
    image.write_le::<u32>(image_size);
    image.write_le::<u32>(headers_size);
    image.write_le::<u32>(0);
    image.write_le::<u16>(if options.file_kind == PEFileKinds::WindowApplication {
        2
    } else {
        3
    });
    image.write_le::<u16>(0x8540);
    for value in [0x10_0000_u64, 0x1000, 0x10_0000, 0x1000] {
        if layout.pe32_plus {
            image.write_le::<u64>(value);
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let value = value as u32;
            image.write_le::<u32>(value);
        }
    }
    image.write_le::<u32>(0);
    image.write_le::<u32>(16);

    // Data directories
    let mut directories = [(0_u32, 0_u32); 16];
    if let Some(imports) = &imports {
        directories[1] = (text_rva + imports.directory, IMPORT_DIRECTORY_SIZE);
        directories[5] = (reloc_rva, 12);
        directories[12] = (text_rva, 8);
    }
    if let Some(section) = sections.iter().find(|section| section.name == b".rsrc\0\0\0") {
        #[allow(clippy::cast_possible_truncation)]
        let size = section.data.len() as u32;
        directories[2] = (section.rva, size);
    }
    directories[14] = (text_rva + cli_offset, COR20_HEADER_SIZE);
    for (rva, size) in directories {
        image.write_le::<u32>(rva);
        image.write_le::<u32>(size);
    }

    // Section headers
    for (section, raw_offset) in sections.iter().zip(&raw_offsets) {
        image.extend_from_slice(section.name);
        #[allow(clippy::cast_possible_truncation)]
        let virtual_size = section.data.len() as u32;
        image.write_le::<u32>(virtual_size);
        image.write_le::<u32>(section.rva);
        image.write_le::<u32>(raw_size(section));
        image.write_le::<u32>(*raw_offset);
        image.write_le::<u32>(0);
        image.write_le::<u32>(0);
        image.write_le::<u16>(0);
        image.write_le::<u16>(0);
        image.write_le::<u32>(section.characteristics);
    }

    for (section, raw_offset) in sections.iter().zip(&raw_offsets) {
        image.resize(*raw_offset as usize, 0);
        image.extend_from_slice(&section.data);
    }
    image.resize(file_size as usize, 0);

    let checksum = pe_checksum(&image, CHECKSUM_OFFSET);
    image[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());

    debug!(
        "Image: {} sections, {} bytes, metadata at {:#x}",
        sections.len(),
        image.len(),
        text_rva + metadata_offset
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos_stub() {
        let header = dos_header();
        assert_eq!(header.len(), 0x80);
        assert_eq!(&header[..2], b"MZ");
        assert_eq!(&header[0x3C..0x40], &[0x80, 0, 0, 0]);
    }

    #[test]
    fn checksum_skips_its_own_field() {
        let mut image = vec![0x01, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x02, 0x00];
        assert_eq!(pe_checksum(&image, 2), 1 + 2 + 8);
        image[2] = 0;
        assert_eq!(pe_checksum(&image, 2), 1 + 2 + 8);
        // Carries fold back into the low word
        assert_eq!(pe_checksum(&[0xFF, 0xFF, 0x02, 0x00], 8), 2 + 4);
    }

    #[test]
    fn alignment_is_validated() {
        let options = SaveOptions::new().with_file_alignment(0x300);
        assert!(matches!(
            PeLayout::new(&options, false, false),
            Err(crate::Error::InvalidArgument { .. })
        ));
        let options = SaveOptions::new().with_file_alignment(0x100);
        assert!(PeLayout::new(&options, false, false).is_err());
        let options = SaveOptions::new().with_file_alignment(0x1000);
        assert!(PeLayout::new(&options, false, false).is_ok());
    }

    #[test]
    fn geometry() {
        let layout = PeLayout::new(&SaveOptions::new(), false, false).unwrap();
        // text + reloc
        assert_eq!(layout.section_count(), 2);
        assert_eq!(layout.headers_size(), 0x80 + 4 + 20 + 224 + 80);
        assert_eq!(layout.text_rva(), 0x2000);
        assert_eq!(layout.body_rva(), 0x2000 + 8 + 72);

        let options = SaveOptions::new().with_machine(crate::config::ImageFileMachine::Amd64);
        let layout = PeLayout::new(&options, true, true).unwrap();
        assert_eq!(layout.section_count(), 3);
        assert_eq!(layout.body_rva(), 0x2000 + 72);
        assert_eq!(layout.image_base(PEFileKinds::ConsoleApplication), 0x1_4000_0000);
    }

    #[test]
    fn stub_operand_is_aligned() {
        for start in 0x100..0x110 {
            let imports = Imports::new(start);
            assert_eq!((imports.stub + 2) % 4, 0);
            assert!(imports.stub >= imports.dll_name + 12);
        }
    }

    #[test]
    fn flags() {
        assert_eq!(
            cli_flags(PortableExecutableKinds::IL_ONLY | PortableExecutableKinds::PREFERRED_32BIT),
            ComImageFlags::IL_ONLY | ComImageFlags::REQUIRED_32BIT | ComImageFlags::PREFERRED_32BIT
        );
        assert_eq!(cli_flags(PortableExecutableKinds::IL_ONLY), ComImageFlags::IL_ONLY);
    }
}
