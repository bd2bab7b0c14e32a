//! Compiled Win32 resources.
//!
//! Reads the `.res` file format produced by resource compilers and lays its entries out
//! as the three level resource directory of a `.rsrc` section (type, name, language).

use std::collections::BTreeMap;

use crate::{
    file::io::{read_le_at, WriteLe},
    utils::pad_to,
    Result,
};

/// Type or name of a resource: either an ordinal or a string.
///
/// Named entries order before ordinals, as the resource directory requires.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ResourceName {
    Name(String),
    Id(u16),
}

/// One resource of a `.res` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResourceEntry {
    pub kind: ResourceName,
    pub name: ResourceName,
    pub language: u16,
    pub data: Vec<u8>,
}

fn read_name(data: &[u8], offset: &mut usize) -> Result<ResourceName> {
    let first = read_le_at::<u16>(data, offset)?;
    if first == 0xFFFF {
        return Ok(ResourceName::Id(read_le_at::<u16>(data, offset)?));
    }

    let mut units = Vec::new();
    let mut unit = first;
    while unit != 0 {
        units.push(unit);
        unit = read_le_at::<u16>(data, offset)?;
    }
    Ok(ResourceName::Name(String::from_utf16_lossy(&units)))
}

/// Parse a `.res` file.
///
/// The file must start with the empty 32 byte entry that marks the format. Entries with
/// a zero type are skipped.
///
/// # Errors
/// Returns [`crate::Error::InvalidArgument`] if the data is not a well formed `.res` file.
pub(crate) fn parse_res(data: &[u8]) -> Result<Vec<ResourceEntry>> {
    let invalid = |reason: &str| invalid_argument!("resource", "Invalid .res file - {}", reason);

    if data.len() < 32 || data[..8] != [0, 0, 0, 0, 32, 0, 0, 0] {
        return Err(invalid("missing the leading empty entry"));
    }

    let mut entries = Vec::new();
    let mut start = 32;
    while start < data.len() {
        if data.len() - start < 8 {
            return Err(invalid("truncated entry header"));
        }
        let mut offset = start;
        let data_size = read_le_at::<u32>(data, &mut offset)? as usize;
        let header_size = read_le_at::<u32>(data, &mut offset)? as usize;
        let (kind, name) = match (read_name(data, &mut offset), read_name(data, &mut offset)) {
            (Ok(kind), Ok(name)) => (kind, name),
            _ => return Err(invalid("truncated entry name")),
        };
        offset = (offset + 3) & !3;

        // DataVersion, MemoryFlags, LanguageId, Version, Characteristics
        let Some(fixed) = data.get(offset..offset + 16) else {
            return Err(invalid("truncated entry header"));
        };
        let language = u16::from_le_bytes([fixed[6], fixed[7]]);
        if offset + 16 > start + header_size {
            return Err(invalid("header size too small"));
        }

        let data_start = start + header_size;
        let Some(payload) = data_start
            .checked_add(data_size)
            .and_then(|end| data.get(data_start..end))
        else {
            return Err(invalid("entry data past the end of the file"));
        };

        if kind != ResourceName::Id(0) {
            entries.push(ResourceEntry {
                kind,
                name,
                language,
                data: payload.to_vec(),
            });
        }
        start = (data_start + data_size + 3) & !3;
    }

    if entries.is_empty() {
        return Err(invalid("no resources"));
    }
    Ok(entries)
}

type LanguageMap<'a> = BTreeMap<u16, &'a ResourceEntry>;
type NameMap<'a> = BTreeMap<&'a ResourceName, LanguageMap<'a>>;

#[allow(clippy::cast_possible_truncation)]
fn directory_size(entries: usize) -> u32 {
    16 + 8 * entries as u32
}

/// Write a directory header followed by its `(name, target)` entries. Named entries must
/// come first.
fn write_directory(buffer: &mut Vec<u8>, entries: &[(u32, u32)]) {
    let named = entries
        .iter()
        .filter(|(name, _)| name & 0x8000_0000 != 0)
        .count();

    buffer.write_le::<u32>(0);
    buffer.write_le::<u32>(0);
    buffer.write_le::<u16>(0);
    buffer.write_le::<u16>(0);
    #[allow(clippy::cast_possible_truncation)]
    let (named, ids) = (named as u16, (entries.len() - named) as u16);
    buffer.write_le::<u16>(named);
    buffer.write_le::<u16>(ids);
    for (name, target) in entries {
        buffer.write_le::<u32>(*name);
        buffer.write_le::<u32>(*target);
    }
}

/// Lays out the strings of named entries and hands out the directory name fields.
struct StringTable {
    base: u32,
    bytes: Vec<u8>,
}

impl StringTable {
    fn name_field(&mut self, key: &ResourceName) -> u32 {
        match key {
            ResourceName::Id(id) => u32::from(*id),
            ResourceName::Name(name) => {
                #[allow(clippy::cast_possible_truncation)]
                let offset = self.base + self.bytes.len() as u32;
                let units: Vec<u16> = name.encode_utf16().collect();
                #[allow(clippy::cast_possible_truncation)]
                let length = units.len() as u16;
                self.bytes.write_le::<u16>(length);
                for unit in units {
                    self.bytes.write_le::<u16>(unit);
                }
                0x8000_0000 | offset
            }
        }
    }
}

/// Build the contents of a `.rsrc` section placed at `rva`.
///
/// Layout: all directories (breadth first), the name strings, the data entries, then
/// the resource data aligned to 8 bytes.
pub(crate) fn build_section(entries: &[ResourceEntry], rva: u32) -> Vec<u8> {
    let mut tree: BTreeMap<&ResourceName, NameMap<'_>> = BTreeMap::new();
    for entry in entries {
        tree.entry(&entry.kind)
            .or_default()
            .entry(&entry.name)
            .or_default()
            .insert(entry.language, entry);
    }

    let mut offset = directory_size(tree.len());
    let mut name_directories = Vec::with_capacity(tree.len());
    for names in tree.values() {
        name_directories.push(offset);
        offset += directory_size(names.len());
    }
    let mut language_directories = Vec::new();
    for languages in tree.values().flat_map(BTreeMap::values) {
        language_directories.push(offset);
        offset += directory_size(languages.len());
    }

    let mut strings = StringTable {
        base: offset,
        bytes: Vec::new(),
    };
    let root: Vec<(u32, u32)> = tree
        .keys()
        .zip(&name_directories)
        .map(|(kind, directory)| (strings.name_field(kind), 0x8000_0000 | directory))
        .collect();
    let mut language_cursor = language_directories.iter();
    let name_levels: Vec<Vec<(u32, u32)>> = tree
        .values()
        .map(|names| {
            names
                .keys()
                .map(|name| {
                    let directory = language_cursor.next().copied().unwrap_or(0);
                    (strings.name_field(name), 0x8000_0000 | directory)
                })
                .collect()
        })
        .collect();
    pad_to(&mut strings.bytes, 4);
    #[allow(clippy::cast_possible_truncation)]
    let strings_size = strings.bytes.len() as u32;
    offset += strings_size;

    let leaves: Vec<&ResourceEntry> = tree
        .values()
        .flat_map(BTreeMap::values)
        .flat_map(BTreeMap::values)
        .copied()
        .collect();
    let data_entries = offset;
    #[allow(clippy::cast_possible_truncation)]
    let data_entries_size = 16 * leaves.len() as u32;
    offset += data_entries_size;
    let mut data_offsets = Vec::with_capacity(leaves.len());
    for leaf in &leaves {
        offset = (offset + 7) & !7;
        data_offsets.push(offset);
        #[allow(clippy::cast_possible_truncation)]
        let length = leaf.data.len() as u32;
        offset += length;
    }

    let mut buffer = Vec::with_capacity(offset as usize);
    write_directory(&mut buffer, &root);
    for level in &name_levels {
        write_directory(&mut buffer, level);
    }
    let mut leaf_index = 0_u32;
    for languages in tree.values().flat_map(BTreeMap::values) {
        let level: Vec<(u32, u32)> = languages
            .keys()
            .map(|language| {
                let target = data_entries + 16 * leaf_index;
                leaf_index += 1;
                (u32::from(*language), target)
            })
            .collect();
        write_directory(&mut buffer, &level);
    }

    buffer.extend_from_slice(&strings.bytes);
    for (leaf, data_offset) in leaves.iter().zip(&data_offsets) {
        buffer.write_le::<u32>(rva + data_offset);
        #[allow(clippy::cast_possible_truncation)]
        let length = leaf.data.len() as u32;
        buffer.write_le::<u32>(length);
        buffer.write_le::<u32>(0);
        buffer.write_le::<u32>(0);
    }
    for (leaf, data_offset) in leaves.iter().zip(&data_offsets) {
        buffer.resize(*data_offset as usize, 0);
        buffer.extend_from_slice(&leaf.data);
    }
    pad_to(&mut buffer, 4);
    buffer
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn push_entry(buffer: &mut Vec<u8>, kind: u16, name: &str, language: u16, data: &[u8]) {
        let mut header = Vec::new();
        header.write_le::<u16>(0xFFFF);
        header.write_le::<u16>(kind);
        for unit in name.encode_utf16() {
            header.write_le::<u16>(unit);
        }
        header.write_le::<u16>(0);
        pad_to(&mut header, 4);
        header.write_le::<u32>(0);
        header.write_le::<u16>(0x1030);
        header.write_le::<u16>(language);
        header.write_le::<u32>(0);
        header.write_le::<u32>(0);

        #[allow(clippy::cast_possible_truncation)]
        let (data_size, header_size) = (data.len() as u32, header.len() as u32 + 8);
        buffer.write_le::<u32>(data_size);
        buffer.write_le::<u32>(header_size);
        buffer.extend_from_slice(&header);
        buffer.extend_from_slice(data);
        pad_to(buffer, 4);
    }

    /// A `.res` file with a named version resource and a numbered string table.
    pub(crate) fn sample_res() -> Vec<u8> {
        let mut buffer = vec![0, 0, 0, 0, 32, 0, 0, 0, 0xFF, 0xFF, 0, 0, 0xFF, 0xFF, 0, 0];
        buffer.resize(32, 0);
        push_entry(&mut buffer, 16, "VERSION", 0x0409, b"version-data");
        buffer.write_le::<u32>(3);
        buffer.write_le::<u32>(32);
        for unit in [0xFFFF_u16, 6, 0xFFFF, 7] {
            buffer.write_le::<u16>(unit);
        }
        buffer.write_le::<u32>(0);
        buffer.write_le::<u16>(0);
        buffer.write_le::<u16>(0x0409);
        buffer.write_le::<u32>(0);
        buffer.write_le::<u32>(0);
        buffer.extend_from_slice(&[1, 2, 3]);
        pad_to(&mut buffer, 4);
        buffer
    }

    #[test]
    fn parse() {
        let entries = parse_res(&sample_res()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, ResourceName::Id(16));
        assert_eq!(entries[0].name, ResourceName::Name("VERSION".to_string()));
        assert_eq!(entries[0].language, 0x0409);
        assert_eq!(entries[0].data, b"version-data");
        assert_eq!(entries[1].name, ResourceName::Id(7));
        assert_eq!(entries[1].data, vec![1, 2, 3]);
    }

    #[test]
    fn invalid() {
        assert!(parse_res(&[1, 2, 3]).is_err());
        assert!(parse_res(&[0; 32]).is_err());

        let mut truncated = sample_res();
        truncated.truncate(50);
        assert!(parse_res(&truncated).is_err());

        let mut only_header = sample_res();
        only_header.truncate(32);
        assert!(parse_res(&only_header).is_err());
    }

    #[test]
    fn section_layout() {
        let entries = parse_res(&sample_res()).unwrap();
        let section = build_section(&entries, 0x4000);

        // Root: no named types, two id types (6 and 16)
        assert_eq!(&section[12..16], &[0, 0, 2, 0]);
        let mut cursor = 16;
        assert_eq!(read_le_at::<u32>(&section, &mut cursor).unwrap(), 6);
        let subdirectory = read_le_at::<u32>(&section, &mut cursor).unwrap();
        assert_eq!(subdirectory & 0x8000_0000, 0x8000_0000);

        // Name level of type 16 holds the single named entry
        let mut offset = 24;
        assert_eq!(read_le_at::<u32>(&section, &mut offset).unwrap(), 16);
        let version = (read_le_at::<u32>(&section, &mut offset).unwrap() & 0x7FFF_FFFF) as usize;
        assert_eq!(&section[version + 12..version + 16], &[1, 0, 0, 0]);
        let mut cursor = version + 16;
        let string = (read_le_at::<u32>(&section, &mut cursor).unwrap() & 0x7FFF_FFFF) as usize;
        let mut cursor = string;
        assert_eq!(read_le_at::<u16>(&section, &mut cursor).unwrap(), 7);
        assert_eq!(&section[string + 2..string + 4], &[b'V', 0]);

        let needle = b"version-data";
        let position = section
            .windows(needle.len())
            .position(|window| window == needle)
            .unwrap();
        assert_eq!(position % 8, 0);
    }
}
