//! Evidence about a saved assembly.
//!
//! A trust policy decides what code may do from facts about where it came from. Two of
//! those facts come straight out of [`AssemblyBuilder::save`]: the strong name of the
//! manifest and the hash of the bytes that were written. The value objects here carry
//! them in the shape a policy engine consumes, including the XML form policy files use.
//!
//! ```rust,no_run
//! use dotemit::{emit::{AssemblyBuilder, AssemblyBuilderAccess}, evidence::Hash};
//! use dotemit::metadata::identity::AssemblyName;
//!
//! let mut asm = AssemblyBuilder::new(AssemblyName::new("Tool"), AssemblyBuilderAccess::Save);
//! asm.define_persistent_module("Tool", "Tool.dll")?;
//! asm.save("Tool.dll")?;
//!
//! let hash = Hash::from_assembly(&asm)?;
//! println!("{}", hash.to_xml()?);
//! # Ok::<(), dotemit::Error>(())
//! ```

use std::fmt;

use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Writer,
};

use crate::{
    emit::AssemblyBuilder,
    metadata::identity::AssemblyVersion,
    utils::{compute_md5, compute_sha1},
    Result,
};

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

fn finish(writer: Writer<Vec<u8>>) -> String {
    String::from_utf8_lossy(&writer.into_inner()).into_owned()
}

/// The public key of a strong name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrongNamePublicKeyBlob {
    key: Vec<u8>,
}

impl StrongNamePublicKeyBlob {
    /// Wrap a public key blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(invalid_argument!("key", "Public key blob is empty"));
        }
        Ok(StrongNamePublicKeyBlob { key: key.to_vec() })
    }

    /// The key bytes.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

/// Upper case hex of the key, the form policy files store.
impl fmt::Display for StrongNamePublicKeyBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.key))
    }
}

/// Strong name evidence: public key, simple name and version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrongName {
    /// The public key
    pub public_key: StrongNamePublicKeyBlob,
    /// Simple name of the assembly
    pub name: String,
    /// Version of the assembly
    pub version: AssemblyVersion,
}

impl StrongName {
    /// Create strong name evidence.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty name.
    pub fn new(public_key: StrongNamePublicKeyBlob, name: &str, version: AssemblyVersion) -> Result<Self> {
        if name.is_empty() {
            return Err(invalid_argument!("name", "Strong name requires a name"));
        }
        Ok(StrongName {
            public_key,
            name: name.to_string(),
            version,
        })
    }

    /// The strong name of a saved assembly, `None` if it has no public key.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the assembly has not been saved.
    pub fn from_assembly(asm: &AssemblyBuilder) -> Result<Option<Self>> {
        if !asm.is_saved() {
            return Err(invalid_operation!(
                "Strong name evidence requires a saved assembly"
            ));
        }
        let name = asm.name();
        match &name.public_key {
            Some(key) if !key.is_empty() => Ok(Some(StrongName::new(
                StrongNamePublicKeyBlob::new(key)?,
                &name.name,
                name.version,
            )?)),
            _ => Ok(None),
        }
    }

    /// The `<StrongName>` element.
    ///
    /// # Errors
    /// Returns an error if writing the XML fails.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        let key = self.public_key.to_string();
        let version = self.version.to_string();

        let mut element = BytesStart::new("StrongName");
        element.push_attribute(("version", "1"));
        element.push_attribute(("Key", key.as_str()));
        element.push_attribute(("Name", self.name.as_str()));
        element.push_attribute(("Version", version.as_str()));
        writer.write_event(Event::Empty(element))?;
        Ok(finish(writer))
    }
}

/// Hash evidence over the bytes of an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hash {
    raw_data: Vec<u8>,
}

impl Hash {
    /// Hash evidence over `data`.
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Hash {
            raw_data: data.to_vec(),
        }
    }

    /// Hash evidence over the manifest image written by the last save.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the assembly has not been saved.
    pub fn from_assembly(asm: &AssemblyBuilder) -> Result<Self> {
        match asm.saved_image() {
            Some(image) => Ok(Hash::new(image)),
            None => Err(invalid_operation!("Hash evidence requires a saved assembly")),
        }
    }

    /// The hashed bytes.
    #[must_use]
    pub fn raw_data(&self) -> &[u8] {
        &self.raw_data
    }

    /// SHA-1 of the image.
    #[must_use]
    pub fn sha1(&self) -> Vec<u8> {
        compute_sha1(&self.raw_data)
    }

    /// MD5 of the image.
    #[must_use]
    pub fn md5(&self) -> Vec<u8> {
        compute_md5(&self.raw_data)
    }

    /// Returns true if `digest` is the SHA-1 or MD5 of the image.
    #[must_use]
    pub fn matches(&self, digest: &[u8]) -> bool {
        match digest.len() {
            20 => self.sha1() == digest,
            16 => self.md5() == digest,
            _ => false,
        }
    }

    /// The `<System.Security.Policy.Hash>` element with the image in `RawData`.
    ///
    /// # Errors
    /// Returns an error if writing the XML fails.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        let mut root = BytesStart::new("System.Security.Policy.Hash");
        root.push_attribute(("version", "1"));
        writer.write_event(Event::Start(root))?;
        writer.write_event(Event::Start(BytesStart::new("RawData")))?;
        writer.write_event(Event::Text(BytesText::new(&hex(&self.raw_data))))?;
        writer.write_event(Event::End(BytesEnd::new("RawData")))?;
        writer.write_event(Event::End(BytesEnd::new("System.Security.Policy.Hash")))?;
        Ok(finish(writer))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{
        emit::AssemblyBuilderAccess,
        metadata::identity::{AssemblyName, StrongNameKeyPair},
    };

    fn version() -> AssemblyVersion {
        AssemblyVersion {
            major: 1,
            minor: 0,
            build: 0,
            revision: 0,
        }
    }

    #[test]
    fn strong_name_xml() {
        let key = StrongNamePublicKeyBlob::new(&[0x00, 0x24, 0xAB]).unwrap();
        assert_eq!(key.to_string(), "0024AB");

        let name = StrongName::new(key, "Tool & Co", version()).unwrap();
        assert_eq!(
            name.to_xml().unwrap(),
            r#"<StrongName version="1" Key="0024AB" Name="Tool &amp; Co" Version="1.0.0.0"/>"#
        );
        assert!(StrongNamePublicKeyBlob::new(&[]).is_err());
    }

    #[test]
    fn hash_digests() {
        let hash = Hash::new(b"abc");
        assert_eq!(hash.sha1().len(), 20);
        assert!(hash.matches(&compute_md5(b"abc")));
        assert!(!hash.matches(&[0; 20]));
        assert_eq!(
            hash.to_xml().unwrap(),
            r#"<System.Security.Policy.Hash version="1"><RawData>616263</RawData></System.Security.Policy.Hash>"#
        );
    }

    #[test]
    fn evidence_after_save() {
        let dir = tempdir().unwrap();
        let mut key = vec![0x07, 0x02, 0, 0, 0, 0x24, 0, 0, b'R', b'S', b'A', b'2'];
        key.extend_from_slice(&1024_u32.to_le_bytes());
        key.extend_from_slice(&65537_u32.to_le_bytes());
        key.extend(std::iter::repeat(0x5A).take(128 + 64 * 5 + 128));
        let pair = StrongNameKeyPair::new(&key).unwrap();

        let mut asm = AssemblyBuilder::new(
            AssemblyName::new("Signed").with_key_pair(&pair),
            AssemblyBuilderAccess::Save,
        )
        .with_directory(dir.path());
        asm.define_persistent_module("Signed", "Signed.dll").unwrap();
        assert!(Hash::from_assembly(&asm).is_err());
        assert!(StrongName::from_assembly(&asm).is_err());

        let path = asm.save("Signed.dll").unwrap();
        let hash = Hash::from_assembly(&asm).unwrap();
        assert_eq!(hash.raw_data(), std::fs::read(path).unwrap().as_slice());

        let name = StrongName::from_assembly(&asm).unwrap().unwrap();
        assert_eq!(name.name, "Signed");
        assert_eq!(name.public_key.key(), pair.public_key());
    }
}
