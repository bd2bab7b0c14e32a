//! Assembly identity: name, version, culture, strong name key material.
//!
//! [`AssemblyName`] is the identity of an assembly under construction and of every
//! assembly it references. Its display form follows the usual
//! `Name, Version=a.b.c.d, Culture=neutral, PublicKeyToken=xxxxxxxxxxxxxxxx` layout.
//!
//! ```rust
//! use dotemit::metadata::identity::AssemblyName;
//!
//! let corlib = AssemblyName::parse(
//!     "mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089",
//! )?;
//! assert_eq!(corlib.name, "mscorlib");
//! assert_eq!(corlib.version.major, 4);
//! assert_eq!(corlib.public_key_token(), Some([0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89]));
//! # Ok::<(), dotemit::Error>(())
//! ```

use std::{fmt, fmt::Write, str::FromStr};

use crate::{
    file::io::read_le,
    metadata::flags::{AssemblyFlags, AssemblyHashAlgorithm},
    utils::compute_sha1,
    Error, Result,
};

/// Four-part version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AssemblyVersion {
    /// Major version component
    pub major: u16,
    /// Minor version component
    pub minor: u16,
    /// Build version component
    pub build: u16,
    /// Revision version component
    pub revision: u16,
}

impl AssemblyVersion {
    /// Create a version from its four components.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        AssemblyVersion {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parse `a[.b[.c[.d]]]`, missing components are zero.
    ///
    /// # Errors
    /// Returns an error if the version string has an invalid format.
    pub fn parse(version_str: &str) -> Result<Self> {
        let parts: Vec<&str> = version_str.split('.').collect();

        if parts.is_empty() || parts.len() > 4 {
            return Err(malformed_error!("Invalid version format: {}", version_str));
        }

        let mut components = [0u16; 4];
        for (i, part) in parts.iter().enumerate() {
            components[i] = part
                .parse::<u16>()
                .map_err(|_| malformed_error!("Invalid version component: {}", part))?;
        }

        Ok(Self::new(
            components[0],
            components[1],
            components[2],
            components[3],
        ))
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for AssemblyVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Strong name key material.
///
/// Only the public half is kept. Accepted inputs are a public key blob as stored in the
/// `Assembly` table, or a `PRIVATEKEYBLOB` (as found in `.snk` files) from which the
/// public key is derived. Assemblies saved with a key are delay signed: the image
/// reserves the signature area but does not fill it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrongNameKeyPair {
    public_key: Vec<u8>,
}

const CALG_RSA_SIGN: u32 = 0x0000_2400;
const PUBLICKEYBLOB: u8 = 0x06;
const PRIVATEKEYBLOB: u8 = 0x07;
const RSA2_MAGIC: u32 = 0x3241_5352;

impl StrongNameKeyPair {
    /// Create the key pair from a key blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the blob is neither a public key nor
    /// a private key blob.
    pub fn new(blob: &[u8]) -> Result<Self> {
        if blob.len() > 8 && blob[0] == PRIVATEKEYBLOB {
            return Self::from_private_key_blob(blob);
        }

        if blob.len() < 12 + 20 {
            return Err(invalid_argument!("keyPairArray", "Invalid key pair blob"));
        }
        let public_key_size = read_le::<u32>(&blob[8..])? as usize;
        if blob.len() != 12 + public_key_size || blob[12] != PUBLICKEYBLOB {
            return Err(invalid_argument!("keyPairArray", "Invalid public key blob"));
        }

        Ok(StrongNameKeyPair {
            public_key: blob.to_vec(),
        })
    }

    fn from_private_key_blob(blob: &[u8]) -> Result<Self> {
        // BLOBHEADER (8) + RSAPUBKEY (12) + modulus
        if blob.len() < 20 || read_le::<u32>(&blob[8..])? != RSA2_MAGIC {
            return Err(invalid_argument!("keyPairArray", "Invalid private key blob"));
        }
        let bit_length = read_le::<u32>(&blob[12..])? as usize;
        let modulus_end = 20 + bit_length / 8;
        if blob.len() < modulus_end {
            return Err(invalid_argument!("keyPairArray", "Truncated private key blob"));
        }

        let mut public_key = Vec::with_capacity(12 + modulus_end);
        public_key.extend_from_slice(&CALG_RSA_SIGN.to_le_bytes());
        public_key.extend_from_slice(&(AssemblyHashAlgorithm::Sha1 as u32).to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        let blob_length = modulus_end as u32;
        public_key.extend_from_slice(&blob_length.to_le_bytes());
        public_key.extend_from_slice(&[PUBLICKEYBLOB, 0x02, 0x00, 0x00]);
        public_key.extend_from_slice(&CALG_RSA_SIGN.to_le_bytes());
        public_key.extend_from_slice(b"RSA1");
        public_key.extend_from_slice(&blob[12..modulus_end]);

        Ok(StrongNameKeyPair { public_key })
    }

    /// The public key blob.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Size of the RSA modulus in bytes, which is also the signature size.
    #[must_use]
    pub fn signature_size(&self) -> usize {
        // 12 byte header + BLOBHEADER + RSAPUBKEY, bitlen at offset 12 + 8 + 4
        self.public_key
            .get(24..28)
            .and_then(|bytes| bytes.try_into().ok())
            .map_or(128, |bytes: [u8; 4]| u32::from_le_bytes(bytes) as usize / 8)
    }
}

/// Compute the public key token: the last 8 bytes of the SHA-1 hash, reversed.
#[must_use]
pub fn public_key_token(public_key: &[u8]) -> [u8; 8] {
    let hash = compute_sha1(public_key);
    let mut token = [0u8; 8];
    for (slot, byte) in token.iter_mut().zip(hash.iter().rev()) {
        *slot = *byte;
    }
    token
}

/// The identity of an assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyName {
    /// Simple name
    pub name: String,
    /// Version
    pub version: AssemblyVersion,
    /// Culture, `None` for culture neutral
    pub culture: Option<String>,
    /// Assembly flags
    pub flags: AssemblyFlags,
    /// Algorithm used to hash files of a multi-file assembly
    pub hash_algorithm: AssemblyHashAlgorithm,
    /// Full public key
    pub public_key: Option<Vec<u8>>,
    /// Public key token, used when the full key is not known
    pub token: Option<[u8; 8]>,
}

impl AssemblyName {
    /// Create a culture neutral, version 0.0.0.0 identity.
    pub fn new(name: impl Into<String>) -> Self {
        AssemblyName {
            name: name.into(),
            version: AssemblyVersion::default(),
            culture: None,
            flags: AssemblyFlags::empty(),
            hash_algorithm: AssemblyHashAlgorithm::Sha1,
            public_key: None,
            token: None,
        }
    }

    /// The core library every emitted assembly references.
    #[must_use]
    pub fn mscorlib() -> Self {
        AssemblyName {
            version: AssemblyVersion::new(4, 0, 0, 0),
            token: Some([0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89]),
            ..Self::new("mscorlib")
        }
    }

    /// Set the version.
    #[must_use]
    pub fn with_version(mut self, version: AssemblyVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the culture, `""` and `"neutral"` both mean culture neutral.
    #[must_use]
    pub fn with_culture(mut self, culture: &str) -> Self {
        self.culture = match culture {
            "" | "neutral" => None,
            other => Some(other.to_string()),
        };
        self
    }

    /// Set the public key from a key pair.
    #[must_use]
    pub fn with_key_pair(mut self, key_pair: &StrongNameKeyPair) -> Self {
        self.public_key = Some(key_pair.public_key().to_vec());
        self.flags |= AssemblyFlags::PUBLIC_KEY;
        self
    }

    /// The public key token, computed from the public key when one is set.
    #[must_use]
    pub fn public_key_token(&self) -> Option<[u8; 8]> {
        match &self.public_key {
            Some(key) if !key.is_empty() => Some(public_key_token(key)),
            _ => self.token,
        }
    }

    /// Returns true if the identity carries key material.
    #[must_use]
    pub fn is_strong_named(&self) -> bool {
        self.public_key_token().is_some()
    }

    /// Parse a display name.
    ///
    /// # Errors
    /// Returns an error if the display name cannot be parsed.
    pub fn parse(display_name: &str) -> Result<Self> {
        let parts: Vec<&str> = display_name.split(',').map(str::trim).collect();

        let name = parts.first().copied().unwrap_or_default();
        if name.is_empty() {
            return Err(malformed_error!("Assembly name cannot be empty"));
        }

        let mut result = AssemblyName::new(name);
        for part in parts.iter().skip(1) {
            if let Some(value) = part.strip_prefix("Version=") {
                result.version = AssemblyVersion::parse(value)?;
            } else if let Some(value) = part.strip_prefix("Culture=") {
                result = result.with_culture(value);
            } else if let Some(value) = part.strip_prefix("PublicKeyToken=") {
                if value != "null" && !value.is_empty() {
                    if value.len() != 16 || !value.is_ascii() {
                        return Err(malformed_error!("Invalid PublicKeyToken '{}'", value));
                    }
                    let mut token = [0u8; 8];
                    for (index, slot) in token.iter_mut().enumerate() {
                        *slot = u8::from_str_radix(&value[index * 2..index * 2 + 2], 16)
                            .map_err(|_| malformed_error!("Invalid PublicKeyToken '{}'", value))?;
                    }
                    result.token = Some(token);
                }
            }
        }

        Ok(result)
    }

    /// The display name.
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut result = String::with_capacity(self.name.len() + 80);
        result.push_str(&self.name);
        let _ = write!(result, ", Version={}", self.version);
        let _ = write!(
            result,
            ", Culture={}",
            self.culture.as_deref().unwrap_or("neutral")
        );

        result.push_str(", PublicKeyToken=");
        match self.public_key_token() {
            Some(token) => {
                for byte in token {
                    let _ = write!(result, "{byte:02x}");
                }
            }
            None => result.push_str("null"),
        }

        result
    }
}

impl fmt::Display for AssemblyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

impl FromStr for AssemblyName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn private_key_blob() -> Vec<u8> {
        let mut blob = vec![PRIVATEKEYBLOB, 0x02, 0x00, 0x00, 0x00, 0x24, 0x00, 0x00];
        blob.extend_from_slice(b"RSA2");
        blob.extend_from_slice(&1024u32.to_le_bytes());
        blob.extend_from_slice(&65537u32.to_le_bytes());
        blob.extend((0..128).map(|value| value as u8));
        // private parts, ignored
        blob.extend(std::iter::repeat(0xAA).take(64));
        blob
    }

    #[test]
    fn display_round_trip() {
        let name = AssemblyName::new("Sample")
            .with_version(AssemblyVersion::new(1, 2, 3, 4))
            .with_culture("en-US");
        assert_eq!(
            name.display_name(),
            "Sample, Version=1.2.3.4, Culture=en-US, PublicKeyToken=null"
        );
        assert_eq!(AssemblyName::parse(&name.display_name()).unwrap(), name);

        let corlib = AssemblyName::mscorlib();
        assert_eq!(
            corlib.to_string(),
            "mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089"
        );
    }

    #[test]
    fn parse_errors() {
        assert!(AssemblyName::parse("").is_err());
        assert!(AssemblyName::parse("A, Version=1.x").is_err());
        assert!(AssemblyName::parse("A, PublicKeyToken=abc").is_err());
        assert!(AssemblyVersion::parse("1.2.3.4.5").is_err());
        assert_eq!(
            AssemblyVersion::parse("2.1").unwrap(),
            AssemblyVersion::new(2, 1, 0, 0)
        );
    }

    #[test]
    fn key_pair() {
        let key_pair = StrongNameKeyPair::new(&private_key_blob()).unwrap();
        let public_key = key_pair.public_key();
        assert_eq!(public_key.len(), 12 + 20 + 128);
        assert_eq!(&public_key[12..14], &[PUBLICKEYBLOB, 0x02]);
        assert_eq!(&public_key[20..24], b"RSA1");
        assert_eq!(key_pair.signature_size(), 128);

        // The derived public key is accepted as is
        assert_eq!(StrongNameKeyPair::new(public_key).unwrap(), key_pair);
        assert!(StrongNameKeyPair::new(&[1, 2, 3]).is_err());

        let name = AssemblyName::new("Signed").with_key_pair(&key_pair);
        assert!(name.flags.contains(AssemblyFlags::PUBLIC_KEY));
        assert_eq!(name.public_key_token(), Some(public_key_token(public_key)));
        assert!(name.is_strong_named());
    }
}
