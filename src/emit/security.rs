//! Declarative security permission sets.
//!
//! A permission set is attached to a type or method with an action through
//! `add_declarative_security`. It is stored in the `DeclSecurity` table in the legacy XML
//! format: the UTF-16LE text of a `<PermissionSet>` element.

use quick_xml::{
    events::{BytesEnd, BytesStart, Event},
    Reader, Writer,
};

use crate::Result;

const PERMISSION_SET_CLASS: &str = "System.Security.PermissionSet";

/// One `<IPermission>` entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    /// Assembly qualified name of the permission class
    pub class: String,
    /// Remaining attributes in document order, `class` and `version` excluded
    pub attributes: Vec<(String, String)>,
}

/// A set of code access permissions.
///
/// ```rust
/// use dotemit::emit::PermissionSet;
///
/// let set = PermissionSet::from_xml(
///     r#"<PermissionSet class="System.Security.PermissionSet" version="1">
///          <IPermission class="System.Security.Permissions.SecurityPermission, mscorlib"
///                       version="1" Flags="UnmanagedCode"/>
///        </PermissionSet>"#,
/// )?;
/// assert!(!set.is_unrestricted());
/// assert_eq!(set.permissions()[0].attributes[0], ("Flags".into(), "UnmanagedCode".into()));
///
/// assert!(PermissionSet::from_xml("<PermissionSet>").is_err());
/// # Ok::<(), dotemit::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PermissionSet {
    unrestricted: bool,
    permissions: Vec<Permission>,
}

impl PermissionSet {
    /// A set without permissions.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The unrestricted set.
    #[must_use]
    pub fn unrestricted() -> Self {
        PermissionSet {
            unrestricted: true,
            permissions: Vec::new(),
        }
    }

    /// Add a permission.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty class name.
    pub fn with_permission(mut self, class: &str, attributes: &[(&str, &str)]) -> Result<Self> {
        if class.is_empty() {
            return Err(invalid_argument!("class", "Empty permission class"));
        }
        self.permissions.push(Permission {
            class: class.to_string(),
            attributes: attributes
                .iter()
                .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
                .collect(),
        });
        Ok(self)
    }

    /// Returns true for the unrestricted set.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }

    /// The permissions in document order.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Parse the XML form.
    ///
    /// # Errors
    /// Returns [`crate::Error::Xml`] for malformed XML and [`crate::Error::InvalidArgument`]
    /// if the document is not a single `PermissionSet` element with `IPermission` children.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut set: Option<PermissionSet> = None;
        let mut depth = 0usize;
        let mut closed = false;

        loop {
            let (element, has_content) = match reader.read_event()? {
                Event::Start(element) => (element, true),
                Event::Empty(element) => (element, false),
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    closed = depth == 0;
                    continue;
                }
                Event::Eof => break,
                _ => continue,
            };

            if depth == 0 {
                if closed || element.name().as_ref() != b"PermissionSet" {
                    return Err(invalid_argument!(
                        "permissionSet",
                        "The document root must be a single PermissionSet element"
                    ));
                }
                let mut root = PermissionSet::default();
                for attribute in element.attributes() {
                    let attribute = attribute.map_err(quick_xml::Error::from)?;
                    if attribute.key.as_ref() == b"Unrestricted" {
                        root.unrestricted = attribute.unescape_value().map_err(quick_xml::Error::from)?.eq_ignore_ascii_case("true");
                    }
                }
                set = Some(root);
            } else {
                if depth != 1 || element.name().as_ref() != b"IPermission" {
                    return Err(invalid_argument!(
                        "permissionSet",
                        "Unexpected element '{}'",
                        String::from_utf8_lossy(element.name().as_ref())
                    ));
                }
                let mut permission = Permission {
                    class: String::new(),
                    attributes: Vec::new(),
                };
                for attribute in element.attributes() {
                    let attribute = attribute.map_err(quick_xml::Error::from)?;
                    let value = attribute.unescape_value().map_err(quick_xml::Error::from)?.into_owned();
                    match attribute.key.as_ref() {
                        b"class" => permission.class = value,
                        b"version" => {}
                        key => permission
                            .attributes
                            .push((String::from_utf8_lossy(key).into_owned(), value)),
                    }
                }
                if permission.class.is_empty() {
                    return Err(invalid_argument!(
                        "permissionSet",
                        "IPermission without class attribute"
                    ));
                }
                if let Some(root) = set.as_mut() {
                    root.permissions.push(permission);
                }
            }

            if has_content {
                depth += 1;
            } else if depth == 0 {
                closed = true;
            }
        }

        match set {
            Some(set) if closed => Ok(set),
            _ => Err(invalid_argument!(
                "permissionSet",
                "Incomplete PermissionSet document"
            )),
        }
    }

    /// The XML form.
    ///
    /// # Errors
    /// Returns an error if writing to the buffer fails.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());

        let mut root = BytesStart::new("PermissionSet");
        root.push_attribute(("class", PERMISSION_SET_CLASS));
        root.push_attribute(("version", "1"));
        if self.unrestricted {
            root.push_attribute(("Unrestricted", "true"));
        }

        if self.permissions.is_empty() {
            writer.write_event(Event::Empty(root))?;
        } else {
            writer.write_event(Event::Start(root))?;
            for permission in &self.permissions {
                let mut element = BytesStart::new("IPermission");
                element.push_attribute(("class", permission.class.as_str()));
                element.push_attribute(("version", "1"));
                for (key, value) in &permission.attributes {
                    element.push_attribute((key.as_str(), value.as_str()));
                }
                writer.write_event(Event::Empty(element))?;
            }
            writer.write_event(Event::End(BytesEnd::new("PermissionSet")))?;
        }

        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    /// The `DeclSecurity` blob: UTF-16LE XML.
    ///
    /// # Errors
    /// Returns an error if writing the XML fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(self
            .to_xml()?
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect())
    }

    /// Decode a `DeclSecurity` blob in the XML format.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a blob of odd length, otherwise see
    /// [`Self::from_xml`].
    pub fn decode(blob: &[u8]) -> Result<Self> {
        if blob.len() % 2 != 0 {
            return Err(malformed_error!(
                "Permission set blob of odd length {}",
                blob.len()
            ));
        }
        let units: Vec<u16> = blob
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::from_xml(&String::from_utf16_lossy(&units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_round_trip() {
        let set = PermissionSet::unrestricted();
        let xml = set.to_xml().unwrap();
        assert_eq!(
            xml,
            r#"<PermissionSet class="System.Security.PermissionSet" version="1" Unrestricted="true"/>"#
        );
        assert_eq!(PermissionSet::from_xml(&xml).unwrap(), set);
        assert_eq!(PermissionSet::decode(&set.encode().unwrap()).unwrap(), set);
    }

    #[test]
    fn permissions_round_trip() {
        let set = PermissionSet::empty()
            .with_permission(
                "System.Security.Permissions.FileIOPermission, mscorlib",
                &[("Read", "C:\\temp & more")],
            )
            .unwrap();
        let reparsed = PermissionSet::from_xml(&set.to_xml().unwrap()).unwrap();
        assert_eq!(reparsed, set);
    }

    #[test]
    fn malformed() {
        assert!(PermissionSet::from_xml("").is_err());
        assert!(PermissionSet::from_xml("<PermissionSet>").is_err());
        assert!(PermissionSet::from_xml("<Other/>").is_err());
        assert!(PermissionSet::from_xml("<PermissionSet><Foo/></PermissionSet>").is_err());
        assert!(PermissionSet::from_xml("<PermissionSet></Other>").is_err());
        assert!(PermissionSet::empty().with_permission("", &[]).is_err());
    }
}
