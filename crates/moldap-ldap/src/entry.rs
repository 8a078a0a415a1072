//! Directory entries as returned by searches.

use std::collections::HashMap;

use ldap3::SearchEntry;
use uuid::Uuid;

/// A single directory entry with textual and binary attribute values.
///
/// Attribute names are matched case-insensitively, as LDAP servers are free
/// to return them in a different case than requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name.
    pub dn: String,
    /// Attributes with UTF-8 values.
    pub attrs: HashMap<String, Vec<String>>,
    /// Attributes with non UTF-8 values (e.g. `objectGUID`).
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    /// Create an empty entry for a DN.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    /// Add a textual value.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Add a binary value.
    #[must_use]
    pub fn with_binary(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.bin_attrs
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// All textual values of an attribute.
    pub fn values(&self, name: &str) -> &[String] {
        lookup(&self.attrs, name).map_or(&[], Vec::as_slice)
    }

    /// All binary values of an attribute.
    pub fn binary_values(&self, name: &str) -> &[Vec<u8>] {
        lookup(&self.bin_attrs, name).map_or(&[], Vec::as_slice)
    }

    /// The value of an attribute when it has exactly one textual value.
    ///
    /// Multi-valued attributes resolve to `None`; picking one of several
    /// values would be a guess.
    pub fn single_value(&self, name: &str) -> Option<&str> {
        match self.values(name) {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// Decode the entity identifier held in `attribute`.
    ///
    /// Accepts textual UUIDs (`entryUUID`) and 16-byte little-endian GUIDs
    /// (`objectGUID`), whichever map the server placed the value in.
    pub fn entity_id(&self, attribute: &str) -> Option<Uuid> {
        if let [raw] = self.binary_values(attribute) {
            return guid_from_bytes(raw);
        }
        let text = self.single_value(attribute)?;
        Uuid::parse_str(text.trim())
            .ok()
            .or_else(|| guid_from_bytes(text.as_bytes()))
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs,
            bin_attrs: entry.bin_attrs,
        }
    }
}

fn lookup<'a, V>(map: &'a HashMap<String, V>, name: &str) -> Option<&'a V> {
    map.get(name).or_else(|| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn guid_from_bytes(raw: &[u8]) -> Option<Uuid> {
    let bytes: [u8; 16] = raw.try_into().ok()?;
    Some(Uuid::from_bytes_le(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID_TEXT: &str = "0e2e7f3a-5c3b-4b4c-9a5f-1f2e3d4c5b6a";

    #[test]
    fn test_single_value() {
        let entry = DirectoryEntry::new("uid=a,dc=example,dc=com")
            .with_value("sn", "Doe")
            .with_value("mail", "a@example.com")
            .with_value("mail", "b@example.com");

        assert_eq!(entry.single_value("sn"), Some("Doe"));
        assert_eq!(entry.single_value("mail"), None);
        assert_eq!(entry.single_value("title"), None);
    }

    #[test]
    fn test_attribute_names_are_case_insensitive() {
        let entry = DirectoryEntry::new("uid=a").with_value("modifytimestamp", "20240101000000Z");
        assert_eq!(
            entry.single_value("modifyTimestamp"),
            Some("20240101000000Z")
        );
    }

    #[test]
    fn test_entity_id_from_entry_uuid() {
        let entry = DirectoryEntry::new("uid=a").with_value("entryUUID", UUID_TEXT);
        assert_eq!(
            entry.entity_id("entryUUID"),
            Some(Uuid::parse_str(UUID_TEXT).unwrap())
        );
    }

    #[test]
    fn test_entity_id_from_object_guid() {
        let guid = Uuid::parse_str(UUID_TEXT).unwrap();
        let entry = DirectoryEntry::new("CN=A").with_binary("objectGUID", guid.to_bytes_le());
        assert_eq!(entry.entity_id("objectGUID"), Some(guid));
    }

    #[test]
    fn test_entity_id_rejects_garbage() {
        let entry = DirectoryEntry::new("uid=a")
            .with_value("entryUUID", "not-a-uuid")
            .with_binary("objectGUID", vec![1, 2, 3]);
        assert_eq!(entry.entity_id("entryUUID"), None);
        assert_eq!(entry.entity_id("objectGUID"), None);
        assert_eq!(entry.entity_id("missing"), None);
    }

    #[test]
    fn test_entity_id_multi_valued_is_unresolved() {
        let entry = DirectoryEntry::new("uid=a")
            .with_value("entryUUID", UUID_TEXT)
            .with_value("entryUUID", "5b8f7d40-2b1c-4e47-8a6b-6f5a4b3c2d1e");
        assert_eq!(entry.entity_id("entryUUID"), None);
    }

    #[test]
    fn test_from_search_entry() {
        let mut attrs = HashMap::new();
        attrs.insert("cn".to_string(), vec!["Alice".to_string()]);
        let entry = DirectoryEntry::from(SearchEntry {
            dn: "cn=Alice,dc=example,dc=com".to_string(),
            attrs,
            bin_attrs: HashMap::new(),
        });
        assert_eq!(entry.dn, "cn=Alice,dc=example,dc=com");
        assert_eq!(entry.single_value("cn"), Some("Alice"));
    }
}
