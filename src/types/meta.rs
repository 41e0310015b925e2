use std::fmt;

use tracing::error;

use super::error::ContractViolation;
use super::raw::{
    meta_read, RawMeta, META_TYPE_BOOLEAN, META_TYPE_INTEGER, META_TYPE_NULL, META_TYPE_STRING,
};

/// The value of one metadata entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaValue {
    Null,
    Text(String),
    Integer(i64),
    Boolean(bool),
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_owned())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Integer(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Boolean(v)
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Null => write!(f, "null"),
            MetaValue::Text(v) => write!(f, "\"{v}\""),
            MetaValue::Integer(v) => write!(f, "{v}"),
            MetaValue::Boolean(v) => write!(f, "{v}"),
        }
    }
}

/// Metadata of a rule, in the order the engine yields it.
///
/// Every entry is kept, including repeated names. [`get()`](Self::get)
/// resolves a repeated name to its last entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    entries: Vec<(String, MetaValue)>,
}

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetaValue> {
        self.entries
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, name: String, value: MetaValue) {
        self.entries.push((name, value));
    }
}

impl<K: Into<String>, V: Into<MetaValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Decode one raw metadata record. The discriminant is read first and only
/// the payload field it selects is touched.
pub(crate) fn decode(meta: &RawMeta) -> Result<(String, MetaValue), ContractViolation> {
    let (kind, identifier, string, integer) = meta_read(meta);
    let value = match kind {
        META_TYPE_NULL => MetaValue::Null,
        META_TYPE_STRING => match string {
            Some(text) => MetaValue::Text(text.to_owned()),
            None => {
                let violation = ContractViolation::MissingPayload {
                    identifier: identifier.to_owned(),
                };
                error!(%violation, "engine contract violated");
                return Err(violation);
            }
        },
        META_TYPE_INTEGER => MetaValue::Integer(integer),
        META_TYPE_BOOLEAN => MetaValue::Boolean(integer != 0),
        other => {
            let violation = ContractViolation::UnknownMetaType {
                identifier: identifier.to_owned(),
                kind: other,
            };
            error!(%violation, "engine contract violated");
            return Err(violation);
        }
    };
    Ok((identifier.to_owned(), value))
}

/// Build the raw record for a declared metadata value, filling the slot the
/// discriminant selects and leaving the other at its zero value.
pub(crate) fn encode(identifier: &str, value: &MetaValue) -> RawMeta {
    let (kind, string, integer) = match value {
        MetaValue::Null => (META_TYPE_NULL, None, 0),
        MetaValue::Text(v) => (META_TYPE_STRING, Some(v.clone()), 0),
        MetaValue::Integer(v) => (META_TYPE_INTEGER, None, *v),
        MetaValue::Boolean(v) => (META_TYPE_BOOLEAN, None, i64::from(*v)),
    };
    RawMeta {
        identifier: identifier.to_owned(),
        kind,
        string,
        integer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: i32, string: Option<&str>, integer: i64) -> RawMeta {
        RawMeta {
            identifier: "key".into(),
            kind,
            string: string.map(str::to_owned),
            integer,
        }
    }

    #[test]
    fn decodes_each_kind() {
        assert_eq!(decode(&raw(META_TYPE_NULL, None, 0)).unwrap().1, MetaValue::Null);
        assert_eq!(
            decode(&raw(META_TYPE_STRING, Some("X"), 0)).unwrap(),
            ("key".to_owned(), MetaValue::Text("X".into()))
        );
        assert_eq!(
            decode(&raw(META_TYPE_INTEGER, None, -42)).unwrap().1,
            MetaValue::Integer(-42)
        );
        assert_eq!(
            decode(&raw(META_TYPE_BOOLEAN, None, 1)).unwrap().1,
            MetaValue::Boolean(true)
        );
        assert_eq!(
            decode(&raw(META_TYPE_BOOLEAN, None, 0)).unwrap().1,
            MetaValue::Boolean(false)
        );
    }

    #[test]
    fn other_slots_are_ignored() {
        // A stale string slot must not leak into an integer entry and vice versa.
        assert_eq!(
            decode(&raw(META_TYPE_INTEGER, Some("stale"), 7)).unwrap().1,
            MetaValue::Integer(7)
        );
        assert_eq!(
            decode(&raw(META_TYPE_STRING, Some("text"), 99)).unwrap().1,
            MetaValue::Text("text".into())
        );
        assert_eq!(
            decode(&raw(META_TYPE_NULL, Some("stale"), 5)).unwrap().1,
            MetaValue::Null
        );
    }

    #[test]
    fn unknown_discriminant_is_a_violation() {
        let err = decode(&raw(17, None, 0)).unwrap_err();
        assert_eq!(
            err,
            ContractViolation::UnknownMetaType {
                identifier: "key".into(),
                kind: 17,
            }
        );
    }

    #[test]
    fn string_without_payload_is_a_violation() {
        let err = decode(&raw(META_TYPE_STRING, None, 0)).unwrap_err();
        assert!(matches!(err, ContractViolation::MissingPayload { .. }));
    }

    #[test]
    fn encode_then_decode_preserves_kind() {
        for value in [
            MetaValue::Null,
            MetaValue::Text("Author Two".into()),
            MetaValue::Integer(3),
            MetaValue::Boolean(true),
        ] {
            assert_eq!(decode(&encode("k", &value)).unwrap().1, value);
        }
    }

    #[test]
    fn metadata_get_is_last_wins() {
        let meta: Metadata = [("a", MetaValue::from(1_i64)), ("a", MetaValue::from(2_i64))]
            .into_iter()
            .collect();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.get("a"), Some(&MetaValue::Integer(2)));
        assert_eq!(meta.get("b"), None);
    }

    #[test]
    fn empty_metadata() {
        let meta = Metadata::new();
        assert!(meta.is_empty());
        assert!(!meta.contains_key("author"));
    }
}
