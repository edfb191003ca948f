//! Attribute codec
//!
//! Converts between typed records and the store's attribute maps. The value
//! conversion is done by `serde_dynamo`; before handing an item to it the codec
//! checks every declared field so that a missing attribute or a wrong tag is
//! reported as a [`DecodeError`] naming the field.

use serde::{de::DeserializeOwned, Serialize};
use serde_dynamo::{from_item, to_item};
use std::collections::HashMap;
use std::fmt;

pub use serde_dynamo::AttributeValue;

use crate::errors::{DecodeError, Error, Result};
use crate::key::{KeySchema, PrimaryKey};

/// An item as stored: attribute name to tagged value
pub type Item = HashMap<String, AttributeValue>;

/// The tag of an [`AttributeValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    String,
    Number,
    Boolean,
    Binary,
    List,
    Map,
    Null,
    StringSet,
    NumberSet,
    BinarySet,
}

impl AttributeKind {
    pub fn of(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::S(_) => AttributeKind::String,
            AttributeValue::N(_) => AttributeKind::Number,
            AttributeValue::Bool(_) => AttributeKind::Boolean,
            AttributeValue::B(_) => AttributeKind::Binary,
            AttributeValue::L(_) => AttributeKind::List,
            AttributeValue::M(_) => AttributeKind::Map,
            AttributeValue::Null(_) => AttributeKind::Null,
            AttributeValue::Ss(_) => AttributeKind::StringSet,
            AttributeValue::Ns(_) => AttributeKind::NumberSet,
            AttributeValue::Bs(_) => AttributeKind::BinarySet,
        }
    }

    /// Wire tag, as used in the store's JSON protocol
    pub fn tag(self) -> &'static str {
        match self {
            AttributeKind::String => "S",
            AttributeKind::Number => "N",
            AttributeKind::Boolean => "BOOL",
            AttributeKind::Binary => "B",
            AttributeKind::List => "L",
            AttributeKind::Map => "M",
            AttributeKind::Null => "NULL",
            AttributeKind::StringSet => "SS",
            AttributeKind::NumberSet => "NS",
            AttributeKind::BinarySet => "BS",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A required record field and the tag it is stored under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: AttributeKind,
}

impl Field {
    pub const fn string(name: &'static str) -> Self {
        Self {
            name,
            kind: AttributeKind::String,
        }
    }

    pub const fn number(name: &'static str) -> Self {
        Self {
            name,
            kind: AttributeKind::Number,
        }
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self {
            name,
            kind: AttributeKind::Boolean,
        }
    }
}

/// A domain entity stored in a single partition/sort keyed table.
///
/// Implementors derive `Serialize`/`Deserialize` with the attribute names used in
/// the table and list every required attribute in `FIELDS`, key attributes
/// included. Optional attributes may be left out of `FIELDS`.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Attribute name of the partition key
    const PARTITION_KEY: &'static str;
    /// Attribute name of the sort key
    const SORT_KEY: &'static str;
    /// Required attributes
    const FIELDS: &'static [Field];

    fn partition_key(&self) -> &str;

    fn sort_key(&self) -> &str;

    fn key_schema() -> KeySchema {
        KeySchema::new(Self::PARTITION_KEY, Self::SORT_KEY)
    }

    fn primary_key(&self) -> Result<PrimaryKey> {
        PrimaryKey::new(self.partition_key(), self.sort_key())
    }
}

/// Encode a record into an item
pub fn encode<R: Record>(record: &R) -> Result<Item> {
    to_item(record).map_err(|e| Error::Encode(e.to_string()))
}

/// Decode an item into a record. Attributes not declared by the record are ignored.
pub fn decode<R: Record>(item: Item) -> std::result::Result<R, DecodeError> {
    check_fields(&item, R::FIELDS)?;
    from_item(item).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Decode a list of items, failing on the first item that does not decode
pub fn decode_many<R: Record>(items: Vec<Item>) -> std::result::Result<Vec<R>, DecodeError> {
    items.into_iter().map(decode).collect()
}

fn check_fields(item: &Item, fields: &[Field]) -> std::result::Result<(), DecodeError> {
    for field in fields {
        let value = item
            .get(field.name)
            .ok_or_else(|| DecodeError::MissingField(field.name.to_string()))?;

        let found = AttributeKind::of(value);
        if found != field.kind {
            return Err(DecodeError::TypeMismatch {
                field: field.name.to_string(),
                expected: field.kind,
                found,
            });
        }
    }
    Ok(())
}

/// Read a string attribute, if present and string-typed
pub fn get_string<'a>(item: &'a Item, name: &str) -> Option<&'a str> {
    match item.get(name) {
        Some(AttributeValue::S(s)) => Some(s.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Song;
    use pretty_assertions::assert_eq;

    fn odyssey() -> Song {
        Song::new("RMHighlander", "2021-11-13", "Odyssey", "Indie")
    }

    #[test]
    fn test_encode_uses_string_tags() {
        let item = encode(&odyssey()).unwrap();

        assert_eq!(item.len(), 4);
        assert_eq!(item.get("Artist"), Some(&AttributeValue::S("RMHighlander".into())));
        assert_eq!(item.get("ReleaseDate"), Some(&AttributeValue::S("2021-11-13".into())));
        assert_eq!(item.get("Title"), Some(&AttributeValue::S("Odyssey".into())));
        assert_eq!(item.get("Genre"), Some(&AttributeValue::S("Indie".into())));
    }

    #[test]
    fn test_round_trip() {
        let songs = [
            odyssey(),
            Song::new("RMHighlander", "2022-04-28", "Pure Shore", "Travel"),
            Song::new("Ålesund Ensemble", "1999-01-01", "", "Folk / Ünïcode"),
        ];

        for song in songs {
            let decoded: Song = decode(encode(&song).unwrap()).unwrap();
            assert_eq!(decoded, song);
        }
    }

    #[test]
    fn test_extra_attributes_are_ignored() {
        let mut item = encode(&odyssey()).unwrap();
        item.insert("PlayCount".into(), AttributeValue::N("12".into()));

        let decoded: Song = decode(item).unwrap();
        assert_eq!(decoded, odyssey());
    }

    #[test]
    fn test_missing_field() {
        let mut item = encode(&odyssey()).unwrap();
        item.remove("Genre");

        let err = decode::<Song>(item).unwrap_err();
        assert_eq!(err, DecodeError::MissingField("Genre".into()));
    }

    #[test]
    fn test_type_mismatch() {
        let mut item = encode(&odyssey()).unwrap();
        item.insert("Title".into(), AttributeValue::N("7".into()));

        let err = decode::<Song>(item).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TypeMismatch {
                field: "Title".into(),
                expected: AttributeKind::String,
                found: AttributeKind::Number,
            }
        );
    }

    #[test]
    fn test_decode_many_fails_instead_of_dropping() {
        let good = encode(&odyssey()).unwrap();
        let mut bad = good.clone();
        bad.remove("Artist");

        let err = decode_many::<Song>(vec![good.clone(), bad]).unwrap_err();
        assert_eq!(err, DecodeError::MissingField("Artist".into()));

        let songs = decode_many::<Song>(vec![good.clone(), good]).unwrap();
        assert_eq!(songs.len(), 2);
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(AttributeKind::of(&AttributeValue::Bool(true)), AttributeKind::Boolean);
        assert_eq!(AttributeKind::of(&AttributeValue::Ss(vec![])), AttributeKind::StringSet);
        assert_eq!(AttributeKind::of(&AttributeValue::Null(true)).tag(), "NULL");
        assert_eq!(AttributeKind::BinarySet.to_string(), "BS");
    }
}
