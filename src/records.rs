//! Explicit field-list codec for stored entities.
//!
//! Every entity lists its stored fields by name and converts each one to and
//! from its string form. A `v` field carries the schema version; records
//! without it are treated as version 0.

use crate::errors::CodecError;
use crate::storage::FieldMap;
use std::fmt::Display;
use std::str::FromStr;

const VERSION_FIELD: &str = "v";

/// An entity persisted as a hash record
pub trait Record: Sized {
    /// Record family, used in error messages
    const KIND: &'static str;
    const SCHEMA_VERSION: u32;

    /// Store key of this record
    fn key(&self) -> String;

    fn encode(&self) -> FieldMap;

    fn decode(fields: &FieldMap) -> Result<Self, CodecError>;
}

/// Builds a field map for one record
pub struct FieldWriter {
    fields: FieldMap,
}

impl FieldWriter {
    pub fn new<R: Record>() -> Self {
        let mut fields = FieldMap::new();
        fields.insert(VERSION_FIELD.to_string(), R::SCHEMA_VERSION.to_string());
        Self { fields }
    }

    pub fn put(mut self, field: &'static str, value: impl Display) -> Self {
        self.fields.insert(field.to_string(), value.to_string());
        self
    }

    pub fn put_mut(&mut self, field: &'static str, value: impl Display) {
        self.fields.insert(field.to_string(), value.to_string());
    }

    pub fn finish(self) -> FieldMap {
        self.fields
    }
}

/// Typed access to the fields of one record
pub struct FieldReader<'a> {
    record: &'static str,
    fields: &'a FieldMap,
    version: u32,
}

impl<'a> FieldReader<'a> {
    pub fn new<R: Record>(fields: &'a FieldMap) -> Result<Self, CodecError> {
        let version = match fields.get(VERSION_FIELD) {
            Some(v) => v.parse().map_err(|_| CodecError::InvalidField {
                record: R::KIND,
                field: VERSION_FIELD,
                value: v.clone(),
            })?,
            None => 0,
        };
        if version > R::SCHEMA_VERSION {
            return Err(CodecError::UnsupportedVersion {
                record: R::KIND,
                version,
            });
        }
        Ok(Self {
            record: R::KIND,
            fields,
            version,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Raw field text; missing fields read as empty
    pub fn text(&self, field: &'static str) -> &'a str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn required<T: FromStr>(&self, field: &'static str) -> Result<T, CodecError> {
        let raw = self.fields.get(field).ok_or(CodecError::MissingField {
            record: self.record,
            field,
        })?;
        self.parse_raw(field, raw)
    }

    /// Parse a field, using `default` when it is missing or empty
    pub fn or<T: FromStr>(&self, field: &'static str, default: T) -> Result<T, CodecError> {
        match self.fields.get(field) {
            Some(raw) if !raw.is_empty() => self.parse_raw(field, raw),
            _ => Ok(default),
        }
    }

    pub fn parse_raw<T: FromStr>(&self, field: &'static str, raw: &str) -> Result<T, CodecError> {
        raw.parse().map_err(|_| self.invalid(field, raw))
    }

    pub fn invalid(&self, field: &'static str, raw: &str) -> CodecError {
        CodecError::InvalidField {
            record: self.record,
            field,
            value: raw.to_string(),
        }
    }
}
