//! Timestamp handling for persisted records
//!
//! All timestamps are UTC and serialize as ISO-8601 without a zone suffix
//! (`2026-08-01T12:34:56.789012`), matching the on-disk format every other
//! consumer of the data directory expects.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Serialization format: microsecond precision, no zone suffix.
pub const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Current wall-clock time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp in the on-disk representation.
pub fn to_iso(ts: &DateTime<Utc>) -> String {
    ts.format(ISO_FORMAT).to_string()
}

/// Parse a timestamp in the on-disk representation.
///
/// Accepts a missing fractional part and a trailing `Z` for tolerance when
/// reading files produced by older builds.
pub fn parse_iso(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let trimmed = raw.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
        .map(|naive| naive.and_utc())
}

/// Serde adapter for `DateTime<Utc>` fields.
pub mod iso {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&to_iso(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        parse_iso(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` fields.
pub mod iso_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => ser.serialize_some(&to_iso(ts)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        match raw {
            Some(raw) => parse_iso(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Serde adapter for `Vec<DateTime<Utc>>` (history timestamp arrays).
pub mod iso_vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(ts: &[DateTime<Utc>], ser: S) -> Result<S::Ok, S::Error> {
        let mut seq = ser.serialize_seq(Some(ts.len()))?;
        for t in ts {
            seq.serialize_element(&to_iso(t))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<DateTime<Utc>>, D::Error> {
        let raw: Vec<String> = Vec::deserialize(de)?;
        raw.iter()
            .map(|s| parse_iso(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Serde adapter for `VecDeque<DateTime<Utc>>` (metadata ring buffers).
pub mod iso_deque {
    use super::*;
    use serde::ser::SerializeSeq;
    use std::collections::VecDeque;

    pub fn serialize<S: Serializer>(
        ts: &VecDeque<DateTime<Utc>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = ser.serialize_seq(Some(ts.len()))?;
        for t in ts {
            seq.serialize_element(&to_iso(t))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<VecDeque<DateTime<Utc>>, D::Error> {
        let raw: Vec<String> = Vec::deserialize(de)?;
        raw.iter()
            .map(|s| parse_iso(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
