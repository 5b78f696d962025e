//! Encoding and decoding between domain types and SQLite column values.
//!
//! Embeddings are stored as little-endian `f32` BLOBs. Dates are `YYYY-MM-DD`
//! and times `HH:MM:SS`, so lexical order equals chronological order.

use chrono::{NaiveDate, NaiveTime};
use rollcall_core::{AttendanceRecord, Embedding, Identity};

use crate::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

// ─── Embedding ───────────────────────────────────────────────────────────────

pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn decode_embedding(identity_id: &str, blob: &[u8]) -> Result<Vec<f32>> {
    let corrupt = |reason: String| Error::CorruptEmbedding {
        identity_id: identity_id.to_string(),
        reason,
    };

    if blob.is_empty() || blob.len() % 4 != 0 {
        return Err(corrupt(format!("invalid byte length {}", blob.len())));
    }

    let mut values = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err(corrupt("non-finite value".to_string()));
        }
        values.push(value);
    }
    Ok(values)
}

// ─── Date / time ─────────────────────────────────────────────────────────────

pub fn encode_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn decode_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

pub fn encode_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub fn decode_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FORMAT).map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// An `identities` row as read from SQLite.
pub struct RawIdentity {
    pub identity_id: String,
    pub display_name: String,
    pub embedding: Vec<u8>,
    pub model_version: Option<String>,
}

impl RawIdentity {
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            identity_id: identity.identity_id.clone(),
            display_name: identity.display_name.clone(),
            embedding: encode_embedding(&identity.embedding.values),
            model_version: identity.embedding.model_version.clone(),
        }
    }

    pub fn into_identity(self) -> Result<Identity> {
        let values = decode_embedding(&self.identity_id, &self.embedding)?;
        Ok(Identity {
            identity_id: self.identity_id,
            display_name: self.display_name,
            embedding: Embedding {
                values,
                model_version: self.model_version,
            },
        })
    }
}

/// An `attendance` row as read from SQLite.
pub struct RawRecord {
    pub identity_id: String,
    pub display_name: String,
    pub date: String,
    pub time: String,
    pub confidence: Option<String>,
}

impl RawRecord {
    pub fn from_record(record: &AttendanceRecord) -> Self {
        Self {
            identity_id: record.identity_id.clone(),
            display_name: record.display_name.clone(),
            date: encode_date(record.date),
            time: encode_time(record.time),
            confidence: record.confidence.clone(),
        }
    }

    pub fn into_record(self) -> Result<AttendanceRecord> {
        Ok(AttendanceRecord {
            date: decode_date(&self.date)?,
            time: decode_time(&self.time)?,
            identity_id: self.identity_id,
            display_name: self.display_name,
            confidence: self.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_blob_is_little_endian_f32() {
        let blob = encode_embedding(&[1.0, -0.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_embedding("a", &blob).unwrap(), vec![1.0, -0.5]);
    }

    #[test]
    fn truncated_blob_is_corrupt() {
        let err = decode_embedding("a", &[0, 0, 128]).unwrap_err();
        assert!(matches!(err, Error::CorruptEmbedding { .. }));
        assert!(decode_embedding("a", &[]).is_err());
    }

    #[test]
    fn non_finite_blob_is_corrupt() {
        let blob = encode_embedding(&[f32::NAN]);
        assert!(decode_embedding("a", &blob).is_err());
    }

    #[test]
    fn dates_and_times_use_fixed_width_text() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let time = NaiveTime::from_hms_opt(7, 5, 9).unwrap();
        assert_eq!(encode_date(date), "2024-01-03");
        assert_eq!(encode_time(time), "07:05:09");
        assert_eq!(decode_date("2024-01-03").unwrap(), date);
        assert_eq!(decode_time("07:05:09").unwrap(), time);
        assert!(matches!(decode_date("01/03/2024"), Err(Error::DateParse(_))));
    }
}
