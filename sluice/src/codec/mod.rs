/*
 * Copyright 2024 Thaddeus Treloar
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//! Frames a batch of raw payloads as a single JSON array document.
//!
//! Payloads are copied through verbatim. Each one must already be a complete
//! JSON value; anything else is rejected rather than spliced into the array,
//! since a stray `]` or `,` inside a payload would otherwise corrupt the
//! framing of every record after it.

use serde_json::value::RawValue;

use crate::message::EventRecord;

mod error;
pub use error::EncodingError;

const ARRAY_OPEN: char = '[';
const ARRAY_CLOSE: char = ']';
const ELEMENT_DELIMITER: char = ',';

/// A batch rendered for the sink's bulk write.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub struct TransportDocument(String);

impl TransportDocument {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Splits the document back into its element payloads, in order.
    pub fn decode(&self) -> Result<Vec<String>, serde_json::Error> {
        let elements: Vec<Box<RawValue>> = serde_json::from_str(&self.0)?;

        Ok(elements
            .into_iter()
            .map(|element| element.get().to_owned())
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// Nothing to write. The caller skips the sink and the checkpoint.
    Noop,
    Document(TransportDocument),
}

pub fn encode(records: &[EventRecord]) -> Result<Encoded, EncodingError> {
    if records.is_empty() {
        return Ok(Encoded::Noop);
    }

    let capacity = records.iter().map(|r| r.payload().len() + 1).sum::<usize>() + 1;
    let mut document = String::with_capacity(capacity);

    document.push(ARRAY_OPEN);

    for (index, record) in records.iter().enumerate() {
        let text = validate_payload(record)?;

        if index > 0 {
            document.push(ELEMENT_DELIMITER);
        }

        document.push_str(text);
    }

    document.push(ARRAY_CLOSE);

    Ok(Encoded::Document(TransportDocument(document)))
}

fn validate_payload(record: &EventRecord) -> Result<&str, EncodingError> {
    let sequence = record.sequence_number();

    let text = std::str::from_utf8(record.payload())
        .map_err(|source| EncodingError::InvalidUtf8 { sequence, source })?;

    serde_json::from_str::<&RawValue>(text)
        .map_err(|source| EncodingError::MalformedPayload { sequence, source })?;

    Ok(text)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(sequence: i64, payload: &str) -> EventRecord {
        EventRecord::new(payload.as_bytes().to_vec(), sequence, Utc::now())
    }

    #[test]
    fn test_encode_empty_is_noop() {
        assert_eq!(encode(&[]).unwrap(), Encoded::Noop);
    }

    #[test]
    fn test_encode_preserves_order_and_duplicates() {
        let payloads = [
            r#"{"device":"b","value":2}"#,
            r#"{"device":"a","value":1}"#,
            r#"{"device":"a","value":1}"#,
            "42",
            r#""text""#,
        ];

        let records: Vec<_> = payloads
            .iter()
            .enumerate()
            .map(|(i, p)| record(101 + i as i64, p))
            .collect();

        let document = match encode(&records).unwrap() {
            Encoded::Document(document) => document,
            Encoded::Noop => panic!("expected a document"),
        };

        assert_eq!(
            document.as_str(),
            r#"[{"device":"b","value":2},{"device":"a","value":1},{"device":"a","value":1},42,"text"]"#
        );
        assert_eq!(document.decode().unwrap(), payloads);
    }

    #[test]
    fn test_encode_single_record_has_no_delimiter() {
        let records = [record(1, r#"{"a":1}"#)];

        let Encoded::Document(document) = encode(&records).unwrap() else {
            panic!("expected a document");
        };

        assert_eq!(document.as_str(), r#"[{"a":1}]"#);
    }

    #[test]
    fn test_encode_payloads_keep_whitespace_verbatim() {
        let records = [record(1, "{ \"a\" : [1, 2] }"), record(2, " 7 ")];

        let Encoded::Document(document) = encode(&records).unwrap() else {
            panic!("expected a document");
        };

        assert_eq!(document.as_str(), "[{ \"a\" : [1, 2] }, 7 ]");
        assert_eq!(document.decode().unwrap().len(), 2);
    }

    #[test]
    fn test_encode_rejects_framing_injection() {
        let records = [record(7, r#"{"a":1}"#), record(8, r#"1],[2"#)];

        let err = encode(&records).unwrap_err();

        assert!(matches!(err, EncodingError::MalformedPayload { sequence: 8, .. }));
    }

    #[test]
    fn test_encode_rejects_invalid_utf8() {
        let records = [EventRecord::new(vec![0xff, 0xfe], 3, Utc::now())];

        let err = encode(&records).unwrap_err();

        assert!(matches!(err, EncodingError::InvalidUtf8 { sequence: 3, .. }));
        assert_eq!(err.sequence(), 3);
    }
}
