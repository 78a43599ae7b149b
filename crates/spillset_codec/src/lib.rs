//! # spillset codec
//!
//! CBOR element encoding for spilled segments.
//!
//! Every element written to a segment is encoded on its own, so a reader
//! can decode records one at a time while streaming through a blob. Any
//! `serde` type can be stored; the encoding is deterministic for a given
//! value, which lets persisted elements be compared byte-for-byte during
//! verification.
//!
//! ## Usage
//!
//! ```
//! use spillset_codec::{decode, encode};
//!
//! let bytes = encode(&("key".to_string(), 42u64)).unwrap();
//! let decoded: (String, u64) = decode(&bytes).unwrap();
//! assert_eq!(decoded, ("key".to_string(), 42));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;

pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode one element to CBOR bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decode one element from CBOR bytes.
///
/// The slice must hold exactly one encoded element.
///
/// # Errors
///
/// Returns an error if the bytes are not a valid encoding of `T`, or if
/// bytes remain after the element.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let mut reader = bytes;
    let value = ciborium::de::from_reader(&mut reader)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: reader.len(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct IndexEntry {
        field: String,
        value: Vec<u8>,
        shard: Option<u32>,
    }

    #[test]
    fn roundtrip_struct() {
        let entry = IndexEntry {
            field: "NAME".into(),
            value: b"alice".to_vec(),
            shard: Some(3),
        };
        let bytes = encode(&entry).unwrap();
        let decoded: IndexEntry = decode(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode(&vec![1u32, 2, 3]).unwrap();
        let b = encode(&vec![1u32, 2, 3]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decode_wrong_type_fails() {
        let bytes = encode(&"not a number").unwrap();
        let result: CodecResult<u64> = decode(&bytes);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = encode(&7u8).unwrap();
        bytes.push(0x00);
        let result: CodecResult<u8> = decode(&bytes);
        assert_eq!(result, Err(CodecError::TrailingBytes { remaining: 1 }));
    }

    #[test]
    fn decode_truncated_input_fails() {
        let bytes = encode(&"a longer string value").unwrap();
        let result: CodecResult<String> = decode(&bytes[..bytes.len() - 3]);
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn byte_elements_decode_to_themselves(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let bytes = encode(&data).unwrap();
            let decoded: Vec<u8> = decode(&bytes).unwrap();
            prop_assert_eq!(decoded, data);
        }
    }
}
