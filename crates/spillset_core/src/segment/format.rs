//! On-store layout of a segment blob.
//!
//! ```text
//! +--------+---------+----------+-------------------------------+---------+-------+
//! | "SPLS" | version | reserved | record*                       | count   | "SPLE"|
//! | 4B     | u16 LE  | u16      | len u32 | crc32 u32 | payload | u64 LE  | 4B    |
//! +--------+---------+----------+-------------------------------+---------+-------+
//! ```
//!
//! Records hold CBOR-encoded elements in ascending order. The trailer count
//! lets the element count of a persisted segment be read without a scan.

use crate::config::PersistOptions;
use crate::error::{CoreError, CoreResult};
use crate::order::{Element, ElementOrder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use spillset_storage::StorageBackend;
use std::borrow::Borrow;

/// Magic bytes opening every segment blob.
pub const SEGMENT_MAGIC: [u8; 4] = *b"SPLS";

/// Magic bytes closing every segment blob.
pub const TRAILER_MAGIC: [u8; 4] = *b"SPLE";

/// Current segment format version.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_SIZE: u64 = 8;
const RECORD_HEADER_SIZE: usize = 8;
const TRAILER_SIZE: u64 = 12;
const WRITE_CHUNK: usize = 64 * 1024;

/// Streams records into a backend, replacing whatever it held.
pub(crate) struct SegmentWriter<'a> {
    backend: &'a mut dyn StorageBackend,
    pending: Vec<u8>,
    count: u64,
}

impl<'a> SegmentWriter<'a> {
    /// Truncates the backend and stages the header.
    pub(crate) fn begin(backend: &'a mut dyn StorageBackend) -> CoreResult<Self> {
        backend.truncate(0)?;
        let mut pending = Vec::with_capacity(WRITE_CHUNK);
        pending.extend_from_slice(&SEGMENT_MAGIC);
        pending.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        pending.extend_from_slice(&0u16.to_le_bytes());
        Ok(Self {
            backend,
            pending,
            count: 0,
        })
    }

    /// Appends one element record.
    pub(crate) fn write<E: Serialize>(&mut self, element: &E) -> CoreResult<()> {
        let payload = spillset_codec::encode(element)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            CoreError::invalid_operation(format!(
                "element encodes to {} bytes, more than a record can hold",
                payload.len()
            ))
        })?;
        self.pending.extend_from_slice(&len.to_le_bytes());
        self.pending
            .extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        self.pending.extend_from_slice(&payload);
        self.count += 1;

        if self.pending.len() >= WRITE_CHUNK {
            self.drain()?;
        }
        Ok(())
    }

    /// Writes the trailer and flushes. Returns the number of records.
    pub(crate) fn finish(mut self) -> CoreResult<u64> {
        self.pending.extend_from_slice(&self.count.to_le_bytes());
        self.pending.extend_from_slice(&TRAILER_MAGIC);
        self.drain()?;
        self.backend.flush()?;
        Ok(self.count)
    }

    fn drain(&mut self) -> CoreResult<()> {
        if !self.pending.is_empty() {
            self.backend.append(&self.pending)?;
            self.pending.clear();
        }
        Ok(())
    }
}

/// Sequential record reader.
pub(crate) struct RecordReader<'a> {
    backend: &'a dyn StorageBackend,
    offset: u64,
    end: u64,
}

impl<'a> RecordReader<'a> {
    /// Validates the header and positions at the first record.
    pub(crate) fn open(backend: &'a dyn StorageBackend) -> CoreResult<Self> {
        let size = backend.size()?;
        check_header(backend, size)?;
        Ok(Self {
            backend,
            offset: HEADER_SIZE,
            end: size - TRAILER_SIZE,
        })
    }

    /// Reads the next raw payload, checking its CRC.
    pub(crate) fn next_payload(&mut self) -> CoreResult<Option<Vec<u8>>> {
        if self.offset >= self.end {
            return Ok(None);
        }
        if self.end - self.offset < RECORD_HEADER_SIZE as u64 {
            return Err(self.corruption("truncated record header"));
        }

        let header = self.backend.read_at(self.offset, RECORD_HEADER_SIZE)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let payload_offset = self.offset + RECORD_HEADER_SIZE as u64;
        if payload_offset + u64::from(len) > self.end {
            return Err(self.corruption(format!(
                "record at offset {} claims {len} bytes past the trailer",
                self.offset
            )));
        }

        let payload = self.backend.read_at(payload_offset, len as usize)?;
        let actual = crc32fast::hash(&payload);
        if actual != expected {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        self.offset = payload_offset + u64::from(len);
        Ok(Some(payload))
    }

    /// Reads and decodes the next element.
    pub(crate) fn next_element<E: DeserializeOwned>(&mut self) -> CoreResult<Option<E>> {
        match self.next_payload()? {
            Some(payload) => Ok(Some(spillset_codec::decode(&payload)?)),
            None => Ok(None),
        }
    }

    fn corruption(&self, message: impl Into<String>) -> CoreError {
        CoreError::segment_corruption(self.backend.name(), message)
    }
}

fn check_header(backend: &dyn StorageBackend, size: u64) -> CoreResult<()> {
    if size < HEADER_SIZE + TRAILER_SIZE {
        return Err(CoreError::segment_corruption(
            backend.name(),
            format!("blob is {size} bytes, too short for a segment"),
        ));
    }
    let header = backend.read_at(0, HEADER_SIZE as usize)?;
    if header[0..4] != SEGMENT_MAGIC {
        return Err(CoreError::segment_corruption(backend.name(), "bad magic"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != FORMAT_VERSION {
        return Err(CoreError::segment_corruption(
            backend.name(),
            format!("unsupported format version {version}"),
        ));
    }
    Ok(())
}

/// Reads the element count recorded in the trailer.
pub(crate) fn read_count(backend: &dyn StorageBackend) -> CoreResult<u64> {
    let size = backend.size()?;
    check_header(backend, size)?;
    let trailer = backend.read_at(size - TRAILER_SIZE, TRAILER_SIZE as usize)?;
    if trailer[8..12] != TRAILER_MAGIC {
        return Err(CoreError::segment_corruption(
            backend.name(),
            "missing trailer; the segment was not completely written",
        ));
    }
    let mut count = [0u8; 8];
    count.copy_from_slice(&trailer[0..8]);
    Ok(u64::from_le_bytes(count))
}

/// Writes a sorted run to `backend` and verifies it per `options`.
///
/// Returns the number of elements written.
pub(crate) fn write_run<E, B, I>(
    backend: &mut dyn StorageBackend,
    elements: I,
    order: &ElementOrder<E>,
    options: &PersistOptions,
) -> CoreResult<u64>
where
    E: Element,
    B: Borrow<E>,
    I: IntoIterator<Item = CoreResult<B>>,
{
    let sample_len = if options.verify_elements {
        options.elements_to_verify
    } else {
        0
    };
    let mut sample: Vec<E> = Vec::with_capacity(sample_len.min(1024));

    let mut writer = SegmentWriter::begin(backend)?;
    for element in elements {
        let element = element?;
        writer.write(element.borrow())?;
        if sample.len() < sample_len {
            sample.push(element.borrow().clone());
        }
    }
    let written = writer.finish()?;

    verify(backend, written, &sample, order, options)?;
    Ok(written)
}

fn verify<E: Element>(
    backend: &dyn StorageBackend,
    written: u64,
    sample: &[E],
    order: &ElementOrder<E>,
    options: &PersistOptions,
) -> CoreResult<()> {
    if options.verify_size {
        let stored = read_count(backend)?;
        if stored != written {
            return Err(CoreError::verification_failed(
                backend.name(),
                format!("wrote {written} elements but the trailer records {stored}"),
            ));
        }
    }

    if !sample.is_empty() {
        let mut reader = RecordReader::open(backend)?;
        for (index, expected) in sample.iter().enumerate() {
            match reader.next_element::<E>()? {
                Some(actual) if order.equivalent(&actual, expected) => {}
                Some(actual) => {
                    return Err(CoreError::verification_failed(
                        backend.name(),
                        format!("element {index} reads back as {actual:?}, expected {expected:?}"),
                    ))
                }
                None => {
                    return Err(CoreError::verification_failed(
                        backend.name(),
                        format!("segment ends after {index} elements"),
                    ))
                }
            }
        }
    }
    Ok(())
}

/// Structural summary of a segment blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSummary {
    /// Blob name.
    pub name: String,
    /// Blob size in bytes.
    pub bytes: u64,
    /// Element count from the trailer.
    pub elements: u64,
    /// Format version from the header.
    pub version: u16,
}

/// Checks a segment blob end to end without decoding its elements.
///
/// Validates header, every record checksum and the trailer count.
pub fn inspect_segment(backend: &dyn StorageBackend) -> CoreResult<SegmentSummary> {
    let elements = read_count(backend)?;
    let mut reader = RecordReader::open(backend)?;
    let mut scanned = 0u64;
    while reader.next_payload()?.is_some() {
        scanned += 1;
    }
    if scanned != elements {
        return Err(CoreError::segment_corruption(
            backend.name(),
            format!("trailer records {elements} elements but {scanned} were found"),
        ));
    }
    Ok(SegmentSummary {
        name: backend.name().to_string(),
        bytes: backend.size()?,
        elements,
        version: FORMAT_VERSION,
    })
}
