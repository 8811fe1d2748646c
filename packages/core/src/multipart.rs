//! Multipart upload planning: byte ranges out, ordered upload parts back in.

use serde::{Deserialize, Serialize};

use crate::error::{OrchestrationError, Result};
use crate::transfer::{Hash, HashAlgorithm, UploadPart};

/// A half-open byte range `[offset, offset + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Split `size` bytes into consecutive ranges of `part_size`, the last one
/// truncated. An empty file still gets a single empty range so the upload
/// has a part to complete.
pub fn byte_ranges(size: u64, part_size: u64) -> Result<Vec<ByteRange>> {
    if part_size == 0 {
        return Err(OrchestrationError::runtime("Multipart part size must be positive"));
    }
    if size == 0 {
        return Ok(vec![ByteRange::new(0, 0)]);
    }

    let mut ranges = Vec::with_capacity(size.div_ceil(part_size) as usize);
    let mut offset = 0;
    while offset < size {
        let length = part_size.min(size - offset);
        ranges.push(ByteRange::new(offset, length));
        offset += length;
    }
    Ok(ranges)
}

/// Reassemble per-range hashes into ordered upload parts.
///
/// Hashes of each algorithm are sorted by offset and paired index-wise;
/// both lists must cover the same ranges.
pub fn assemble_parts(
    hashes: &[Hash],
    signing: HashAlgorithm,
    part: HashAlgorithm,
) -> Result<Vec<UploadPart>> {
    let signing_hashes = ranged_hashes(hashes, signing)?;
    let part_hashes = ranged_hashes(hashes, part)?;

    if signing_hashes.len() != part_hashes.len() {
        return Err(OrchestrationError::runtime(format!(
            "Expected matching {} and {} part hashes, got {} and {}",
            signing,
            part,
            signing_hashes.len(),
            part_hashes.len()
        )));
    }

    signing_hashes
        .into_iter()
        .zip(part_hashes)
        .enumerate()
        .map(|(index, ((range, signing_value), (part_range, part_value)))| {
            if range != part_range {
                return Err(OrchestrationError::runtime(format!(
                    "Part {} covers {:?} for {} but {:?} for {}",
                    index, range, signing, part_range, part
                )));
            }
            Ok(UploadPart {
                part_index: index as u32,
                offset: range.offset,
                length: range.length,
                signing_hash: signing_value,
                part_hash: part_value,
            })
        })
        .collect()
}

fn ranged_hashes(hashes: &[Hash], algorithm: HashAlgorithm) -> Result<Vec<(ByteRange, String)>> {
    let mut ranged = hashes
        .iter()
        .filter(|h| h.algorithm == algorithm)
        .map(|h| match (h.offset, h.length) {
            (Some(offset), Some(length)) => Ok((ByteRange::new(offset, length), h.value.clone())),
            _ => Err(OrchestrationError::runtime(format!(
                "{} hash {} is missing its byte range",
                algorithm, h.value
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    ranged.sort_by_key(|(range, _)| range.offset);
    Ok(ranged)
}
