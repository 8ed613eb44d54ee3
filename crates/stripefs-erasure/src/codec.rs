//! Reed-Solomon codec over block group columns
//!
//! The reconstruction engine only needs the decode direction: given any
//! `D` surviving columns of a window (surviving reads plus implicit
//! zero-stripes), regenerate the erased columns (data or parity) at the
//! same byte length. Encode exists for the writing path and for
//! round-trip verification in tests.
//!
//! Backed by `reed-solomon-erasure` over GF(2^8): it regenerates parity
//! columns as well as data columns and places no alignment constraint on
//! the column length, which matters for the final, possibly odd-sized
//! window of a group.

use reed_solomon_erasure::{galois_8::Field, ReedSolomon};
use std::mem;
use thiserror::Error;

/// Errors specific to erasure coding operations
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("decoding failed: {0}")]
    DecodingFailed(String),

    #[error("erased index {index} is not absent from the inputs")]
    ErasedIndexPresent { index: usize },

    #[error("expected {expected} inputs, got {got}")]
    InputCountMismatch { expected: usize, got: usize },
}

impl From<CodecError> for stripefs_common::Error {
    fn from(e: CodecError) -> Self {
        stripefs_common::Error::Erasure(e.to_string())
    }
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Erasure codec over `D + P` equal-length columns
pub trait ErasureCodec: Send {
    /// Number of data columns (D)
    fn data_units(&self) -> usize;

    /// Number of parity columns (P)
    fn parity_units(&self) -> usize;

    /// Total columns (D + P)
    fn total_units(&self) -> usize {
        self.data_units() + self.parity_units()
    }

    /// Compute the `P` parity columns for `D` equal-length data columns.
    fn encode(&mut self, data: &[&[u8]]) -> CodecResult<Vec<Vec<u8>>>;

    /// Regenerate erased columns.
    ///
    /// `inputs` has one slot per column; present slots are equal-length
    /// slices, absent slots are `None`. `erased` lists the column indices
    /// to produce, and `outputs[k]` (of at most the column length)
    /// receives column `erased[k]`.
    fn decode(
        &mut self,
        inputs: &[Option<&[u8]>],
        erased: &[usize],
        outputs: &mut [&mut [u8]],
    ) -> CodecResult<()>;
}

/// Reed-Solomon codec over GF(2^8)
pub struct RsCodec {
    rs: ReedSolomon<Field>,
    /// Per-column working buffers, reused across decode calls
    scratch: Vec<Vec<u8>>,
}

impl RsCodec {
    /// Create a codec for `data_units` + `parity_units` columns
    pub fn new(data_units: usize, parity_units: usize) -> CodecResult<Self> {
        if data_units == 0 {
            return Err(CodecError::InvalidConfig("data_units must be > 0".into()));
        }
        if parity_units == 0 {
            return Err(CodecError::InvalidConfig("parity_units must be > 0".into()));
        }
        if data_units + parity_units > 256 {
            return Err(CodecError::InvalidConfig(
                "total columns must be <= 256 over GF(2^8)".into(),
            ));
        }
        let rs = ReedSolomon::<Field>::new(data_units, parity_units)
            .map_err(|e| CodecError::InvalidConfig(e.to_string()))?;
        let scratch = vec![Vec::new(); data_units + parity_units];
        Ok(Self { rs, scratch })
    }
}

impl ErasureCodec for RsCodec {
    fn data_units(&self) -> usize {
        self.rs.data_shard_count()
    }

    fn parity_units(&self) -> usize {
        self.rs.parity_shard_count()
    }

    fn encode(&mut self, data: &[&[u8]]) -> CodecResult<Vec<Vec<u8>>> {
        let k = self.data_units();
        if data.len() != k {
            return Err(CodecError::InputCountMismatch {
                expected: k,
                got: data.len(),
            });
        }
        let len = data[0].len();
        let mut parity = vec![vec![0u8; len]; self.parity_units()];
        self.rs
            .encode_sep(data, &mut parity)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;
        Ok(parity)
    }

    fn decode(
        &mut self,
        inputs: &[Option<&[u8]>],
        erased: &[usize],
        outputs: &mut [&mut [u8]],
    ) -> CodecResult<()> {
        let total = self.total_units();
        if inputs.len() != total {
            return Err(CodecError::InputCountMismatch {
                expected: total,
                got: inputs.len(),
            });
        }
        if erased.len() != outputs.len() {
            return Err(CodecError::DecodingFailed(format!(
                "{} erased indices but {} outputs",
                erased.len(),
                outputs.len()
            )));
        }
        for &e in erased {
            if e >= total || inputs[e].is_some() {
                return Err(CodecError::ErasedIndexPresent { index: e });
            }
        }

        // Move inputs into the reusable per-column shard buffers; absent
        // columns stay None and are materialized by reconstruction.
        let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(total);
        for (i, input) in inputs.iter().enumerate() {
            match input {
                Some(slice) => {
                    let mut buf = mem::take(&mut self.scratch[i]);
                    buf.clear();
                    buf.extend_from_slice(slice);
                    shards.push(Some(buf));
                }
                None => shards.push(None),
            }
        }

        let res = self
            .rs
            .reconstruct(&mut shards)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()));

        if res.is_ok() {
            for (out, &e) in outputs.iter_mut().zip(erased) {
                let shard = shards[e]
                    .as_ref()
                    .ok_or(CodecError::ErasedIndexPresent { index: e })?;
                let n = out.len().min(shard.len());
                out[..n].copy_from_slice(&shard[..n]);
            }
        }

        // Hand the buffers back for the next window.
        for (slot, shard) in self.scratch.iter_mut().zip(shards) {
            if let Some(buf) = shard {
                *slot = buf;
            }
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(k: usize, len: usize) -> Vec<Vec<u8>> {
        (0..k)
            .map(|i| (0..len).map(|j| (i * 31 + j * 7 + 3) as u8).collect())
            .collect()
    }

    #[test]
    fn test_encode_decode_data_column() {
        let mut codec = RsCodec::new(3, 2).unwrap();
        let data = columns(3, 100);
        let refs: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();
        let parity = codec.encode(&refs).unwrap();
        assert_eq!(parity.len(), 2);

        // Erase data column 1 and decode it back.
        let inputs: Vec<Option<&[u8]>> = vec![
            Some(&data[0]),
            None,
            Some(&data[2]),
            Some(&parity[0]),
            None,
        ];
        let mut out = vec![0u8; 100];
        codec
            .decode(&inputs, &[1], &mut [out.as_mut_slice()])
            .unwrap();
        assert_eq!(out, data[1]);
    }

    #[test]
    fn test_decode_parity_column() {
        let mut codec = RsCodec::new(3, 2).unwrap();
        let data = columns(3, 64);
        let refs: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();
        let parity = codec.encode(&refs).unwrap();

        let inputs: Vec<Option<&[u8]>> = vec![
            Some(&data[0]),
            Some(&data[1]),
            Some(&data[2]),
            None,
            None,
        ];
        let mut out0 = vec![0u8; 64];
        let mut out1 = vec![0u8; 64];
        codec
            .decode(
                &inputs,
                &[3, 4],
                &mut [out0.as_mut_slice(), out1.as_mut_slice()],
            )
            .unwrap();
        assert_eq!(out0, parity[0]);
        assert_eq!(out1, parity[1]);
    }

    #[test]
    fn test_decode_odd_length() {
        // Column length with no alignment at all.
        let mut codec = RsCodec::new(4, 2).unwrap();
        let data = columns(4, 37);
        let refs: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();
        let parity = codec.encode(&refs).unwrap();

        let inputs: Vec<Option<&[u8]>> = vec![
            None,
            Some(&data[1]),
            Some(&data[2]),
            Some(&data[3]),
            Some(&parity[0]),
            None,
        ];
        let mut out = vec![0u8; 37];
        codec
            .decode(&inputs, &[0], &mut [out.as_mut_slice()])
            .unwrap();
        assert_eq!(out, data[0]);
    }

    #[test]
    fn test_decode_reuses_scratch() {
        let mut codec = RsCodec::new(3, 2).unwrap();
        let data = columns(3, 50);
        let refs: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();
        let parity = codec.encode(&refs).unwrap();

        for _ in 0..3 {
            let inputs: Vec<Option<&[u8]>> = vec![
                None,
                Some(&data[1]),
                Some(&data[2]),
                Some(&parity[0]),
                None,
            ];
            let mut out = vec![0u8; 50];
            codec
                .decode(&inputs, &[0], &mut [out.as_mut_slice()])
                .unwrap();
            assert_eq!(out, data[0]);
        }
    }

    #[test]
    fn test_erased_index_must_be_absent() {
        let mut codec = RsCodec::new(3, 2).unwrap();
        let data = columns(3, 16);
        let inputs: Vec<Option<&[u8]>> = vec![
            Some(&data[0]),
            Some(&data[1]),
            Some(&data[2]),
            None,
            None,
        ];
        let mut out = vec![0u8; 16];
        let err = codec
            .decode(&inputs, &[0], &mut [out.as_mut_slice()])
            .unwrap_err();
        assert!(matches!(err, CodecError::ErasedIndexPresent { index: 0 }));
    }

    #[test]
    fn test_too_few_columns_fails() {
        let mut codec = RsCodec::new(3, 2).unwrap();
        let data = columns(3, 16);
        let inputs: Vec<Option<&[u8]>> =
            vec![Some(&data[0]), Some(&data[1]), None, None, None];
        let mut out = vec![0u8; 16];
        assert!(codec
            .decode(&inputs, &[2], &mut [out.as_mut_slice()])
            .is_err());
    }

    #[test]
    fn test_invalid_config() {
        assert!(RsCodec::new(0, 2).is_err());
        assert!(RsCodec::new(3, 0).is_err());
        assert!(RsCodec::new(200, 100).is_err());
    }
}
