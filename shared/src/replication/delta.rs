//! Byte-wise snapshot diffs.
//!
//! A delta is the XOR of two equal-length snapshots, run-length encoded as
//! a sequence of `(zero run, literal length, literal bytes)` records with
//! both counts as variable-length integers. The records cover the snapshot
//! exactly.

use weft_serde::BitStream;

use super::error::ReplicationError;

/// Literal runs absorb zero runs shorter than this
const MIN_ZERO_RUN: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// The snapshots are identical
    Unchanged,
    /// The encoded diff, smaller than the snapshot
    Delta(Vec<u8>),
    /// The diff can't be expressed or doesn't shrink the data; send the
    /// snapshot in full instead
    Init,
}

pub fn encode(previous: &[u8], next: &[u8]) -> DeltaOutcome {
    if previous.len() != next.len() {
        return DeltaOutcome::Init;
    }
    let xor: Vec<u8> = previous.iter().zip(next).map(|(a, b)| a ^ b).collect();
    if xor.iter().all(|byte| *byte == 0) {
        return DeltaOutcome::Unchanged;
    }

    let encoded = run_length_encode(&xor);
    if encoded.len() >= next.len() {
        return DeltaOutcome::Init;
    }
    DeltaOutcome::Delta(encoded)
}

/// Rebuild the next snapshot from the previous one and an encoded delta
pub fn apply(previous: &[u8], delta: &[u8]) -> Result<Vec<u8>, ReplicationError> {
    let mut output = previous.to_vec();
    let mut stream = BitStream::from_bytes(delta);
    let mut position = 0usize;

    while stream.remaining_bits() > 0 {
        let zero_run = stream.read_var_u64()? as usize;
        let literal_length = stream.read_length()?;
        position = position.saturating_add(zero_run);
        let end = position.saturating_add(literal_length);
        if end > output.len() {
            return Err(ReplicationError::LengthMismatch {
                expected: output.len(),
                actual: end,
            });
        }
        let literal = stream.read_raw(literal_length)?;
        for (byte, mask) in output[position..end].iter_mut().zip(literal) {
            *byte ^= mask;
        }
        position = end;
    }

    if position != output.len() {
        return Err(ReplicationError::LengthMismatch {
            expected: output.len(),
            actual: position,
        });
    }
    Ok(output)
}

fn run_length_encode(xor: &[u8]) -> Vec<u8> {
    let mut stream = BitStream::with_capacity(xor.len());
    let length = xor.len();
    let mut index = 0;

    while index < length {
        let zero_start = index;
        while index < length && xor[index] == 0 {
            index += 1;
        }
        let zero_run = index - zero_start;

        let literal_start = index;
        while index < length {
            if xor[index] != 0 {
                index += 1;
                continue;
            }
            let run = xor[index..].iter().take_while(|byte| **byte == 0).count();
            if run >= MIN_ZERO_RUN || index + run == length {
                break;
            }
            index += run;
        }

        stream.write_var_u64(zero_run as u64);
        stream.write_bytes(&xor[literal_start..index]);
    }

    stream.to_bytes()
}
