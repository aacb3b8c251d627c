//! Data Pattern: fill/verify buffers with selectable patterns.
//!
//! Grounded on `examples/original_source/src/common/datapatterns.c`.
//! The named compliance patterns (LFPAT/LTPAT/CJTPAT/CRPAT/CSPAT) are
//! reproduced here as fixed, deterministically generated templates
//! rather than the exact proprietary industry byte tables — sufficient
//! for a verify-by-template contract, and noted as a simplification
//! rather than silently guessed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DataPattern;

/// Context needed to fill/verify a buffer at a given absolute file
/// offset (sequenced patterns embed the offset in every 8-byte word).
#[derive(Debug, Clone, Copy)]
pub struct FillContext {
    pub absolute_offset: u64,
    /// Per-target seed, used when `DataPattern::Random { per_target: true }`.
    pub target_seed: u64,
}

/// Fill `buf` according to `pattern`.
pub fn fill(buf: &mut [u8], pattern: &DataPattern, ctx: FillContext) {
    match pattern {
        DataPattern::Fixed(byte) => buf.iter_mut().for_each(|b| *b = *byte),
        DataPattern::Ascii { text, replicate } => fill_replicated(buf, text.as_bytes(), *replicate),
        DataPattern::Hex { text, replicate } => {
            let bytes = decode_hex(text);
            fill_replicated(buf, &bytes, *replicate);
        }
        DataPattern::Random { seed, per_target } => {
            let seed = if *per_target { ctx.target_seed } else { *seed };
            let mut rng = StdRng::seed_from_u64(seed);
            rng.fill(buf);
        }
        DataPattern::Sequenced { prefix, inverse } => fill_sequenced(buf, ctx.absolute_offset, *prefix, *inverse),
        DataPattern::File { path } => {
            let data = std::fs::read(path).unwrap_or_default();
            fill_replicated(buf, &data, true);
        }
        DataPattern::Lfpat => fill_replicated(buf, &template_lfpat(), true),
        DataPattern::Ltpat => fill_replicated(buf, &template_ltpat(), true),
        DataPattern::Cjtpat => fill_replicated(buf, &template_cjtpat(), true),
        DataPattern::Crpat => fill_replicated(buf, &template_crpat(), true),
        DataPattern::Cspat => fill_replicated(buf, &template_cspat(), true),
    }
}

fn fill_replicated(buf: &mut [u8], template: &[u8], replicate: bool) {
    if template.is_empty() {
        return;
    }
    if replicate {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = template[i % template.len()];
        }
    } else {
        let n = buf.len().min(template.len());
        buf[..n].copy_from_slice(&template[..n]);
    }
}

fn decode_hex(text: &str) -> Vec<u8> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    clean
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .filter_map(|s| u8::from_str_radix(s, 16).ok())
        .collect()
}

fn fill_sequenced(buf: &mut [u8], absolute_offset: u64, prefix: u32, inverse: bool) {
    for (i, word) in buf.chunks_mut(8).enumerate() {
        let offset = absolute_offset + (i as u64) * 8;
        let mut value = offset | ((prefix as u64) << 32);
        if inverse {
            value = !value;
        }
        let bytes = value.to_be_bytes();
        let n = word.len();
        word.copy_from_slice(&bytes[..n]);
    }
}

/// Verify `buf` against the expected pattern at `absolute_offset`,
/// returning a mismatch count. Sequenced verification checks every
/// 8-byte word; mismatches beyond `cap` are still counted but not
/// individually reported.
pub fn verify(
    buf: &[u8],
    pattern: &DataPattern,
    absolute_offset: u64,
    report_cap: usize,
    mut on_mismatch: impl FnMut(u64, u64, u64),
) -> u64 {
    match pattern {
        DataPattern::Sequenced { prefix, inverse } => {
            let mut errors = 0u64;
            let mut reported = 0usize;
            for (i, word) in buf.chunks(8).enumerate() {
                let offset = absolute_offset + (i as u64) * 8;
                let mut expected = offset | ((*prefix as u64) << 32);
                if *inverse {
                    expected = !expected;
                }
                let mut padded = [0u8; 8];
                padded[..word.len()].copy_from_slice(word);
                let actual = u64::from_be_bytes(padded);
                if actual != expected {
                    errors += 1;
                    if reported < report_cap {
                        on_mismatch(offset, expected, actual);
                        reported += 1;
                    }
                }
            }
            errors
        }
        _ => {
            // Non-sequenced patterns are verified by regenerating an
            // expected buffer and comparing byte-for-byte.
            let mut expected = vec![0u8; buf.len()];
            fill(
                &mut expected,
                pattern,
                FillContext {
                    absolute_offset,
                    target_seed: 0,
                },
            );
            let mut errors = 0u64;
            let mut reported = 0usize;
            for (i, (a, e)) in buf.iter().zip(expected.iter()).enumerate() {
                if a != e {
                    errors += 1;
                    if reported < report_cap {
                        on_mismatch(absolute_offset + i as u64, *e as u64, *a as u64);
                        reported += 1;
                    }
                }
            }
            errors
        }
    }
}

fn template_lfpat() -> Vec<u8> {
    (0u8..=255).collect()
}

fn template_ltpat() -> Vec<u8> {
    let mut v = Vec::with_capacity(256);
    for i in 0u8..=255 {
        v.push(i);
        v.push(!i);
    }
    v
}

fn template_cjtpat() -> Vec<u8> {
    vec![0x00, 0xFF, 0x55, 0xAA, 0x00, 0xFF, 0x55, 0xAA]
}

fn template_crpat() -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(0xC2_A1_F0_0D);
    let mut v = vec![0u8; 512];
    rng.fill(v.as_mut_slice());
    v
}

fn template_cspat() -> Vec<u8> {
    vec![0x55, 0xAA]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(offset: u64) -> FillContext {
        FillContext {
            absolute_offset: offset,
            target_seed: 42,
        }
    }

    #[test]
    fn sequenced_round_trip_is_clean() {
        let mut buf = vec![0u8; 64];
        let pattern = DataPattern::Sequenced {
            prefix: 0,
            inverse: false,
        };
        fill(&mut buf, &pattern, ctx(0));
        assert_eq!(&buf[0..8], &0u64.to_be_bytes());
        assert_eq!(&buf[8..16], &8u64.to_be_bytes());
        let errors = verify(&buf, &pattern, 0, 16, |_, _, _| {});
        assert_eq!(errors, 0);
    }

    #[test]
    fn sequenced_inverse_round_trip() {
        let mut buf = vec![0u8; 16];
        let pattern = DataPattern::Sequenced {
            prefix: 7,
            inverse: true,
        };
        fill(&mut buf, &pattern, ctx(1024));
        let errors = verify(&buf, &pattern, 1024, 16, |_, _, _| {});
        assert_eq!(errors, 0);
    }

    #[test]
    fn sequenced_corruption_is_detected() {
        let mut buf = vec![0u8; 16];
        let pattern = DataPattern::Sequenced {
            prefix: 0,
            inverse: false,
        };
        fill(&mut buf, &pattern, ctx(0));
        buf[0] ^= 0xFF;
        let errors = verify(&buf, &pattern, 0, 16, |_, _, _| {});
        assert_eq!(errors, 1);
    }

    #[test]
    fn ascii_replicated_fills_whole_buffer() {
        let mut buf = vec![0u8; 10];
        fill(
            &mut buf,
            &DataPattern::Ascii {
                text: "ab".into(),
                replicate: true,
            },
            ctx(0),
        );
        assert_eq!(buf, b"ababababab");
    }

    #[test]
    fn fixed_byte_pattern() {
        let mut buf = vec![0u8; 8];
        fill(&mut buf, &DataPattern::Fixed(0x5A), ctx(0));
        assert!(buf.iter().all(|b| *b == 0x5A));
    }
}
