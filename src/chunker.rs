use std::ops::Range;

use fastcdc::v2020::FastCDC;
use serde::{Deserialize, Serialize};

use crate::config::ChunkSizes;
use crate::error::{Error, Result};

/// How a file's bytes are cut into chunks.
///
/// The strategy is stored with every file, as changing how boundaries are
/// placed changes which chunks deduplicate against each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkingStrategy {
    /// Polynomial rolling hash over a `min`-sized window, modulo `avg`.
    Rolling(ChunkSizes),
    /// The 2020 FastCDC gear hash.
    FastCdc(ChunkSizes),
    Fixed(u32),
}

const KIB: u32 = 1024;

pub const DEFAULT_SIZES: ChunkSizes = ChunkSizes::new(4 * KIB, 64 * KIB, 256 * KIB);

impl Default for ChunkingStrategy {
    fn default() -> Self {
        Self::Rolling(DEFAULT_SIZES)
    }
}

impl ChunkingStrategy {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Rolling(sizes) => sizes.validate(),
            Self::FastCdc(sizes) => {
                sizes.validate()?;
                use fastcdc::v2020::{
                    AVERAGE_MAX, AVERAGE_MIN, MAXIMUM_MAX, MAXIMUM_MIN, MINIMUM_MAX, MINIMUM_MIN,
                };
                let in_bounds = (MINIMUM_MIN..=MINIMUM_MAX).contains(&sizes.min)
                    && (AVERAGE_MIN..=AVERAGE_MAX).contains(&sizes.avg)
                    && (MAXIMUM_MIN..=MAXIMUM_MAX).contains(&sizes.max);
                if !in_bounds {
                    return Err(Error::InvalidConfiguration(format!(
                        "{sizes:?} is outside of the bounds supported by FastCDC"
                    )));
                }
                Ok(())
            }
            Self::Fixed(0) => Err(Error::InvalidConfiguration(
                "fixed chunk size must be positive".into(),
            )),
            Self::Fixed(_) => Ok(()),
        }
    }

    /// Splits `data` into ranges that cover it exactly, in order.
    pub fn split(&self, data: &[u8]) -> Result<Vec<Range<usize>>> {
        self.validate()?;

        let ranges = match *self {
            Self::Rolling(sizes) => RollingChunks::new(data, sizes).collect(),
            Self::FastCdc(sizes) => FastCDC::new(data, sizes.min, sizes.avg, sizes.max)
                .map(|chunk| chunk.offset..chunk.offset + chunk.length)
                .collect(),
            Self::Fixed(size) => {
                let size = size as usize;
                (0..data.len())
                    .step_by(size)
                    .map(|start| start..data.len().min(start + size))
                    .collect()
            }
        };
        Ok(ranges)
    }
}

/// Splits `data` with the rolling hash.
pub fn chunk(data: &[u8], sizes: ChunkSizes) -> Result<Vec<Range<usize>>> {
    ChunkingStrategy::Rolling(sizes).split(data)
}

/// Multiplier of the polynomial rolling hash.
const D: i64 = 257;

/// Iterator over the rolling-hash chunk boundaries of a byte slice.
///
/// The hash is kept modulo `avg`, and a boundary is taken where its low
/// `log2(avg)` bits are all zero. With `avg` a power of two the modulus and
/// the mask agree, which is why every size has to be one.
pub struct RollingChunks<'a> {
    data: &'a [u8],
    min: usize,
    max: usize,
    mask: i64,
    modulus: i64,
    /// `D^i mod avg` for the top exponents of the window that the input
    /// can reach, lowest first. The last entry is always `D^(min-1)`.
    powers: Vec<i64>,
    start: usize,
}

impl<'a> RollingChunks<'a> {
    /// Callers are expected to have validated `sizes`.
    pub fn new(data: &'a [u8], sizes: ChunkSizes) -> Self {
        let window = sizes.min as usize;
        let modulus = i64::from(sizes.avg);

        // a chunk never fills more of the window than the input holds
        let reach = window.min(data.len());
        let mut powers = Vec::with_capacity(reach);
        if reach > 0 {
            powers.push(pow_mod(D, (window - reach) as u64, modulus));
            for i in 1..reach {
                powers.push((powers[i - 1] * D) % modulus);
            }
        }

        Self {
            data,
            min: window,
            max: sizes.max as usize,
            mask: modulus - 1,
            modulus,
            powers,
            start: 0,
        }
    }
}

impl Iterator for RollingChunks<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        let data = self.data;
        let start = self.start;
        if start >= data.len() {
            return None;
        }

        let window = self.min;
        let mut hash: i64 = 0;

        for pos in start..data.len() {
            let len = pos - start + 1;
            let byte = i64::from(data[pos]);

            if len <= window {
                // D^(window - len)
                let power = self.powers[self.powers.len() - len];
                hash = (hash + (byte * power) % self.modulus) % self.modulus;
            } else {
                let outgoing = i64::from(data[pos - window]);
                let top = self.powers[self.powers.len() - 1];
                let term = (outgoing * top) % self.modulus;
                let shifted = (D * (hash - term)) % self.modulus;
                hash = (shifted + byte).rem_euclid(self.modulus);
            }

            if len >= self.min && (len >= self.max || hash & self.mask == 0) {
                self.start = pos + 1;
                return Some(start..pos + 1);
            }
        }

        self.start = data.len();
        Some(start..data.len())
    }
}

fn pow_mod(base: i64, mut exp: u64, modulus: i64) -> i64 {
    let mut result = 1 % modulus;
    let mut base = base % modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            result = (result * base) % modulus;
        }
        base = (base * base) % modulus;
        exp >>= 1;
    }
    result
}
