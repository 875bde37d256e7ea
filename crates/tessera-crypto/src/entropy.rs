//! Entropy normalization
//!
//! Compresses 300 physical die rolls into a fixed 256-bit [`Seed`].
//! The seed is the only input to the whole key hierarchy, so the same
//! roll sequence always regenerates the same identity.

use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};

/// Number of die rolls required for a seed
pub const DICE_ROLL_COUNT: usize = 300;

/// Seed size in bytes (256 bits)
pub const SEED_SIZE: usize = 32;

/// Normalized 256-bit seed. Never persisted.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed([u8; SEED_SIZE]);

impl Seed {
    /// Normalize a roll sequence into a seed.
    ///
    /// Input must be exactly [`DICE_ROLL_COUNT`] values, each in `1..=6`.
    /// The canonical serialization is the ASCII digit string of the rolls;
    /// the seed is the first 32 bytes of its SHA-512 digest.
    pub fn from_dice_rolls(rolls: &[u8]) -> Result<Self> {
        validate_rolls(rolls)?;

        let mut canonical: Vec<u8> = rolls.iter().map(|r| b'0' + r).collect();
        let digest = Sha512::digest(&canonical);
        canonical.zeroize();

        let mut seed = [0u8; SEED_SIZE];
        seed.copy_from_slice(&digest[..SEED_SIZE]);
        Ok(Self(seed))
    }

    /// Wrap raw seed bytes (recovery and tests)
    pub fn from_bytes(bytes: [u8; SEED_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get seed bytes
    pub fn as_bytes(&self) -> &[u8; SEED_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Seed(..)")
    }
}

/// Check length and range of a roll sequence
pub fn validate_rolls(rolls: &[u8]) -> Result<()> {
    if rolls.len() != DICE_ROLL_COUNT {
        return Err(CryptoError::InvalidEntropy(format!(
            "expected {} rolls, got {}",
            DICE_ROLL_COUNT,
            rolls.len()
        )));
    }
    if let Some((index, value)) = rolls
        .iter()
        .enumerate()
        .find(|(_, r)| !(1..=6).contains(*r))
    {
        return Err(CryptoError::InvalidEntropy(format!(
            "roll {} has value {}, expected 1..=6",
            index, value
        )));
    }
    Ok(())
}

/// Parse a textual roll listing.
///
/// Every digit `1`-`6` is one roll; whitespace and commas are separators.
/// Any other character is rejected. Length is not checked here.
pub fn parse_dice_rolls(input: &str) -> Result<Vec<u8>> {
    let mut rolls = Vec::with_capacity(DICE_ROLL_COUNT);
    for (position, ch) in input.chars().enumerate() {
        match ch {
            '1'..='6' => rolls.push(ch as u8 - b'0'),
            ',' => {}
            c if c.is_whitespace() => {}
            other => {
                return Err(CryptoError::InvalidEntropy(format!(
                    "unexpected character {:?} at position {}",
                    other, position
                )))
            }
        }
    }
    Ok(rolls)
}

/// Estimate the entropy of a roll sequence in bits.
///
/// Uses the empirical face distribution: `n * H(p)`. This only catches
/// degenerate input (a stuck die, a repeated face); it cannot prove that
/// the rolls were actually random.
pub fn estimate_entropy_bits(rolls: &[u8]) -> u32 {
    if rolls.is_empty() {
        return 0;
    }

    let mut counts = [0usize; 6];
    for &roll in rolls {
        if (1..=6).contains(&roll) {
            counts[(roll - 1) as usize] += 1;
        }
    }

    let n = rolls.len() as f64;
    let per_roll: f64 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum();

    (per_roll * n).floor() as u32
}

/// Reject roll sequences whose estimate is below `required_bits`
pub fn ensure_min_entropy(rolls: &[u8], required_bits: u32) -> Result<()> {
    let estimated_bits = estimate_entropy_bits(rolls);
    if estimated_bits < required_bits {
        return Err(CryptoError::InsufficientEntropy {
            estimated_bits,
            required_bits,
        });
    }
    Ok(())
}
