//! Transaction mortality.

use codec::{Decode, Encode, Error as CodecError, Input, Output};

use crate::config::ExtrinsicConfig;

const MIN_PERIOD: u64 = 4;
const MAX_PERIOD: u64 = 1 << 16;

/// Era for transaction mortality
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Era {
    /// Transaction is immortal
    Immortal,
    /// Valid for `period` blocks starting at the block whose number is
    /// `phase` modulo `period`
    Mortal { period: u64, phase: u64 },
}

impl Era {
    /// Mortal era of roughly `period` blocks anchored at `current_block`.
    ///
    /// The period is rounded up to a power of two within `[4, 65536]` and the
    /// phase is quantized so the era fits in two bytes.
    pub fn mortal(period: u64, current_block: u64) -> Self {
        let period = period
            .checked_next_power_of_two()
            .unwrap_or(MAX_PERIOD)
            .clamp(MIN_PERIOD, MAX_PERIOD);
        let phase = current_block % period;
        let quantize_factor = (period >> 12).max(1);
        Era::Mortal {
            period,
            phase: phase / quantize_factor * quantize_factor,
        }
    }

    /// First block of the era that contains `current_block`.
    pub fn birth(&self, current_block: u64) -> u64 {
        match self {
            Era::Immortal => 0,
            Era::Mortal { period, phase } => {
                (current_block.max(*phase) - phase) / period * period + phase
            }
        }
    }

    /// Last block (exclusive) for which the era is valid.
    pub fn death(&self, current_block: u64) -> u64 {
        match self {
            Era::Immortal => u64::MAX,
            Era::Mortal { period, .. } => self.birth(current_block) + period,
        }
    }
}

impl Encode for Era {
    fn encode_to<T: Output + ?Sized>(&self, dest: &mut T) {
        match self {
            Era::Immortal => dest.push_byte(0),
            Era::Mortal { period, phase } => {
                let quantize_factor = (*period >> 12).max(1);
                let encoded_period = (period.trailing_zeros().saturating_sub(1)).clamp(1, 15) as u16;
                let quantized_phase = (*phase / quantize_factor) as u16;
                let encoded = encoded_period | (quantized_phase << 4);
                encoded.encode_to(dest);
            }
        }
    }
}

impl Decode for Era {
    fn decode<I: Input>(input: &mut I) -> Result<Self, CodecError> {
        let first = input.read_byte()?;
        if first == 0 {
            return Ok(Era::Immortal);
        }
        let encoded = first as u64 + ((input.read_byte()? as u64) << 8);
        let period = 2 << (encoded % (1 << 4));
        let quantize_factor = (period >> 12).max(1);
        let phase = (encoded >> 4) * quantize_factor;
        if period >= MIN_PERIOD && phase < period {
            Ok(Era::Mortal { period, phase })
        } else {
            Err("Invalid period and phase".into())
        }
    }
}

/// Chain inputs of the mortality computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EraInputs {
    pub finalized_block: u64,
    pub best_block: u64,
    pub block_time_ms: u64,
    /// `System.BlockHashCount`
    pub block_hash_count: u32,
}

/// Era and the number of the block whose hash goes into the signed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EraParameters {
    pub era: Era,
    pub block_number: u64,
}

/// Picks a mortal era that keeps the extrinsic valid for the configured
/// wall-clock period without outliving the block hashes the chain retains.
pub struct MortalEraCalculator {
    config: ExtrinsicConfig,
}

impl MortalEraCalculator {
    pub fn new(config: ExtrinsicConfig) -> Self {
        Self { config }
    }

    pub fn calculate(&self, inputs: EraInputs) -> EraParameters {
        let block_time = inputs.block_time_ms.max(1);
        let finality_lag = inputs
            .best_block
            .saturating_sub(inputs.finalized_block)
            .max(self.config.max_finality_lag);
        let wanted = self.config.mortal_period_ms / block_time + finality_lag;
        let period = wanted.min(inputs.block_hash_count as u64);

        let era = Era::mortal(period, inputs.finalized_block);
        EraParameters {
            era,
            block_number: era.birth(inputs.finalized_block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_era_immortal() {
        let era = Era::Immortal;
        assert_eq!(era.encode(), vec![0u8]);
        assert_eq!(Era::decode(&mut &[0u8][..]).unwrap(), Era::Immortal);
    }

    #[test]
    fn test_era_mortal() {
        let era = Era::mortal(64, 42);
        assert_eq!(era, Era::Mortal { period: 64, phase: 42 });
        assert_eq!(era.encode(), vec![165, 2]);
        assert_eq!(Era::decode(&mut &era.encode()[..]).unwrap(), era);
    }

    #[test]
    fn test_era_quantized_phase() {
        let era = Era::mortal(32768, 20000);
        assert_eq!(era, Era::Mortal { period: 32768, phase: 20000 / 8 * 8 });
        assert_eq!(era.encode(), vec![(14 | (2500 << 4)) as u8, ((14 | (2500 << 4)) >> 8) as u8]);
        assert_eq!(Era::decode(&mut &era.encode()[..]).unwrap(), era);
    }

    #[test]
    fn test_period_bounds() {
        assert_eq!(Era::mortal(1, 10), Era::Mortal { period: 4, phase: 2 });
        assert_eq!(Era::mortal(100, 10), Era::Mortal { period: 128, phase: 10 });
        assert!(matches!(Era::mortal(1 << 20, 10), Era::Mortal { period: 65536, .. }));
    }

    #[test]
    fn test_birth_and_death() {
        let era = Era::mortal(256, 1000);
        assert_eq!(era.birth(1000), 1000);
        assert_eq!(era.birth(1100), 1000);
        assert_eq!(era.birth(1300), 1256);
        assert_eq!(era.death(1000), 1256);
    }

    #[test]
    fn test_calculator_respects_block_hash_count() {
        let calculator = MortalEraCalculator::new(ExtrinsicConfig::default());
        let params = calculator.calculate(EraInputs {
            finalized_block: 1000,
            best_block: 1002,
            block_time_ms: 6_000,
            block_hash_count: 4096,
        });
        // 300s / 6s + lag 5 = 55 blocks, rounded up to 64.
        assert_eq!(params.era, Era::Mortal { period: 64, phase: 1000 % 64 });
        assert_eq!(params.block_number, 1000);

        let params = calculator.calculate(EraInputs {
            finalized_block: 1000,
            best_block: 1000,
            block_time_ms: 100,
            block_hash_count: 250,
        });
        assert!(matches!(params.era, Era::Mortal { period: 256, .. }));
    }
}
