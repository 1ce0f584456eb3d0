//! Scalar dead-zone quantization, specified in Annex E.
//!
//! The irreversible path keeps its samples in FRACBITS fixed point through
//! the wavelet transform; the filter's K/1/K normalisation and the
//! fixed-point scale are both folded into the per-band quantiser factor.

use crate::codestream::{ComponentInfo, QuantizationInfo, QuantizationStyle, StepSize, WaveletTransform};
use crate::tile::SubBandType;

/// Fixed-point fraction bits carried through the irreversible pipeline.
pub(crate) const FRACBITS: u32 = 13;

/// Low-pass and high-pass synthesis scaling factors of the 9/7 filter.
const K: f32 = 1.2301741 / 2.0;
const K1: f32 = 0.8128931;

/// Per-orientation gain compensation (LL, HL, LH, HH).
const K_FACTOR: [f32; 4] = [1.0, K * K1, K1 * K, K * K];

fn orientation_index(band: SubBandType) -> usize {
    match band {
        SubBandType::LowLow => 0,
        SubBandType::HighLow => 1,
        SubBandType::LowHigh => 2,
        SubBandType::HighHigh => 3,
    }
}

/// The numeric parameters of one sub-band.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BandParams {
    pub(crate) exponent: u16,
    pub(crate) mantissa: u16,
    /// Dynamic range of the band: component precision plus filter gain.
    pub(crate) r_b: u16,
    /// Effective magnitude precision: exponent + guard bits - 1.
    pub(crate) m_b: u8,
    /// The quantization step size (1.0 on the reversible path).
    pub(crate) delta: f32,
    pub(crate) band: SubBandType,
    pub(crate) roi_shift: u8,
    pub(crate) transformation: WaveletTransform,
}

impl BandParams {
    pub(crate) fn new(info: &ComponentInfo, band: SubBandType, resolution: u16) -> Self {
        let (exponent, mantissa) = info.exponent_mantissa(band.band_index(), resolution);
        let r_b = info.size_info.precision as u16 + band.log_gain();
        // Equation (E-2); an implicit ROI raises the magnitude range by
        // its up-shift.
        let m_b = ((exponent + info.quantization_info.guard_bits as u16).saturating_sub(1)
            + info.roi_shift as u16)
            .min(255) as u8;

        let transformation = info.wavelet_transform();
        let delta = match transformation {
            WaveletTransform::Reversible53 => 1.0,
            WaveletTransform::Irreversible97 => {
                // Equation (E-3).
                ((1u64 << r_b) as f32 / (1u64 << exponent) as f32)
                    * (1.0 + mantissa as f32 / (1 << 11) as f32)
            }
        };

        Self {
            exponent,
            mantissa,
            r_b,
            m_b,
            delta,
            band,
            roi_shift: info.roi_shift,
            transformation,
        }
    }

    /// The factor mapping a fixed-point transform coefficient to its
    /// quantizer index.
    pub(crate) fn forward_scale(&self) -> f32 {
        (1u64 << self.r_b) as f32 / self.delta * K_FACTOR[orientation_index(self.band)]
            / (1u64 << FRACBITS) as f32
    }

    /// The 16.16 fixed-point factor used to undo [`Self::forward_scale`]
    /// on magnitudes that sit at bit position `31 - m_b` after block
    /// decoding.
    pub(crate) fn dequant_scale(&self) -> i32 {
        let mut fscale = self.delta / (1u64 << self.r_b) as f32;
        fscale /= K_FACTOR[orientation_index(self.band)];
        fscale *= (1u64 << FRACBITS) as f32;
        fscale /= (1u64 << (31 - self.m_b as u32)) as f32;
        fscale *= (1u64 << 16) as f32 * (1u64 << 16) as f32;

        (fscale + 0.5) as i32
    }
}

/// Quantize a band of fixed-point transform coefficients in place. The
/// reversible path passes through untouched.
pub(crate) fn quantize(samples: &mut [i32], params: &BandParams) {
    if params.transformation == WaveletTransform::Reversible53 {
        return;
    }

    let fscale = params.forward_scale();
    for sample in samples.iter_mut() {
        let fval = *sample as f32 * fscale;
        let magnitude = fval.abs().floor() as i32;
        *sample = if fval < 0.0 { -magnitude } else { magnitude };
    }
}

/// The default quantization signalling an encoder writes for a component.
pub(crate) fn default_quantization(
    transformation: WaveletTransform,
    precision: u8,
    num_decomposition_levels: u16,
    guard_bits: u8,
) -> QuantizationInfo {
    let num_bands = 3 * num_decomposition_levels as usize + 1;

    match transformation {
        WaveletTransform::Reversible53 => {
            // One reversible exponent per band: the band's dynamic range.
            let mut step_sizes = Vec::with_capacity(num_bands);
            step_sizes.push(StepSize {
                exponent: precision as u16,
                mantissa: 0,
            });

            for _ in 0..num_decomposition_levels {
                for gain in [1u16, 1, 2] {
                    step_sizes.push(StepSize {
                        exponent: precision as u16 + gain,
                        mantissa: 0,
                    });
                }
            }

            QuantizationInfo {
                quantization_style: QuantizationStyle::NoQuantization,
                guard_bits,
                step_sizes,
            }
        }
        WaveletTransform::Irreversible97 => {
            // A uniform fine step: two extra magnitude bits beyond the
            // component precision.
            let step_sizes = vec![
                StepSize {
                    exponent: precision as u16 + 2,
                    mantissa: 0,
                };
                num_bands
            ];

            QuantizationInfo {
                quantization_style: QuantizationStyle::ScalarExpounded,
                guard_bits,
                step_sizes,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::{
        CodingStyleComponent, CodingStyleFlags, CodingStyleParameters, ComponentSizeInfo,
    };

    fn lossy_component(precision: u8) -> ComponentInfo {
        ComponentInfo {
            size_info: ComponentSizeInfo {
                precision,
                is_signed: false,
                horizontal_resolution: 1,
                vertical_resolution: 1,
            },
            coding_style: CodingStyleComponent {
                flags: CodingStyleFlags::default(),
                parameters: CodingStyleParameters {
                    num_decomposition_levels: 2,
                    num_resolution_levels: 3,
                    code_block_width: 6,
                    code_block_height: 6,
                    code_block_style: 0,
                    transformation: WaveletTransform::Irreversible97,
                    precinct_exponents: vec![(15, 15); 3],
                },
            },
            quantization_info: default_quantization(WaveletTransform::Irreversible97, precision, 2, 2),
            roi_shift: 0,
            ht: true,
        }
    }

    #[test]
    fn quantized_magnitudes_fit_in_m_b() {
        let info = lossy_component(8);

        for band in [
            SubBandType::HighLow,
            SubBandType::LowHigh,
            SubBandType::HighHigh,
        ] {
            let params = BandParams::new(&info, band, 1);
            // The largest coefficient the transform can hand us: nominal
            // range times the filter gain, in fixed point.
            let extreme = (1i32 << (8 - 1 + FRACBITS - 8)) * 4;

            let mut samples = [extreme, -extreme];
            quantize(&mut samples, &params);

            assert!(samples[0].unsigned_abs() < 1 << params.m_b);
            assert_eq!(samples[0], -samples[1]);
        }
    }

    #[test]
    fn dequantization_is_monotone() {
        let info = lossy_component(8);
        let params = BandParams::new(&info, SubBandType::HighLow, 1);
        let scale = params.dequant_scale();
        assert!(scale > 0);

        // Reconstruct increasing magnitudes the way the block decoder does
        // and check the outputs increase as well.
        let mut previous = -1i64;
        for magnitude in 1u32..256 {
            let placed = (magnitude as i64) << (31 - params.m_b as u32);
            let narrowed = (placed + (1 << 15)) >> 16;
            let reconstructed = (narrowed * scale as i64 + (1 << 15)) >> 16;

            assert!(reconstructed > previous, "magnitude {magnitude}");
            previous = reconstructed;
        }
    }

    #[test]
    fn reversible_bands_pass_through() {
        let mut info = lossy_component(8);
        info.coding_style.parameters.transformation = WaveletTransform::Reversible53;
        info.quantization_info = default_quantization(WaveletTransform::Reversible53, 8, 2, 2);

        let params = BandParams::new(&info, SubBandType::HighHigh, 1);
        assert_eq!(params.delta, 1.0);
        assert_eq!(params.m_b, 8 + 2 + 2 - 1);

        let mut samples = [17, -3, 0];
        quantize(&mut samples, &params);
        assert_eq!(samples, [17, -3, 0]);
    }
}
