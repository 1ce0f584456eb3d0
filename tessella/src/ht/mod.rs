//! The HT (Part-15) block coder: cleanup encode/decode, refinement
//! decode, and the post-decoding dequantization step.

pub(crate) mod decode;
pub(crate) mod encode;
pub(crate) mod refinement;
pub(crate) mod streams;
pub(crate) mod vlc;

use crate::block::{BlockCoder, CodeBlock};
use crate::codestream::{CodeBlockMode, WaveletTransform};
use crate::error::{ErrorKind, Result, bail};
use crate::log::ltrace;
use crate::quant::BandParams;

/// Per-sample coder state planes: significance, scan position, refinement
/// value and refinement indicator.
pub(crate) struct BlockStates {
    width: u32,
    height: u32,
    sigma: Vec<u8>,
    scan: Vec<u8>,
    refinement_value: Vec<u8>,
    refinement_indicator: Vec<u8>,
}

impl BlockStates {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        let len = (width * height) as usize;
        Self {
            width,
            height,
            sigma: vec![0; len],
            scan: vec![0; len],
            refinement_value: vec![0; len],
            refinement_indicator: vec![0; len],
        }
    }

    #[inline]
    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            None
        } else {
            Some((y as u32 * self.width + x as u32) as usize)
        }
    }

    #[inline]
    pub(crate) fn sigma(&self, x: i64, y: i64) -> u8 {
        self.index(x, y).map(|i| self.sigma[i]).unwrap_or(0)
    }

    #[inline]
    pub(crate) fn scan(&self, x: i64, y: i64) -> u8 {
        self.index(x, y).map(|i| self.scan[i]).unwrap_or(0)
    }

    #[inline]
    pub(crate) fn refinement_value(&self, x: i64, y: i64) -> u8 {
        self.index(x, y)
            .map(|i| self.refinement_value[i])
            .unwrap_or(0)
    }

    #[inline]
    pub(crate) fn refinement_indicator(&self, x: u32, y: u32) -> u8 {
        self.refinement_indicator[(y * self.width + x) as usize]
    }

    #[inline]
    pub(crate) fn set_sigma(&mut self, x: u32, y: u32, value: u8) {
        self.sigma[(y * self.width + x) as usize] = value;
    }

    #[inline]
    pub(crate) fn set_scan(&mut self, x: u32, y: u32, value: u8) {
        self.scan[(y * self.width + x) as usize] = value;
    }

    #[inline]
    pub(crate) fn set_refinement_value(&mut self, x: u32, y: u32, value: u8) {
        self.refinement_value[(y * self.width + x) as usize] = value;
    }

    #[inline]
    pub(crate) fn set_refinement_indicator(&mut self, x: u32, y: u32, value: u8) {
        self.refinement_indicator[(y * self.width + x) as usize] = value;
    }
}

/// The Part-15 block coder.
pub(crate) struct HtCoder;

impl BlockCoder for HtCoder {
    fn encode(&self, block: &mut CodeBlock, params: &BandParams) -> Result<()> {
        encode::encode_cleanup(block, params)
    }

    fn decode(&self, block: &mut CodeBlock, params: &BandParams) -> Result<()> {
        decode_block(block, params)
    }

    fn max_block_width(&self) -> u32 {
        1024
    }

    fn max_block_height(&self) -> u32 {
        1024
    }
}

/// Decode every HT pass of a codeblock and dequantize the result into
/// `block.samples`.
fn decode_block(block: &mut CodeBlock, params: &BandParams) -> Result<()> {
    let width = block.rect.width();
    let height = block.rect.height();
    block.samples.clear();
    block.samples.resize((width * height) as usize, 0);

    ltrace!(
        "HT block {}x{}: M_b {}, exponent {}, mantissa {}",
        width,
        height,
        params.m_b,
        params.exponent,
        params.mantissa,
    );

    if params.m_b > 30 {
        bail!(ErrorKind::UnsupportedFeature("more than 30 magnitude bit-planes"));
    }

    // Leading all-zero pass lengths are placeholder passes; each set of
    // three stands for one skipped HT set.
    let mut p0 = 0u32;
    if block.num_passes > 3 {
        for length in &block.pass_lengths {
            if *length != 0 {
                break;
            }
            p0 += 1;
        }
        p0 /= 3;
    } else if block.total_length() == 0 && block.num_passes != 0 {
        p0 = 1;
    }

    let empty_passes = p0 * 3;
    if block.num_passes < empty_passes {
        bail!(ErrorKind::Truncated("placeholder passes exceed pass count"));
    }
    let num_ht_passes = block.num_passes - empty_passes;

    if num_ht_passes == 0 {
        return Ok(());
    }

    let segments: Vec<usize> = block
        .pass_lengths
        .iter()
        .enumerate()
        .filter(|(_, l)| **l != 0)
        .map(|(i, _)| i)
        .collect();
    if segments.is_empty() {
        return Ok(());
    }

    let lcup = block.pass_lengths[segments[0]] as usize;
    let lref: usize = segments[1..]
        .iter()
        .map(|i| block.pass_lengths[*i] as usize)
        .sum();

    if block.compressed.len() < lcup + lref || lcup < 2 {
        bail!(ErrorKind::Truncated("HT cleanup segment"));
    }

    let s_blk = p0 + block.num_zbp as u32;
    if s_blk >= 30 {
        bail!(ErrorKind::Truncated("HT skipped bit-planes"));
    }

    let mut dcup = block.compressed[..lcup].to_vec();
    let dref = block.compressed[lcup..lcup + lref].to_vec();

    let scup = ((dcup[lcup - 1] as usize) << 4) + (dcup[lcup - 2] & 0x0F) as usize;
    if scup < 2 || scup > lcup {
        bail!(ErrorKind::Truncated("HT cleanup tail length"));
    }

    // The modDcup substitution: decoders may run past the tail without
    // re-checking bounds.
    dcup[lcup - 1] = 0xFF;
    dcup[lcup - 2] |= 0x0F;
    let pcup = lcup - scup;

    let mut states = BlockStates::new(width, height);
    decode::decode_cleanup(block, &dcup, pcup, 30 - s_blk, &mut states)?;

    if num_ht_passes > 1 {
        refinement::sigprop_decode(
            block,
            &dref,
            30 - (s_blk + 1),
            &mut states,
            block.modes.contains(CodeBlockMode::CAUSAL),
        );
    }
    if num_ht_passes > 2 {
        refinement::magref_decode(block, &dref, 30 - (s_blk + 1), &mut states);
    }

    dequantize(block, params, s_blk, &states);

    Ok(())
}

/// Reconstruction as specified in E.1.1.2, including the ROI background
/// up-shift and the 0.5 offset for partially decoded samples.
fn dequantize(block: &mut CodeBlock, params: &BandParams, s_blk: u32, states: &BlockStates) {
    let m_b = params.m_b as i32;
    let p_lsb = 31 - m_b; // indicates the binary point
    let roi_shift = params.roi_shift as u32;

    // Bit mask for ROI background detection.
    let mask = u32::MAX >> (m_b + 1);

    let width = block.rect.width();
    let height = block.rect.height();
    let scale = params.dequant_scale() as i64;
    let reversible = params.transformation == WaveletTransform::Reversible53;

    for y in 0..height {
        for x in 0..width {
            let sample = &mut block.samples[(y * width + x) as usize];
            let sign = (*sample as u32) & 0x8000_0000;
            let mut val = (*sample as u32) & 0x7FFF_FFFF;

            // Detect background samples and shift them back up.
            if roi_shift > 0 && (val & !mask) == 0 {
                val <<= roi_shift;
            }

            let z_n = states.refinement_indicator(x, y) as u32;
            let n_b = if roi_shift > 0 {
                m_b
            } else {
                (s_blk + 1 + z_n) as i32
            };

            // The reconstruction offset (the 0.5 of the dead zone).
            let offset = i32::max(m_b - n_b, 0);
            let r_val = 1u32 << (p_lsb - 1 + offset);

            if reversible {
                if val != 0 && n_b < m_b {
                    val |= r_val;
                }

                let signed = if sign != 0 {
                    -(val as i32)
                } else {
                    val as i32
                };
                // ROI-coded magnitudes sit `roi_shift` planes above their
                // natural range; bring them back down.
                *sample = (signed >> p_lsb) >> roi_shift;
            } else {
                if val != 0 {
                    val |= r_val;
                }

                let narrowed = ((val + (1 << 15)) >> 16) as i32;
                let signed = if sign != 0 { -narrowed } else { narrowed };
                let wide = signed as i64 * scale;
                let shift = 16 + roi_shift;
                *sample = ((wide + (1i64 << (shift - 1))) >> shift) as i32;
            }
        }
    }
}
