//! The Part-1 bitplane decoder, described in Annex D.
//!
//! Legacy codeblocks group their samples into bit planes and code the bits
//! with the MQ coder under a context model. This module reverts that
//! model, recovering the magnitudes and signs of each sample. It is the
//! decoding half of the `Part1` block-coder variant; encoding always uses
//! the HT path.

use crate::bit_reader::StuffedBits;
use crate::block::{BlockCoder, CodeBlock};
use crate::codestream::{CodeBlockMode, WaveletTransform};
use crate::error::{ErrorKind, Result, bail};
use crate::log::lwarn;
use crate::mq::{ArithmeticDecoder, DecoderContext};
use crate::quant::BandParams;
use crate::tile::SubBandType;

/// The Part-1 block coder. Decode only; the encoder always produces HT
/// codeblocks.
pub(crate) struct Part1Coder;

impl BlockCoder for Part1Coder {
    fn encode(&self, _block: &mut CodeBlock, _params: &BandParams) -> Result<()> {
        Err(ErrorKind::UnsupportedFeature("Part-1 block encoding").into())
    }

    fn decode(&self, block: &mut CodeBlock, params: &BandParams) -> Result<()> {
        decode(block, params)
    }

    fn max_block_width(&self) -> u32 {
        64
    }

    fn max_block_height(&self) -> u32 {
        64
    }
}

// We only allow 31 bit planes because we need one bit for the sign.
pub(crate) const BITPLANE_BIT_SIZE: u32 = u32::BITS - 1;

/// Decode every coding pass of a codeblock and store the dequantized
/// coefficients in `block.samples`.
pub(crate) fn decode(block: &mut CodeBlock, params: &BandParams) -> Result<()> {
    let num_samples = block.rect.area();
    block.samples.clear();
    block.samples.resize(num_samples, 0);

    if block.num_passes == 0 {
        return Ok(());
    }

    let num_bitplanes = params.m_b;

    // Validate the number of bitplanes.
    if block.num_zbp as u32 + 1 + (block.num_passes - 1).div_ceil(3) > num_bitplanes as u32 {
        bail!(ErrorKind::Truncated(
            "mismatch between indicated number of bitplanes and actual ones"
        ));
    }

    if num_bitplanes as u32 > BITPLANE_BIT_SIZE {
        bail!(ErrorKind::UnsupportedFeature("more than 31 bitplanes"));
    }

    let mut ctx = DecodeContext::new(block, params.band);

    for span in segment_spans(block)? {
        let data = &block.compressed[span.bytes.clone()];

        if span.arithmetic {
            let mut decoder = ArithmeticDecoder::new(data);
            handle_coding_passes(span.passes.clone(), block.modes, &mut ctx, &mut decoder)?;
        } else {
            let mut decoder = BypassDecoder::new(data);
            handle_coding_passes(span.passes.clone(), block.modes, &mut ctx, &mut decoder)?;
        }
    }

    // Extend all coefficients with zero bits until we have the required
    // number of bits.
    for (coefficient, state) in ctx.coefficients.iter_mut().zip(ctx.states.iter().copied()) {
        for _ in 0..(num_bitplanes - state.num_bitplanes()) {
            coefficient.push_bit(0);
        }
    }

    // The coefficients are plain quantizer indices; undo the forward
    // quantizer for the irreversible path.
    let inverse_scale = match params.transformation {
        WaveletTransform::Reversible53 => None,
        WaveletTransform::Irreversible97 => Some(1.0 / params.forward_scale()),
    };

    let roi_shift = params.roi_shift as u32;
    for (sample, coefficient) in block.samples.iter_mut().zip(ctx.coefficients.iter()) {
        let value = coefficient.get() >> roi_shift;
        *sample = match inverse_scale {
            None => value,
            Some(scale) => (value as f32 * scale).round() as i32,
        };
    }

    Ok(())
}

/// One terminated MQ (or raw) segment: which passes it covers and where
/// its bytes live inside the codeblock's compressed buffer.
struct SegmentSpan {
    passes: core::ops::Range<u32>,
    bytes: core::ops::Range<usize>,
    arithmetic: bool,
}

/// Reconstruct the segment boundaries from the coding mode, mirroring the
/// partitioning the packet parser used when it recorded the pass lengths
/// (Table D.9 for the bypass mode).
fn segment_spans(block: &CodeBlock) -> Result<Vec<SegmentSpan>> {
    let total: usize = block.total_length();
    if block.compressed.len() < total {
        bail!(ErrorKind::Truncated("codeblock segment data"));
    }

    let restart = block.modes.contains(CodeBlockMode::RESTART);
    let bypass = block.modes.contains(CodeBlockMode::BYPASS);

    if !restart && !bypass {
        // A single MQ chain across every pass.
        return Ok(vec![SegmentSpan {
            passes: 0..block.num_passes,
            bytes: 0..total,
            arithmetic: true,
        }]);
    }

    let segment_of = |pass: u32| -> u32 {
        if restart {
            pass
        } else if pass < 10 {
            0
        } else {
            1 + 2 * ((pass - 10) / 3) + u32::from((pass - 10) % 3 == 2)
        }
    };

    let mut spans: Vec<SegmentSpan> = Vec::new();
    let mut start_pass = 0u32;
    let mut offset = 0usize;
    let mut length = 0usize;

    for pass in 0..block.num_passes {
        length += block.pass_lengths.get(pass as usize).copied().unwrap_or(0) as usize;

        let last_of_segment =
            pass + 1 == block.num_passes || segment_of(pass + 1) != segment_of(pass);
        if last_of_segment {
            let arithmetic = if bypass {
                // Raw segments start with the eleventh pass; every later
                // segment that begins on a cleanup pass returns to the MQ
                // coder.
                start_pass <= 9 || start_pass % 3 == 0
            } else {
                true
            };

            spans.push(SegmentSpan {
                passes: start_pass..pass + 1,
                bytes: offset..offset + length,
                arithmetic,
            });

            start_pass = pass + 1;
            offset += length;
            length = 0;
        }
    }

    Ok(spans)
}

fn handle_coding_passes(
    passes: core::ops::Range<u32>,
    modes: CodeBlockMode,
    ctx: &mut DecodeContext,
    decoder: &mut impl BitDecoder,
) -> Result<()> {
    for coding_pass in passes {
        // The first bitplane only has a cleanup pass, all other bitplanes
        // are in the order SPP -> MRP -> C.
        match coding_pass % 3 {
            0 => {
                cleanup_pass(ctx, decoder);

                if modes.contains(CodeBlockMode::SEGMARK) {
                    let b0 = decoder.read_bit(ctx.mq_context(18));
                    let b1 = decoder.read_bit(ctx.mq_context(18));
                    let b2 = decoder.read_bit(ctx.mq_context(18));
                    let b3 = decoder.read_bit(ctx.mq_context(18));

                    if b0 != 1 || b1 != 0 || b2 != 1 || b3 != 0 {
                        lwarn!("encountered invalid segmentation symbol");
                        bail!(ErrorKind::Truncated("segmentation symbol"));
                    }
                }

                ctx.reset_for_next_bitplane();
            }
            1 => significance_propagation_pass(ctx, decoder),
            _ => magnitude_refinement_pass(ctx, decoder),
        }

        if modes.contains(CodeBlockMode::RESET) {
            ctx.reset_contexts();
        }
    }

    Ok(())
}

const SIGNIFICANCE_SHIFT: u8 = 7;
const HAS_MAGNITUDE_REFINEMENT_SHIFT: u8 = 6;
const HAS_ZERO_CODING_SHIFT: u8 = 5;
const BITPLANE_COUNT_MASK: u8 = (1 << 5) - 1;

/// From MSB to LSB:
/// Bit 1 represents the significance state of each coefficient. Will be
/// set to one as soon as the first non-zero bit for that coefficient is
/// encountered.
/// Bit 2 stores whether the coefficient has previously had (at least one)
/// magnitude refinement pass.
/// Bit 3 stores whether the given coefficient belongs to a zero coding
/// pass applied as part of sign propagation in the current bitplane. This
/// value will be reset every time we advance to a new bitplane.
/// Bits 4-8 store the current number of bitplanes for the given
/// coefficient. Five bits are enough to store 0-31, which works out nicely
/// because our maximum number of bitplanes also is 31.
#[derive(Default, Copy, Clone)]
struct CoefficientState(u8);

impl CoefficientState {
    #[inline(always)]
    fn set_bit(&mut self, shift: u8, value: u8) {
        debug_assert!(value < 2);

        self.0 &= !(1u8 << shift);
        self.0 |= value << shift;
    }

    #[inline(always)]
    fn set_significant(&mut self) {
        self.set_bit(SIGNIFICANCE_SHIFT, 1);
    }

    #[inline(always)]
    fn set_zero_coded(&mut self, value: u8) {
        self.set_bit(HAS_ZERO_CODING_SHIFT, value & 1);
    }

    #[inline(always)]
    fn set_magnitude_refined(&mut self) {
        self.set_bit(HAS_MAGNITUDE_REFINEMENT_SHIFT, 1);
    }

    #[inline(always)]
    fn is_significant(&self) -> bool {
        (self.0 >> SIGNIFICANCE_SHIFT) & 1 == 1
    }

    #[inline(always)]
    fn is_magnitude_refined(&self) -> bool {
        (self.0 >> HAS_MAGNITUDE_REFINEMENT_SHIFT) & 1 == 1
    }

    #[inline(always)]
    fn is_zero_coded(&self) -> bool {
        (self.0 >> HAS_ZERO_CODING_SHIFT) & 1 == 1
    }

    #[inline(always)]
    fn num_bitplanes(&self) -> u8 {
        self.0 & BITPLANE_COUNT_MASK
    }

    #[inline(always)]
    fn set_magnitude_bits(&mut self, count: u8) {
        debug_assert!((count as u32) <= BITPLANE_BIT_SIZE);
        self.0 = (self.0 & !BITPLANE_COUNT_MASK) | (count & BITPLANE_COUNT_MASK);
    }
}

/// A sign-magnitude sample being built bitplane by bitplane.
#[derive(Copy, Clone, Debug, Default)]
struct Coefficient(u32);

impl Coefficient {
    fn get(&self) -> i32 {
        let magnitude = (self.0 & !0x8000_0000) as i32;

        if self.has_sign() { -magnitude } else { magnitude }
    }

    fn set_sign(&mut self, sign: u8) {
        self.0 |= (sign as u32) << 31;
    }

    fn has_sign(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    fn push_bit(&mut self, bit: u32) {
        let sign = self.0 & 0x8000_0000;
        self.0 = sign | ((self.0 << 1) | bit);
    }
}

struct DecodeContext {
    /// A bit-packed state field for each coefficient in the code-block.
    states: Vec<CoefficientState>,
    /// The magnitude and sign of each coefficient, successively built as
    /// we advance through the bitplanes.
    coefficients: Vec<Coefficient>,
    width: u32,
    height: u32,
    /// Whether the vertically-causal flag is enabled.
    vertically_causal: bool,
    /// The type of sub-band the current code block belongs to.
    sub_band_type: SubBandType,
    /// The MQ decoder contexts for each context label.
    contexts: [DecoderContext; 19],
}

impl DecodeContext {
    fn new(block: &CodeBlock, sub_band_type: SubBandType) -> Self {
        let (width, height) = (block.rect.width(), block.rect.height());
        let num_coefficients = block.rect.area();

        let mut states = Vec::new();
        states.resize_with(num_coefficients, || {
            let mut state = CoefficientState::default();
            state.set_magnitude_bits(block.num_zbp);
            state
        });

        let mut ctx = Self {
            states,
            coefficients: vec![Coefficient::default(); num_coefficients],
            width,
            height,
            vertically_causal: block.modes.contains(CodeBlockMode::CAUSAL),
            sub_band_type,
            contexts: [DecoderContext::default(); 19],
        };
        ctx.reset_contexts();
        ctx
    }

    fn set_sign(&mut self, pos: &Position, sign: u8) {
        self.coefficients[pos.index(self.width)].set_sign(sign);
    }

    fn mq_context(&mut self, ctx_label: u8) -> &mut DecoderContext {
        &mut self.contexts[ctx_label as usize]
    }

    /// Reset each context to the initial state defined in table D.7.
    fn reset_contexts(&mut self) {
        for context in &mut self.contexts {
            context.mps = 0;
            context.index = 0;
        }

        self.contexts[0].index = 4;
        self.contexts[17].index = 3;
        self.contexts[18].index = 46;
    }

    fn reset_for_next_bitplane(&mut self) {
        for el in &mut self.states {
            el.set_zero_coded(0);
        }
    }

    fn significance_state(&self, position: &Position) -> u8 {
        u8::from(self.states[position.index(self.width)].is_significant())
    }

    fn is_significant(&self, position: &Position) -> bool {
        self.significance_state(position) != 0
    }

    fn set_significant(&mut self, position: &Position) {
        self.states[position.index(self.width)].set_significant();
    }

    fn set_zero_coded(&mut self, position: &Position) {
        self.states[position.index(self.width)].set_zero_coded(1);
    }

    fn set_magnitude_refined(&mut self, position: &Position) {
        self.states[position.index(self.width)].set_magnitude_refined();
    }

    fn is_magnitude_refined(&self, position: &Position) -> bool {
        self.states[position.index(self.width)].is_magnitude_refined()
    }

    fn is_zero_coded(&self, position: &Position) -> bool {
        self.states[position.index(self.width)].is_zero_coded()
    }

    fn push_magnitude_bit(&mut self, position: &Position, bit: u32) {
        let idx = position.index(self.width);
        let count = self.states[idx].num_bitplanes();

        debug_assert!((count as u32) < BITPLANE_BIT_SIZE);

        self.coefficients[idx].push_bit(bit);
        self.states[idx].set_magnitude_bits(count + 1);
    }

    #[inline]
    fn sign_checked(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            // OOB values should just return 0.
            0
        } else {
            u8::from(self.coefficients[x as usize + y as usize * self.width as usize].has_sign())
        }
    }

    #[inline]
    fn significance_state_checked(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            // OOB values should just return 0.
            0
        } else {
            self.significance_state(&Position::new(x as u32, y as u32))
        }
    }

    #[inline]
    fn neighbor_in_next_stripe(&self, pos: &Position, neighbor_y: u32) -> bool {
        neighbor_y < self.height && (neighbor_y >> 2) > (pos.y >> 2)
    }

    #[inline]
    fn horizontal_significance_states(&self, pos: &Position) -> u8 {
        self.significance_state_checked(pos.x as i64 - 1, pos.y as i64)
            + self.significance_state_checked(pos.x as i64 + 1, pos.y as i64)
    }

    #[inline]
    fn vertical_significance_states(&self, pos: &Position) -> u8 {
        let suppress_lower = self.vertically_causal && self.neighbor_in_next_stripe(pos, pos.y + 1);

        self.significance_state_checked(pos.x as i64, pos.y as i64 - 1)
            + if suppress_lower {
                0
            } else {
                self.significance_state_checked(pos.x as i64, pos.y as i64 + 1)
            }
    }

    #[inline(always)]
    fn diagonal_significance_states(&self, pos: &Position) -> u8 {
        let suppress_lower = self.vertically_causal && self.neighbor_in_next_stripe(pos, pos.y + 1);

        self.significance_state_checked(pos.x as i64 - 1, pos.y as i64 - 1)
            + self.significance_state_checked(pos.x as i64 + 1, pos.y as i64 - 1)
            + if suppress_lower {
                0
            } else {
                self.significance_state_checked(pos.x as i64 - 1, pos.y as i64 + 1)
            }
            + if suppress_lower {
                0
            } else {
                self.significance_state_checked(pos.x as i64 + 1, pos.y as i64 + 1)
            }
    }

    #[inline]
    fn neighborhood_significance_states(&self, pos: &Position) -> u8 {
        self.horizontal_significance_states(pos)
            + self.vertical_significance_states(pos)
            + self.diagonal_significance_states(pos)
    }
}

/// Perform the cleanup pass, specified in D.3.4.
fn cleanup_pass(ctx: &mut DecodeContext, decoder: &mut impl BitDecoder) {
    let (width, height) = (ctx.width, ctx.height);
    for_each_position(
        width,
        height,
        #[inline(always)]
        |cur_pos| {
            if !ctx.is_significant(cur_pos) && !ctx.is_zero_coded(cur_pos) {
                let use_rl = cur_pos.y % 4 == 0
                    && (ctx.height - cur_pos.y) >= 4
                    && ctx.neighborhood_significance_states(cur_pos) == 0
                    && ctx
                        .neighborhood_significance_states(&Position::new(cur_pos.x, cur_pos.y + 1))
                        == 0
                    && ctx
                        .neighborhood_significance_states(&Position::new(cur_pos.x, cur_pos.y + 2))
                        == 0
                    && ctx
                        .neighborhood_significance_states(&Position::new(cur_pos.x, cur_pos.y + 3))
                        == 0;

                let bit = if use_rl {
                    // "If the four contiguous coefficients in the column
                    // being scanned are all decoded in the cleanup pass and
                    // the context label for all is 0, then the unique
                    // run-length context is given to the arithmetic decoder
                    // along with the bit stream."
                    let bit = decoder.read_bit(ctx.mq_context(17));

                    if bit == 0 {
                        // "If the symbol 0 is returned, then all four
                        // contiguous coefficients in the column remain
                        // insignificant and are set to zero."
                        ctx.push_magnitude_bit(cur_pos, 0);

                        for _ in 0..3 {
                            cur_pos.y += 1;
                            ctx.push_magnitude_bit(cur_pos, 0);
                        }

                        return;
                    } else {
                        // "Otherwise, if the symbol 1 is returned, then at
                        // least one of the four contiguous coefficients in
                        // the column is significant. The next two bits,
                        // returned with the UNIFORM context, denote which
                        // coefficient from the top of the column down is
                        // the first to be found significant."
                        let mut num_zeroes = decoder.read_bit(ctx.mq_context(18));
                        num_zeroes = (num_zeroes << 1) | decoder.read_bit(ctx.mq_context(18));

                        for _ in 0..num_zeroes {
                            ctx.push_magnitude_bit(cur_pos, 0);
                            cur_pos.y += 1;
                        }

                        1
                    }
                } else {
                    let ctx_label = context_label_zero_coding(cur_pos, ctx);
                    decoder.read_bit(ctx.mq_context(ctx_label))
                };

                ctx.push_magnitude_bit(cur_pos, bit);

                if bit == 1 {
                    decode_sign_bit(cur_pos, ctx, decoder);
                    ctx.set_significant(cur_pos);
                }
            }
        },
    );
}

/// Perform the significance propagation pass (Section D.3.1).
fn significance_propagation_pass(ctx: &mut DecodeContext, decoder: &mut impl BitDecoder) {
    let (width, height) = (ctx.width, ctx.height);
    for_each_position(
        width,
        height,
        #[inline(always)]
        |cur_pos| {
            // "The significance propagation pass only includes bits of
            // coefficients that were insignificant (the significance state
            // has yet to be set) and have a non-zero context."
            if !ctx.is_significant(cur_pos) && ctx.neighborhood_significance_states(cur_pos) != 0 {
                let ctx_label = context_label_zero_coding(cur_pos, ctx);
                let bit = decoder.read_bit(ctx.mq_context(ctx_label));
                ctx.push_magnitude_bit(cur_pos, bit);
                ctx.set_zero_coded(cur_pos);

                // "If the value of this bit is 1 then the significance
                // state is set to 1 and the immediate next bit to be
                // decoded is the sign bit for the coefficient. Otherwise,
                // the significance state remains 0."
                if bit == 1 {
                    decode_sign_bit(cur_pos, ctx, decoder);
                    ctx.set_significant(cur_pos);
                }
            }
        },
    );
}

/// Perform the magnitude refinement pass, specified in Section D.3.3.
fn magnitude_refinement_pass(ctx: &mut DecodeContext, decoder: &mut impl BitDecoder) {
    let (width, height) = (ctx.width, ctx.height);
    for_each_position(
        width,
        height,
        #[inline(always)]
        |cur_pos| {
            if ctx.is_significant(cur_pos) && !ctx.is_zero_coded(cur_pos) {
                let ctx_label = context_label_magnitude_refinement_coding(cur_pos, ctx);
                let bit = decoder.read_bit(ctx.mq_context(ctx_label));
                ctx.push_magnitude_bit(cur_pos, bit);
                ctx.set_magnitude_refined(cur_pos);
            }
        },
    );
}

/// Walk the bit-plane scan order: stripes of four rows, top-down within a
/// column, columns left to right.
fn for_each_position(width: u32, height: u32, mut action: impl FnMut(&mut Position)) {
    // "Each bit-plane of a code-block is scanned in a particular order.
    // Starting at the top left, the first four coefficients of the
    // first column are scanned, followed by the first four coefficients of
    // the second column and so on, until the right side of the code-block
    // is reached. The scan then returns to the left of the code-block and
    // the second set of four coefficients in each column is scanned."
    for base_row in (0..height).step_by(4) {
        for x in 0..width {
            let mut cur_pos = Position::new(x, base_row);
            while cur_pos.y < (base_row + 4).min(height) {
                action(&mut cur_pos);
                cur_pos.y += 1;
            }
        }
    }
}

/// Decode a sign bit (Section D.3.2).
#[inline(always)]
fn decode_sign_bit<T: BitDecoder>(pos: &Position, ctx: &mut DecodeContext, decoder: &mut T) {
    /// Based on Table D.2.
    #[inline(always)]
    fn context_label_sign_coding(pos: &Position, ctx: &DecodeContext) -> (u8, u8) {
        #[inline(always)]
        fn neighbor_contribution(ctx: &DecodeContext, x: i64, y: i64) -> i32 {
            let sigma = ctx.significance_state_checked(x, y);

            let multiplied = if ctx.sign_checked(x, y) == 0 { 1 } else { -1 };

            multiplied * sigma as i32
        }

        let h = (neighbor_contribution(ctx, pos.x as i64 - 1, pos.y as i64)
            + neighbor_contribution(ctx, pos.x as i64 + 1, pos.y as i64))
        .clamp(-1, 1);
        let suppress_lower = ctx.vertically_causal && ctx.neighbor_in_next_stripe(pos, pos.y + 1);
        let v = (neighbor_contribution(ctx, pos.x as i64, pos.y as i64 - 1)
            + if suppress_lower {
                0
            } else {
                neighbor_contribution(ctx, pos.x as i64, pos.y as i64 + 1)
            })
        .clamp(-1, 1);

        match (h, v) {
            (1, 1) => (13, 0),
            (1, 0) => (12, 0),
            (1, -1) => (11, 0),
            (0, 1) => (10, 0),
            (0, 0) => (9, 0),
            (0, -1) => (10, 1),
            (-1, 1) => (11, 1),
            (-1, 0) => (12, 1),
            (-1, -1) => (13, 1),
            _ => unreachable!(),
        }
    }

    let (ctx_label, xor_bit) = context_label_sign_coding(pos, ctx);
    let ad_ctx = ctx.mq_context(ctx_label);
    let sign_bit = if T::IS_BYPASS {
        decoder.read_bit(ad_ctx)
    } else {
        decoder.read_bit(ad_ctx) ^ xor_bit as u32
    };
    ctx.set_sign(pos, sign_bit as u8);
}

/// Return the context label for zero coding (Section D.3.1).
#[inline(always)]
fn context_label_zero_coding(pos: &Position, ctx: &DecodeContext) -> u8 {
    let mut horizontal = ctx.horizontal_significance_states(pos);
    let mut vertical = ctx.vertical_significance_states(pos);
    let diagonal = ctx.diagonal_significance_states(pos);

    match ctx.sub_band_type {
        SubBandType::LowLow | SubBandType::LowHigh | SubBandType::HighLow => {
            if ctx.sub_band_type == SubBandType::HighLow {
                core::mem::swap(&mut horizontal, &mut vertical);
            }

            if horizontal == 2 {
                8
            } else if horizontal == 1 && vertical >= 1 {
                7
            } else if horizontal == 1 && vertical == 0 && diagonal >= 1 {
                6
            } else if horizontal == 1 && vertical == 0 && diagonal == 0 {
                5
            } else if horizontal == 0 && vertical == 2 {
                4
            } else if horizontal == 0 && vertical == 1 {
                3
            } else if horizontal == 0 && vertical == 0 && diagonal >= 2 {
                2
            } else if horizontal == 0 && vertical == 0 && diagonal == 1 {
                1
            } else {
                0
            }
        }
        SubBandType::HighHigh => {
            let hv = horizontal + vertical;

            if diagonal >= 3 {
                8
            } else if hv >= 1 && diagonal == 2 {
                7
            } else if hv == 0 && diagonal == 2 {
                6
            } else if hv >= 2 && diagonal == 1 {
                5
            } else if hv == 1 && diagonal == 1 {
                4
            } else if hv == 0 && diagonal == 1 {
                3
            } else if hv >= 2 && diagonal == 0 {
                2
            } else if hv == 1 && diagonal == 0 {
                1
            } else {
                0
            }
        }
    }
}

/// Return the context label for magnitude refinement coding (Table D.4).
fn context_label_magnitude_refinement_coding(pos: &Position, ctx: &DecodeContext) -> u8 {
    if ctx.is_magnitude_refined(pos) {
        16
    } else {
        let summed = ctx.horizontal_significance_states(pos)
            + ctx.vertical_significance_states(pos)
            + ctx.diagonal_significance_states(pos);

        if summed >= 1 { 15 } else { 14 }
    }
}

#[derive(Default, Copy, Clone, Debug)]
struct Position {
    x: u32,
    y: u32,
}

impl Position {
    fn new(x: u32, y: u32) -> Position {
        Self { x, y }
    }

    fn index(&self, width: u32) -> usize {
        self.x as usize + self.y as usize * width as usize
    }
}

trait BitDecoder {
    const IS_BYPASS: bool;

    fn read_bit(&mut self, context: &mut DecoderContext) -> u32;
}

impl BitDecoder for ArithmeticDecoder<'_> {
    const IS_BYPASS: bool = false;

    fn read_bit(&mut self, context: &mut DecoderContext) -> u32 {
        Self::read_bit(self, context)
    }
}

struct BypassDecoder<'a>(StuffedBits<'a>);

impl<'a> BypassDecoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self(StuffedBits::over(data))
    }
}

impl BitDecoder for BypassDecoder<'_> {
    const IS_BYPASS: bool = true;

    fn read_bit(&mut self, _: &mut DecoderContext) -> u32 {
        self.0.bit().unwrap_or_else(|| {
            lwarn!("exceeded buffer in by-pass decoder");
            1
        })
    }
}

#[cfg(test)]
mod tests {
    use super::decode;
    use crate::block::CodeBlock;
    use crate::codestream::{CodeBlockMode, WaveletTransform};
    use crate::quant::BandParams;
    use crate::rect::Region;
    use crate::tile::SubBandType;
    use smallvec::smallvec;

    fn params(band: SubBandType, m_b: u8) -> BandParams {
        BandParams {
            exponent: m_b as u16 - 1,
            mantissa: 0,
            r_b: 8,
            m_b,
            delta: 1.0,
            band,
            roi_shift: 0,
            transformation: WaveletTransform::Reversible53,
        }
    }

    fn block(
        width: u32,
        height: u32,
        data: &[u8],
        num_passes: u32,
        num_zbp: u8,
    ) -> CodeBlock {
        let mut block = CodeBlock::new(
            Region::new(0, 0, width, height),
            0,
            0,
            1,
            CodeBlockMode::empty(),
        );
        block.compressed = data.to_vec();
        block.pass_lengths = smallvec![data.len() as u32];
        block.num_passes = num_passes;
        block.num_zbp = num_zbp;
        block
    }

    // First packet from the example in Section J.10.4.
    #[test]
    fn bitplane_decoding_column() {
        let data = [0x01, 0x8f, 0x0d, 0xc8, 0x75, 0x5d];
        let mut code_block = block(1, 5, &data, 16, 0);

        decode(&mut code_block, &params(SubBandType::LowLow, 6)).unwrap();

        assert_eq!(code_block.samples, vec![-26, -22, -30, -32, -19]);
    }

    // Second packet from the example in Section J.10.4.
    #[test]
    fn bitplane_decoding_short_column() {
        let data = [0x0F, 0xB1, 0x76];
        let mut code_block = block(1, 4, &data, 7, 0);

        decode(&mut code_block, &params(SubBandType::LowHigh, 3)).unwrap();

        assert_eq!(code_block.samples, vec![1, 5, 1, 0]);
    }

    #[test]
    fn zero_passes_yield_zero_samples() {
        let mut code_block = block(4, 4, &[], 0, 0);

        decode(&mut code_block, &params(SubBandType::HighHigh, 5)).unwrap();

        assert!(code_block.samples.iter().all(|v| *v == 0));
    }

    #[test]
    fn implausible_pass_count_is_rejected() {
        let data = [0x01, 0x8f];
        let mut code_block = block(1, 5, &data, 30, 4);

        assert!(decode(&mut code_block, &params(SubBandType::LowLow, 6)).is_err());
    }
}
