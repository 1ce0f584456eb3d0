//! HT SigProp and MagRef refinement decoding.
//!
//! Both passes scan the codeblock in stripes of four rows. SigProp visits
//! insignificant samples with a significant neighbourhood, consuming one
//! magnitude bit (and later a sign bit) from a forward reader; MagRef
//! refines already-significant samples from a reverse reader over the same
//! refinement segment.

use crate::block::CodeBlock;
use crate::ht::BlockStates;
use crate::ht::streams::{MagRefReader, SigPropReader};

/// The "may become significant" test: any significant or newly-refined
/// neighbour makes the sample eligible.
fn neighbourhood(states: &BlockStates, x: i64, y: i64, causal_cond: u8) -> u8 {
    let mut mbr = 0;

    mbr |= states.sigma(x - 1, y - 1);
    mbr |= states.sigma(x, y - 1);
    mbr |= states.sigma(x + 1, y - 1);
    mbr |= states.sigma(x - 1, y);
    mbr |= states.sigma(x + 1, y);
    mbr |= states.sigma(x - 1, y + 1) * causal_cond;
    mbr |= states.sigma(x, y + 1) * causal_cond;
    mbr |= states.sigma(x + 1, y + 1) * causal_cond;

    mbr |= states.refinement_value(x - 1, y - 1) * states.scan(x - 1, y - 1);
    mbr |= states.refinement_value(x, y - 1) * states.scan(x, y - 1);
    mbr |= states.refinement_value(x + 1, y - 1) * states.scan(x + 1, y - 1);
    mbr |= states.refinement_value(x - 1, y) * states.scan(x - 1, y);
    mbr |= states.refinement_value(x + 1, y) * states.scan(x + 1, y);
    mbr |= states.refinement_value(x - 1, y + 1) * states.scan(x - 1, y + 1) * causal_cond;
    mbr |= states.refinement_value(x, y + 1) * states.scan(x, y + 1) * causal_cond;
    mbr |= states.refinement_value(x + 1, y + 1) * states.scan(x + 1, y + 1) * causal_cond;

    mbr
}

fn sigprop_block(
    reader: &mut SigPropReader<'_>,
    block: &mut CodeBlock,
    states: &mut BlockStates,
    x_start: u32,
    y_start: u32,
    width: u32,
    height: u32,
    p_lsb: u32,
    causal: bool,
) {
    let block_width = block.rect.width();

    for x in x_start..x_start + width {
        for y in y_start..y_start + height {
            let causal_cond = u8::from(!causal || y != y_start + height - 1);

            let mut mbr = 0;
            if states.sigma(x as i64, y as i64) == 0 {
                mbr = neighbourhood(states, x as i64, y as i64, causal_cond);
            }

            if mbr != 0 {
                states.set_refinement_indicator(x, y, 1);
                let bit = reader.read_bit();
                states.set_refinement_value(x, y, bit);
                block.samples[(y * block_width + x) as usize] |= (bit as i32) << p_lsb;
            }
            states.set_scan(x, y, 1);
        }
    }

    // Signs of the samples that just became significant.
    for x in x_start..x_start + width {
        for y in y_start..y_start + height {
            let sample = &mut block.samples[(y * block_width + x) as usize];
            if (*sample & (1 << p_lsb)) != 0 {
                let sign = reader.read_bit() as i32;
                *sample = (*sample & 0x7FFF_FFFF) | (sign << 31);
            }
        }
    }
}

/// Decode a SigProp pass from the refinement segment.
pub(crate) fn sigprop_decode(
    block: &mut CodeBlock,
    dref: &[u8],
    p_lsb: u32,
    states: &mut BlockStates,
    causal: bool,
) {
    let mut reader = SigPropReader::new(dref);

    let width = block.rect.width();
    let height = block.rect.height();

    let mut y_start = 0;
    while y_start < height {
        let stripe_height = u32::min(4, height - y_start);

        let mut x_start = 0;
        while x_start < width {
            let stripe_width = u32::min(4, width - x_start);
            sigprop_block(
                &mut reader,
                block,
                states,
                x_start,
                y_start,
                stripe_width,
                stripe_height,
                p_lsb,
                causal,
            );
            x_start += 4;
        }

        y_start += 4;
    }
}

/// Decode a MagRef pass from the refinement segment.
pub(crate) fn magref_decode(
    block: &mut CodeBlock,
    dref: &[u8],
    p_lsb: u32,
    states: &mut BlockStates,
) {
    let mut reader = MagRefReader::new(dref);

    let width = block.rect.width();
    let height = block.rect.height();

    let mut y_start = 0;
    while y_start < height {
        let stripe_height = u32::min(4, height - y_start);

        for x in 0..width {
            for y in y_start..y_start + stripe_height {
                if states.sigma(x as i64, y as i64) != 0 {
                    states.set_refinement_indicator(x, y, 1);
                    let bit = reader.read_bit() as i32;
                    block.samples[(y * width + x) as usize] |= bit << p_lsb;
                }
            }
        }

        y_start += 4;
    }
}
