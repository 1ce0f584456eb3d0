//! The packet layer: one packet per (layer, resolution, component,
//! precinct) tuple, consisting of a bit-packed header followed by the
//! codeblock segment bytes it announces.

use crate::bit_reader::StuffedBits;
use crate::bit_writer::BitWriter;
use crate::block::CodeBlock;
use crate::codestream::{CodeBlockMode, Codestream, markers, write};
use crate::error::{ErrorKind, Result, bail};
use crate::log::ltrace;
use crate::rect::Region;
use crate::tag_tree::TagTree;
use crate::tile::{ResolutionTile, SubBandType};

/// The codeblocks of one sub-band restricted to one precinct, together
/// with the two tag trees that code their inclusion and zero-bitplane
/// information.
#[derive(Debug, Clone)]
pub(crate) struct PrecinctBand {
    pub(crate) band: SubBandType,
    pub(crate) rect: Region,
    pub(crate) num_blocks_x: u32,
    pub(crate) num_blocks_y: u32,
    pub(crate) blocks: Vec<CodeBlock>,
    inclusion_tree: TagTree,
    zbp_tree: TagTree,
}

/// A precinct: one grouping rectangle on a resolution grid, holding one
/// [`PrecinctBand`] per sub-band.
#[derive(Debug, Clone)]
pub(crate) struct Precinct {
    pub(crate) rect: Region,
    pub(crate) bands: Vec<PrecinctBand>,
}

impl Precinct {
    /// Build the precinct with index `p` of a resolution tile, creating
    /// every codeblock it covers.
    pub(crate) fn build(
        resolution_tile: &ResolutionTile<'_>,
        p: u32,
        num_layers: u16,
        modes: CodeBlockMode,
    ) -> Self {
        let rect = resolution_tile.precinct_rect(p);
        let cbw = resolution_tile.code_block_width();
        let cbh = resolution_tile.code_block_height();

        ltrace!(
            "precinct {} rect: [{},{} {}x{}]",
            p,
            rect.x0,
            rect.y0,
            rect.width(),
            rect.height(),
        );

        let mut bands = Vec::new();
        for band in resolution_tile.sub_band_types() {
            let band_rect = resolution_tile.precinct_sub_band_rect(p, *band);

            let (num_blocks_x, num_blocks_y) = if band_rect.is_empty() {
                (0, 0)
            } else {
                (
                    band_rect.x1.div_ceil(cbw) - band_rect.x0 / cbw,
                    band_rect.y1.div_ceil(cbh) - band_rect.y0 / cbh,
                )
            };

            let mut blocks = Vec::with_capacity((num_blocks_x * num_blocks_y) as usize);
            for y_idx in 0..num_blocks_y {
                for x_idx in 0..num_blocks_x {
                    let grid_x = band_rect.x0 / cbw + x_idx;
                    let grid_y = band_rect.y0 / cbh + y_idx;

                    let block_rect = Region::new(
                        u32::max(band_rect.x0, grid_x * cbw),
                        u32::max(band_rect.y0, grid_y * cbh),
                        u32::min(band_rect.x1, (grid_x + 1) * cbw),
                        u32::min(band_rect.y1, (grid_y + 1) * cbh),
                    );

                    ltrace!(
                        "codeblock rect: [{},{} {}x{}]",
                        block_rect.x0,
                        block_rect.y0,
                        block_rect.width(),
                        block_rect.height(),
                    );

                    blocks.push(CodeBlock::new(block_rect, x_idx, y_idx, num_layers, modes));
                }
            }

            bands.push(PrecinctBand {
                band: *band,
                rect: band_rect,
                num_blocks_x,
                num_blocks_y,
                blocks,
                inclusion_tree: TagTree::new(num_blocks_x, num_blocks_y),
                zbp_tree: TagTree::new(num_blocks_x, num_blocks_y),
            });
        }

        Self { rect, bands }
    }

    /// Seed the writer-side tag trees from the codeblock states. Must run
    /// once after entropy coding, before the first layer's packet is
    /// built.
    pub(crate) fn prepare_header_generation(&mut self, num_layers: u16) {
        for band in &mut self.bands {
            for block in &band.blocks {
                let first_layer = if block.num_passes > 0 {
                    block
                        .layer_passes
                        .iter()
                        .position(|p| *p > 0)
                        .unwrap_or(num_layers as usize) as u32
                } else {
                    // Never contributes; the value must stay out of reach
                    // of every layer's threshold.
                    num_layers as u32
                };

                band.inclusion_tree
                    .set_value(block.x_idx, block.y_idx, first_layer);
                band.zbp_tree
                    .set_value(block.x_idx, block.y_idx, block.num_zbp as u32);
            }
            band.inclusion_tree.build();
            band.zbp_tree.build();
        }
    }
}

/// Build one packet for `layer` and append it to `out`.
pub(crate) fn build_packet(
    precinct: &mut Precinct,
    layer: u16,
    use_sop: bool,
    use_eph: bool,
    packet_sequence: u16,
    out: &mut Vec<u8>,
) {
    if use_sop {
        write::sop(out, packet_sequence);
    }

    let any_contribution = precinct.bands.iter().any(|band| {
        band.blocks
            .iter()
            .any(|block| block.layer_passes[layer as usize] > 0)
    });

    let mut writer = BitWriter::new();

    if !any_contribution {
        // B.10.3: a single zero bit denotes the zero-length packet.
        writer.put_bit(0);
    } else {
        writer.put_bit(1);

        for band_idx in 0..precinct.bands.len() {
            build_band_header(precinct, band_idx, layer, &mut writer);
        }
    }

    out.extend_from_slice(&writer.finish());

    if use_eph {
        write::eph(out);
    }

    if any_contribution {
        for band in &precinct.bands {
            for block in &band.blocks {
                let passes = block.layer_passes[layer as usize];
                if passes == 0 {
                    continue;
                }

                let start = block.layer_start[layer as usize] as usize;
                let byte_start: usize = block.pass_lengths[..start]
                    .iter()
                    .map(|l| *l as usize)
                    .sum();
                let byte_len: usize = block.pass_lengths[start..start + passes as usize]
                    .iter()
                    .map(|l| *l as usize)
                    .sum();

                out.extend_from_slice(&block.compressed[byte_start..byte_start + byte_len]);
            }
        }
    }
}

fn build_band_header(precinct: &mut Precinct, band_idx: usize, layer: u16, writer: &mut BitWriter) {
    let band = &mut precinct.bands[band_idx];
    if band.num_blocks_x * band.num_blocks_y == 0 {
        return;
    }

    for block_idx in 0..band.blocks.len() {
        let block = &band.blocks[block_idx];
        let (x_idx, y_idx) = (block.x_idx, block.y_idx);

        let preceding_passes: u32 = block.layer_passes[..layer as usize]
            .iter()
            .map(|p| *p as u32)
            .sum();
        let num_passes = block.layer_passes[layer as usize] as u32;

        if preceding_passes == 0 {
            // First potential contribution: inclusion is coded through the
            // tag tree, bounded by the current layer.
            band.inclusion_tree
                .write(x_idx, y_idx, writer, layer as u32 + 1);

            if num_passes > 0 {
                // First actual contribution: communicate the zero
                // bit-planes and reset the length indicator.
                band.zbp_tree.write(x_idx, y_idx, writer, u32::MAX);

                let block = &mut band.blocks[block_idx];
                block.included = true;
                block.lblock = 3;
            }
        } else {
            writer.put_bit(u32::from(num_passes > 0));
        }

        if num_passes == 0 {
            continue;
        }

        // Number of coding passes (Table B.4).
        debug_assert!(num_passes < 165);
        if num_passes == 1 {
            writer.put_bit(0);
        } else if num_passes == 2 {
            writer.put_bits(0x2, 2);
        } else if num_passes < 6 {
            writer.put_bits(0x3, 2);
            writer.put_bits(num_passes - 3, 2);
        } else if num_passes < 37 {
            writer.put_bits(0xF, 4);
            writer.put_bits(num_passes - 6, 5);
        } else {
            writer.put_bits(0x1FF, 9);
            writer.put_bits(num_passes - 37, 7);
        }

        let block = &mut band.blocks[block_idx];
        let first_pass = block.layer_start[layer as usize] as usize;
        debug_assert!(block.modes.contains(CodeBlockMode::HT));

        // Grow Lblock until every segment length of this layer fits. An HT
        // set contributes the cleanup pass as its own segment, refinement
        // passes as one more.
        let mut remaining = num_passes;
        let mut pass_idx = first_pass;
        while remaining > 0 {
            let segment_passes = if pass_idx == 0 { 1 } else { remaining };

            let mut length_bits = 0u32;
            while (2 << length_bits) <= segment_passes {
                length_bits += 1;
            }
            length_bits += block.lblock;

            let segment_bytes: u32 = block.pass_lengths
                [pass_idx..pass_idx + segment_passes as usize]
                .iter()
                .sum();

            while u64::from(segment_bytes) >= (1u64 << length_bits) {
                writer.put_bit(1);
                length_bits += 1;
                block.lblock += 1;
            }

            remaining -= segment_passes;
            pass_idx += segment_passes as usize;
        }
        writer.put_bit(0);

        // Emit the segment lengths with the settled Lblock.
        let mut remaining = num_passes;
        let mut pass_idx = first_pass;
        while remaining > 0 {
            let segment_passes = if pass_idx == 0 { 1 } else { remaining };

            let mut length_bits = 0u32;
            while (2 << length_bits) <= segment_passes {
                length_bits += 1;
            }
            length_bits += block.lblock;

            let segment_bytes: u32 = block.pass_lengths
                [pass_idx..pass_idx + segment_passes as usize]
                .iter()
                .sum();

            writer.put_bits(segment_bytes, length_bits as u8);

            remaining -= segment_passes;
            pass_idx += segment_passes as usize;
        }
    }
}

/// Parse one packet at the reader's position, updating the precinct's
/// codeblocks and appending their new segment bytes.
pub(crate) fn parse_packet(
    reader: &mut Codestream<'_>,
    precinct: &mut Precinct,
    layer: u16,
    ccap15: u16,
    use_sop: bool,
    use_eph: bool,
) -> Result<()> {
    if use_sop && reader.peek_marker() == Some(markers::SOP) {
        // Marker plus Lsop and the packet counter.
        reader
            .skip(6)
            .ok_or(ErrorKind::Truncated("SOP marker"))?;
    }

    let mut header = StuffedBits::over(reader.rest());

    // B.10.3: "The first bit in the packet header denotes whether the
    // packet has a length of zero (empty packet)."
    let zero_length = header
        .bit()
        .ok_or(ErrorKind::Truncated("packet header"))?
        == 0;

    let mut body_lengths: Vec<u32> = Vec::new();
    if !zero_length {
        for band_idx in 0..precinct.bands.len() {
            parse_band_header(precinct, band_idx, layer, ccap15, &mut header, &mut body_lengths)?;
        }
    }

    let consumed = header
        .finish()
        .ok_or(ErrorKind::MalformedMarker("packet header stuff bit"))?;
    reader
        .skip(consumed)
        .ok_or(ErrorKind::Truncated("packet header"))?;

    if use_eph {
        match reader.marker() {
            Ok(code) if code == markers::EPH => {}
            _ => bail!(ErrorKind::MalformedMarker("missing EPH marker")),
        }
    }

    if !zero_length {
        // Distribute the packet body: the codeblocks' bytes appear in the
        // same precinct order the header walked.
        let mut next = body_lengths.iter();
        for band in &mut precinct.bands {
            for block in &mut band.blocks {
                let length = *next.next().unwrap_or(&0) as usize;
                if length == 0 {
                    continue;
                }

                let bytes = reader
                    .take(length)
                    .ok_or(ErrorKind::Truncated("packet body"))?;
                block.compressed.extend_from_slice(bytes);
            }
        }
    }

    Ok(())
}

fn parse_band_header(
    precinct: &mut Precinct,
    band_idx: usize,
    layer: u16,
    ccap15: u16,
    header: &mut StuffedBits<'_>,
    body_lengths: &mut Vec<u32>,
) -> Result<()> {
    let band = &mut precinct.bands[band_idx];
    if band.num_blocks_x * band.num_blocks_y == 0 {
        return Ok(());
    }

    let truncated = || ErrorKind::Truncated("packet header");

    for block_idx in 0..band.blocks.len() {
        let block = &mut band.blocks[block_idx];

        let is_included = if block.included {
            // "For code-blocks that have been included in a previous
            // packet, a single bit is used to represent the information."
            header.bit().ok_or_else(truncated)? == 1
        } else {
            // An HT codeblock that has not contributed yet may still hold
            // placeholder passes.
            if block.modes.contains(CodeBlockMode::HT) {
                block.modes |= CodeBlockMode::HT_PHLD;
                if ccap15 & 0xC000 != 0 {
                    block.modes |= CodeBlockMode::HT_MIXED;
                }
            }

            band.inclusion_tree
                .read(block.x_idx, block.y_idx, header, layer as u32 + 1)
                .ok_or_else(truncated)?
                <= layer as u32
        };

        if !is_included {
            block.layer_passes[layer as usize] = 0;
            body_lengths.push(0);
            continue;
        }

        let first_time = !block.included;
        if first_time {
            // B.10.5: zero bit-plane information, coded once on first
            // inclusion.
            block.num_zbp = band
                .zbp_tree
                .read(block.x_idx, block.y_idx, header, u32::MAX)
                .ok_or_else(truncated)? as u8;
            block.lblock = 3;
            block.included = true;
        }

        // B.10.6: number of coding passes (Table B.4).
        let mut new_passes = 1u32;
        new_passes += header.bit().ok_or_else(truncated)?;
        if new_passes >= 2 {
            new_passes += header.bit().ok_or_else(truncated)?;
            if new_passes >= 3 {
                new_passes += header.bits(2).ok_or_else(truncated)?;
                if new_passes >= 6 {
                    new_passes += header.bits(5).ok_or_else(truncated)?;
                    if new_passes >= 37 {
                        new_passes += header.bits(7).ok_or_else(truncated)?;
                    }
                }
            }
        }

        if new_passes > 164 || block.num_passes + new_passes > 164 + block.fast_skip_passes {
            bail!(ErrorKind::Truncated("too many coding passes"));
        }

        block.layer_start[layer as usize] = block.num_passes.min(255) as u8;
        block.layer_passes[layer as usize] = new_passes.min(255) as u8;

        // B.10.7.1: signalled growth of the length indicator.
        while header.bit().ok_or_else(truncated)? == 1 {
            block.lblock += 1;
            if block.lblock > 32 {
                bail!(ErrorKind::Truncated("length indicator overflow"));
            }
        }

        let mut number_of_bytes = 0u32;
        let mut bits_to_read;
        let mut segment_bytes: u32;
        let mut segment_passes: u32;
        let mut next_segment_passes = 0u32;
        let mut bypass_term_threshold = 0u32;

        let mut push_segment = |block: &mut CodeBlock, passes: u32, bytes: u32| {
            block.num_passes += passes;
            while (block.pass_lengths.len() as u32) < block.num_passes {
                block.pass_lengths.push(0);
            }
            let last = block.pass_lengths.len() - 1;
            block.pass_lengths[last] = bytes;
        };

        if block.modes.contains(CodeBlockMode::HT_PHLD) {
            let href_passes = (block.num_passes + new_passes - 1) % 3;
            segment_passes = new_passes.saturating_sub(href_passes);
            let mut pass_bound = 2u32;
            bits_to_read = block.lblock;

            if segment_passes < 1 {
                // No possible HT cleanup pass here; may have placeholder
                // passes or an original block bit-stream (in MIXED mode).
                segment_passes = new_passes;
                while pass_bound <= segment_passes {
                    bits_to_read += 1;
                    pass_bound += pass_bound;
                }
                segment_bytes = header
                    .bits(bits_to_read as u8)
                    .ok_or_else(truncated)?;
                if segment_bytes != 0 {
                    if block.modes.contains(CodeBlockMode::HT_MIXED) {
                        block.modes -= CodeBlockMode::HT_PHLD | CodeBlockMode::HT;
                    } else {
                        bail!(ErrorKind::Truncated("invalid HT length information"));
                    }
                }
            } else {
                while pass_bound <= segment_passes {
                    bits_to_read += 1;
                    pass_bound += pass_bound;
                }
                segment_bytes = header
                    .bits(bits_to_read as u8)
                    .ok_or_else(truncated)?;

                if segment_bytes != 0 {
                    // No more placeholder passes.
                    if !block.modes.contains(CodeBlockMode::HT_MIXED) {
                        // Must be the first HT cleanup pass.
                        if segment_bytes < 2 {
                            bail!(ErrorKind::Truncated("invalid HT length information"));
                        }
                        next_segment_passes = 2;
                        block.modes -= CodeBlockMode::HT_PHLD;
                    } else if block.lblock > 3
                        && segment_bytes > 1
                        && (segment_bytes >> (bits_to_read - 1)) == 0
                    {
                        // Must be the first HT cleanup pass, since the
                        // length MSB is 0.
                        next_segment_passes = 2;
                        block.modes -= CodeBlockMode::HT_PHLD;
                    } else {
                        // Must have an original (non-HT) block coding pass.
                        block.modes -= CodeBlockMode::HT_PHLD | CodeBlockMode::HT;
                        segment_passes = new_passes;
                        while pass_bound <= segment_passes {
                            bits_to_read += 1;
                            pass_bound += pass_bound;
                            segment_bytes <<= 1;
                            segment_bytes +=
                                header.bit().ok_or_else(truncated)?;
                        }
                    }
                } else {
                    // Probably parsing placeholder passes, but an extra
                    // length bit may be needed to verify this: prior to the
                    // first HT cleanup pass, the number of length bits
                    // depends on the number of passes, as if it were a
                    // non-HT codeblock.
                    segment_passes = new_passes;
                    if pass_bound <= segment_passes {
                        loop {
                            bits_to_read += 1;
                            pass_bound += pass_bound;
                            segment_bytes <<= 1;
                            segment_bytes +=
                                header.bit().ok_or_else(truncated)?;
                            if pass_bound > segment_passes {
                                break;
                            }
                        }
                        if segment_bytes != 0 {
                            if block.modes.contains(CodeBlockMode::HT_MIXED) {
                                block.modes -= CodeBlockMode::HT_PHLD | CodeBlockMode::HT;
                            } else {
                                bail!(ErrorKind::Truncated("invalid HT length information"));
                            }
                        }
                    }
                }
            }
        } else if block.modes.contains(CodeBlockMode::HT) {
            // The quality layer commences with a non-initial HT coding
            // pass.
            bits_to_read = 0;
            segment_passes = block.num_passes % 3;
            if segment_passes == 0 {
                // The next pass is an HT cleanup pass; the following
                // segment holds refinement passes.
                segment_passes = 1;
                next_segment_passes = 2;
            } else {
                // One new pass means the segment is a lone SigProp or
                // MagRef pass.
                if new_passes > 1 {
                    segment_passes = 3 - segment_passes;
                } else {
                    segment_passes = 1;
                }
                next_segment_passes = 1;
                bits_to_read = segment_passes - 1;
            }
            bits_to_read += block.lblock;
            segment_bytes = header
                .bits(bits_to_read as u8)
                .ok_or_else(truncated)?;
        } else if !block
            .modes
            .intersects(CodeBlockMode::RESTART | CodeBlockMode::BYPASS)
        {
            // Common case for non-HT codeblocks; we have only one segment.
            bits_to_read = block.lblock + new_passes.ilog2();
            segment_bytes = header
                .bits(bits_to_read as u8)
                .ok_or_else(truncated)?;
            segment_passes = new_passes;
        } else if block.modes.contains(CodeBlockMode::RESTART) {
            bits_to_read = block.lblock;
            segment_bytes = header
                .bits(bits_to_read as u8)
                .ok_or_else(truncated)?;
            segment_passes = 1;
            next_segment_passes = 1;
        } else {
            // BYPASS mode: up to ten uninterrupted MQ passes precede the
            // first raw SigProp segment (Table D.9).
            bypass_term_threshold = 10;
            bits_to_read = 0;
            if block.num_passes < bypass_term_threshold {
                segment_passes = u32::min(bypass_term_threshold - block.num_passes, new_passes);
                while (2 << bits_to_read) <= segment_passes {
                    bits_to_read += 1;
                }
                next_segment_passes = 2;
            } else if (block.num_passes - bypass_term_threshold) % 3 < 2 {
                if new_passes > 1 {
                    segment_passes = 2 - (block.num_passes - bypass_term_threshold) % 3;
                } else {
                    segment_passes = 1;
                }
                bits_to_read = segment_passes - 1;
                next_segment_passes = 1;
            } else {
                // An isolated cleanup pass that precedes a raw SigProp
                // pass.
                segment_passes = 1;
                next_segment_passes = 2;
            }
            bits_to_read += block.lblock;
            segment_bytes = header
                .bits(bits_to_read as u8)
                .ok_or_else(truncated)?;
        }

        let mut remaining = new_passes;
        push_segment(block, segment_passes, segment_bytes);
        number_of_bytes += segment_bytes;
        remaining -= u32::min(segment_passes, remaining);

        if block.modes.contains(CodeBlockMode::HT)
            && !block.modes.contains(CodeBlockMode::HT_PHLD)
        {
            // HT continuation: alternate refinement and cleanup segments,
            // tracking empty sets through fast-skip passes.
            let mut empty_set = next_segment_passes == 2 && segment_bytes == 0;
            if !empty_set {
                block.fast_skip_passes = 0;
            }

            while remaining > 0 {
                segment_passes = if remaining > 1 {
                    next_segment_passes
                } else {
                    1
                };
                next_segment_passes = 3 - next_segment_passes;
                bits_to_read = block.lblock + segment_passes - 1;
                segment_bytes = header
                    .bits(bits_to_read as u8)
                    .ok_or_else(truncated)?;

                remaining -= u32::min(segment_passes, remaining);

                if next_segment_passes == 2 {
                    // This is a fast cleanup pass.
                    if segment_bytes != 0 {
                        if segment_bytes < 2 {
                            bail!(ErrorKind::Truncated("invalid HT length information"));
                        }
                        block.fast_skip_passes = 0;
                        empty_set = false;
                    } else {
                        // Starting a new empty set.
                        block.fast_skip_passes += 1;
                        empty_set = true;
                    }
                } else {
                    // This is a fast refinement segment.
                    if empty_set {
                        if segment_bytes != 0 {
                            bail!(ErrorKind::Truncated("invalid HT length information"));
                        }
                        block.fast_skip_passes += segment_passes;
                    }
                }

                push_segment(block, segment_passes, segment_bytes);
                number_of_bytes += segment_bytes;
            }
        } else {
            while remaining > 0 {
                if bypass_term_threshold != 0 {
                    segment_passes = if remaining > 1 {
                        next_segment_passes
                    } else {
                        1
                    };
                    next_segment_passes = 3 - next_segment_passes;
                    bits_to_read = block.lblock + segment_passes - 1;
                } else if block.modes.contains(CodeBlockMode::RESTART) {
                    segment_passes = 1;
                    bits_to_read = block.lblock;
                } else {
                    // The single-segment case consumed everything already.
                    break;
                }

                segment_bytes = header
                    .bits(bits_to_read as u8)
                    .ok_or_else(truncated)?;

                remaining -= u32::min(segment_passes, remaining);
                push_segment(block, segment_passes, segment_bytes);
                number_of_bytes += segment_bytes;
            }
        }

        body_lengths.push(number_of_bytes);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ht;
    use crate::quant::BandParams;
    use crate::codestream::WaveletTransform;
    use crate::block::BlockCoder;

    fn ht_band(num_blocks_x: u32, num_blocks_y: u32, block_size: u32) -> PrecinctBand {
        let mut blocks = Vec::new();
        for y in 0..num_blocks_y {
            for x in 0..num_blocks_x {
                blocks.push(CodeBlock::new(
                    Region::new(
                        x * block_size,
                        y * block_size,
                        (x + 1) * block_size,
                        (y + 1) * block_size,
                    ),
                    x,
                    y,
                    2,
                    CodeBlockMode::HT,
                ));
            }
        }

        PrecinctBand {
            band: SubBandType::LowLow,
            rect: Region::new(0, 0, num_blocks_x * block_size, num_blocks_y * block_size),
            num_blocks_x,
            num_blocks_y,
            blocks,
            inclusion_tree: TagTree::new(num_blocks_x, num_blocks_y),
            zbp_tree: TagTree::new(num_blocks_x, num_blocks_y),
        }
    }

    fn params() -> BandParams {
        BandParams {
            exponent: 9,
            mantissa: 0,
            r_b: 8,
            m_b: 10,
            delta: 1.0,
            band: SubBandType::LowLow,
            roi_shift: 0,
            transformation: WaveletTransform::Reversible53,
        }
    }

    /// Fill a 2x2 grid of HT codeblocks, build the two layers' packets and
    /// parse them back into a fresh precinct.
    #[test]
    fn packet_round_trip() {
        let params = params();

        let mut precinct = Precinct {
            rect: Region::new(0, 0, 16, 16),
            bands: vec![ht_band(2, 2, 8)],
        };

        for (i, block) in precinct.bands[0].blocks.iter_mut().enumerate() {
            block.samples = (0..64)
                .map(|n: i32| if i == 3 { 0 } else { (n * 7 + i as i32 * 13) % 63 - 31 })
                .collect();
            ht::HtCoder.encode(block, &params).unwrap();

            if block.num_passes > 0 {
                block.layer_passes[0] = block.num_passes as u8;
            }
        }
        precinct.prepare_header_generation(2);

        let mut out = Vec::new();
        build_packet(&mut precinct, 0, false, false, 0, &mut out);
        build_packet(&mut precinct, 1, false, false, 1, &mut out);
        assert!(!out.is_empty());

        let mut parsed = Precinct {
            rect: Region::new(0, 0, 16, 16),
            bands: vec![ht_band(2, 2, 8)],
        };

        let mut reader = Codestream::over(&out);
        parse_packet(&mut reader, &mut parsed, 0, 0, false, false).unwrap();
        parse_packet(&mut reader, &mut parsed, 1, 0, false, false).unwrap();
        assert!(reader.exhausted());

        for (original, decoded) in precinct.bands[0]
            .blocks
            .iter()
            .zip(parsed.bands[0].blocks.iter_mut())
        {
            assert_eq!(decoded.num_passes, original.num_passes);
            assert_eq!(decoded.num_zbp, original.num_zbp);
            assert_eq!(decoded.compressed, original.compressed);

            if original.num_passes > 0 {
                ht::HtCoder.decode(decoded, &params).unwrap();
                assert_eq!(decoded.samples, original.samples);
            }
        }
    }

    /// SOP and EPH markers wrap the packet when enabled.
    #[test]
    fn sop_and_eph_markers() {
        let params = params();

        let mut precinct = Precinct {
            rect: Region::new(0, 0, 8, 8),
            bands: vec![ht_band(1, 1, 8)],
        };

        precinct.bands[0].blocks[0].samples = (0..64).map(|n: i32| n % 17 - 8).collect();
        ht::HtCoder
            .encode(&mut precinct.bands[0].blocks[0], &params)
            .unwrap();
        let passes = precinct.bands[0].blocks[0].num_passes;
        precinct.bands[0].blocks[0].layer_passes[0] = passes as u8;
        precinct.prepare_header_generation(2);

        let mut out = Vec::new();
        build_packet(&mut precinct, 0, true, true, 7, &mut out);

        assert_eq!(&out[..2], &[0xFF, markers::SOP]);
        assert_eq!(u16::from_be_bytes([out[2], out[3]]), 4);
        assert_eq!(u16::from_be_bytes([out[4], out[5]]), 7);
        let eph = out
            .windows(2)
            .position(|w| w == [0xFF, markers::EPH])
            .unwrap();
        assert!(eph >= 6);

        let mut parsed = Precinct {
            rect: Region::new(0, 0, 8, 8),
            bands: vec![ht_band(1, 1, 8)],
        };
        let mut reader = Codestream::over(&out);
        parse_packet(&mut reader, &mut parsed, 0, 0, true, true).unwrap();
        assert_eq!(
            parsed.bands[0].blocks[0].compressed,
            precinct.bands[0].blocks[0].compressed
        );
    }

    /// An empty precinct produces the single-zero-bit packet.
    #[test]
    fn zero_length_packet() {
        let mut precinct = Precinct {
            rect: Region::new(0, 0, 8, 8),
            bands: vec![ht_band(1, 1, 8)],
        };
        precinct.prepare_header_generation(2);

        let mut out = Vec::new();
        build_packet(&mut precinct, 0, false, false, 0, &mut out);
        assert_eq!(out, vec![0x00]);

        let mut parsed = Precinct {
            rect: Region::new(0, 0, 8, 8),
            bands: vec![ht_band(1, 1, 8)],
        };
        let mut reader = Codestream::over(&out);
        parse_packet(&mut reader, &mut parsed, 0, 0, false, false).unwrap();
        assert_eq!(parsed.bands[0].blocks[0].num_passes, 0);
    }
}
