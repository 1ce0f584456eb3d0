//! Encoding pipeline: image planes through MCT, wavelet transform,
//! quantization and HT block coding into an ordered packet stream.

use crate::block::{BlockCoder, CodeBlock};
use crate::codestream::{
    Capabilities, CodingStyleComponent, CodingStyleDefault, CodingStyleFlags,
    CodingStyleParameters, ComponentInfo, ComponentSizeInfo, Header, PocRecord, SizeData, write,
};
use crate::error::{ErrorKind, Position, Result, bail};
use crate::fdwt::{self, Band};
use crate::ht::HtCoder;
use crate::image::Image;
use crate::log::ltrace;
use crate::mct;
use crate::packet::{Precinct, build_packet};
use crate::params::{EncoderParams, Transformation};
use crate::progression::build_packet_sequence;
use crate::quant::{self, BandParams, FRACBITS};
use crate::rect::Region;
use crate::tile::{ComponentTile, ResolutionTile, Tile};

/// Encode an image into a raw codestream.
pub(crate) fn encode(image: &Image, params: &EncoderParams) -> Result<Vec<u8>> {
    image.validate()?;
    params.validate(image)?;

    let first = &image.components[0];
    if image
        .components
        .iter()
        .any(|c| c.precision != first.precision || c.signed != first.signed)
    {
        bail!(ErrorKind::UnsupportedFeature(
            "per-component quantization signalling"
        ));
    }
    if first.precision > 27 {
        // The magnitude range must stay within the 30-bit-plane bound of
        // the block coder.
        bail!(ErrorKind::UnsupportedFeature("encoding above 27 bits"));
    }

    let header = build_header(image, params);
    for info in &header.component_infos {
        let guard = info.quantization_info.guard_bits as u16;
        let worst = first.precision as u16 + 2 + guard - 1 + info.roi_shift as u16;
        if worst > 30 {
            bail!(ErrorKind::InvalidParameter(
                "ROI shift pushes the magnitude range past 30 bit-planes"
            ));
        }
    }

    let mut out = Vec::new();
    write::soc(&mut out);
    write::siz(&mut out, &header.size_data);
    if let Some(capabilities) = &header.capabilities {
        write::cap(&mut out, capabilities);
    }
    write::cod(&mut out, &header.global_coding_style);
    write::qcd(&mut out, &header.component_infos[0].quantization_info);
    if !header.poc_records.is_empty() {
        write::poc(
            &mut out,
            &header.poc_records,
            header.component_infos.len() as u16,
        );
    }
    for (idx, info) in header.component_infos.iter().enumerate() {
        if info.roi_shift > 0 {
            write::rgn(
                &mut out,
                idx as u16,
                header.component_infos.len() as u16,
                info.roi_shift,
            );
        }
    }
    write::com(&mut out, concat!("tessella ", env!("CARGO_PKG_VERSION")));

    for idx in 0..header.size_data.num_tiles() {
        let tile = Tile::new(idx, &header);
        let body = encode_tile(&tile, image, params)
            .map_err(|e| e.at(Position::Tile(idx)))?;

        // The tile-part length covers the SOT marker segment, the SOD
        // marker and the packet data.
        write::sot(&mut out, idx as u16, body.len() as u32 + 14, 0, 1);
        write::sod(&mut out);
        out.extend_from_slice(&body);
    }

    write::eoc(&mut out);

    Ok(out)
}

fn build_header(image: &Image, params: &EncoderParams) -> Header {
    let (origin_x, origin_y) = params.image_origin;
    let (tile_origin_x, tile_origin_y) = params.tile_origin;

    let reference_grid_width = origin_x + image.width;
    let reference_grid_height = origin_y + image.height;
    let (tile_width, tile_height) = params.tile_size.unwrap_or((
        reference_grid_width - tile_origin_x,
        reference_grid_height - tile_origin_y,
    ));

    let component_sizes: Vec<ComponentSizeInfo> = image
        .components
        .iter()
        .map(|c| ComponentSizeInfo {
            precision: c.precision,
            is_signed: c.signed,
            horizontal_resolution: c.dx,
            vertical_resolution: c.dy,
        })
        .collect();

    let size_data = SizeData {
        reference_grid_width,
        reference_grid_height,
        image_area_x_offset: origin_x,
        image_area_y_offset: origin_y,
        tile_width,
        tile_height,
        tile_x_offset: tile_origin_x,
        tile_y_offset: tile_origin_y,
        component_sizes,
    };

    let transformation = params.transformation.wavelet();
    let has_precincts = !params.precinct_sizes.is_empty();
    let quantization_info = quant::default_quantization(
        transformation,
        image.components[0].precision,
        params.num_decompositions,
        params.guard_bits,
    );

    let component_parameters = CodingStyleComponent {
        flags: CodingStyleFlags::new(has_precincts, params.use_sop, params.use_eph),
        parameters: CodingStyleParameters {
            num_decomposition_levels: params.num_decompositions,
            num_resolution_levels: params.num_decompositions + 1,
            code_block_width: params.code_block_width.ilog2() as u8,
            code_block_height: params.code_block_height.ilog2() as u8,
            code_block_style: params.code_block_style.bits(),
            transformation,
            precinct_exponents: params.precinct_exponents(),
        },
    };

    let component_infos: Vec<ComponentInfo> = image
        .components
        .iter()
        .enumerate()
        .map(|(idx, c)| ComponentInfo {
            size_info: ComponentSizeInfo {
                precision: c.precision,
                is_signed: c.signed,
                horizontal_resolution: c.dx,
                vertical_resolution: c.dy,
            },
            coding_style: component_parameters.clone(),
            quantization_info: quantization_info.clone(),
            roi_shift: params.roi_shifts.get(idx).copied().unwrap_or(0),
            ht: true,
        })
        .collect();

    Header {
        size_data,
        global_coding_style: CodingStyleDefault {
            progression_order: params.progression.order(),
            num_layers: params.num_layers,
            mct: params.mct,
            component_parameters,
        },
        component_infos,
        capabilities: Some(Capabilities {
            pcap: 1 << (32 - 15),
            ccap15: 0,
        }),
        poc_records: params
            .progression_changes
            .iter()
            .map(|change| PocRecord {
                resolution_start: change.resolution_start,
                component_start: change.component_start,
                layer_end: change.layer_end,
                resolution_end: change.resolution_end,
                component_end: change.component_end,
                order: change.progression.order(),
            })
            .collect(),
        strict: true,
    }
}

/// The coded state of one resolution of one tile-component.
struct ResolutionCoder {
    bands: Vec<(crate::tile::SubBandType, Band)>,
    precincts: Vec<Precinct>,
}

fn encode_tile(tile: &Tile<'_>, image: &Image, params: &EncoderParams) -> Result<Vec<u8>> {
    // Pull the tile-component planes out of the image, with the DC level
    // shift applied.
    let mut planes: Vec<Band> = Vec::with_capacity(tile.component_infos.len());
    for (idx, info) in tile.component_infos.iter().enumerate() {
        let component_tile = ComponentTile::new(tile, info);
        planes.push(extract_plane(image, idx, component_tile.rect));
    }

    // The multi-component transform runs on the unscaled integers.
    if tile.mct && planes.len() >= 3 {
        let (first, _) = planes.split_at_mut(3);
        let [s0, s1, s2] = first else { unreachable!() };

        match params.transformation {
            Transformation::Reversible53 => {
                mct::forward_reversible(&mut s0.data, &mut s1.data, &mut s2.data)?;
            }
            Transformation::Irreversible97 => {
                mct::forward_irreversible(&mut s0.data, &mut s1.data, &mut s2.data)?;
            }
        }
    }

    // The irreversible path works in nominal-range fixed point.
    if params.transformation == Transformation::Irreversible97 {
        for (plane, info) in planes.iter_mut().zip(tile.component_infos.iter()) {
            let precision = info.size_info.precision as u32;
            for sample in plane.data.iter_mut() {
                *sample = (((*sample as i64) << FRACBITS) >> precision) as i32;
            }
        }
    }

    // Wavelet transform, quantization and block coding, component by
    // component.
    let transformation = params.transformation.wavelet();
    let mut components: Vec<Vec<ResolutionCoder>> = Vec::with_capacity(planes.len());

    for (plane, info) in planes.into_iter().zip(tile.component_infos.iter()) {
        let levels = info.coding_style.parameters.num_decomposition_levels;

        let mut resolutions: Vec<ResolutionCoder> = (0..=levels)
            .map(|_| ResolutionCoder {
                bands: Vec::new(),
                precincts: Vec::new(),
            })
            .collect();

        let mut ll = plane;
        for level in 1..=levels {
            let [next_ll, hl, lh, hh] = fdwt::forward_level(&ll, transformation);

            resolutions[(levels - level + 1) as usize].bands = vec![
                (crate::tile::SubBandType::HighLow, hl),
                (crate::tile::SubBandType::LowHigh, lh),
                (crate::tile::SubBandType::HighHigh, hh),
            ];
            ll = next_ll;
        }
        resolutions[0].bands = vec![(crate::tile::SubBandType::LowLow, ll)];

        components.push(resolutions);
    }

    for (component_idx, info) in tile.component_infos.iter().enumerate() {
        let component_tile = ComponentTile::new(tile, info);
        let resolutions = &mut components[component_idx];

        for resolution in 0..info.num_resolution_levels() {
            let resolution_tile = ResolutionTile::new(component_tile, resolution);
            code_resolution(
                &resolution_tile,
                &mut resolutions[resolution as usize],
                info,
                tile.num_layers,
            )?;
        }
    }

    // Assemble the packets in progression order.
    let sequence = build_packet_sequence(tile);
    let use_sop = tile
        .component_infos
        .first()
        .is_some_and(|i| i.coding_style.flags.may_use_sop_markers());
    let use_eph = tile
        .component_infos
        .first()
        .is_some_and(|i| i.coding_style.flags.uses_eph_marker());

    let mut body = Vec::new();
    for (counter, data) in sequence.iter().enumerate() {
        let precinct = &mut components[data.component as usize][data.resolution as usize]
            .precincts[data.precinct as usize];

        build_packet(
            precinct,
            data.layer_num,
            use_sop,
            use_eph,
            counter as u16,
            &mut body,
        );
    }

    ltrace!("tile {} packet data: {} bytes", tile.idx, body.len());

    Ok(body)
}

/// Quantize one resolution's bands, carve them into codeblocks and run
/// the block coder over each.
fn code_resolution(
    resolution_tile: &ResolutionTile<'_>,
    coder: &mut ResolutionCoder,
    info: &ComponentInfo,
    num_layers: u16,
) -> Result<()> {
    for (band_type, band) in coder.bands.iter_mut() {
        let band_params = BandParams::new(info, *band_type, resolution_tile.resolution);
        quant::quantize(&mut band.data, &band_params);

        if band_params.roi_shift > 0 {
            for sample in band.data.iter_mut() {
                *sample <<= band_params.roi_shift;
            }
        }
    }

    let modes = info.code_block_mode();
    if resolution_tile.code_block_width() > HtCoder.max_block_width()
        || resolution_tile.code_block_height() > HtCoder.max_block_height()
    {
        bail!(ErrorKind::InvalidParameter(
            "codeblock larger than the block coder supports"
        ));
    }

    for p in 0..resolution_tile.num_precincts() {
        let mut precinct = Precinct::build(resolution_tile, p, num_layers, modes);

        for pband in &mut precinct.bands {
            let Some((_, band)) = coder.bands.iter().find(|(t, _)| *t == pband.band) else {
                continue;
            };
            let band_params = BandParams::new(info, pband.band, resolution_tile.resolution);

            for block in &mut pband.blocks {
                copy_block_samples(block, band);
                HtCoder.encode(block, &band_params)?;

                // No rate allocation: the whole pass set rides in the
                // first layer; later layers signal empty contributions.
                if block.num_passes > 0 {
                    block.layer_passes[0] = block.num_passes as u8;
                }
            }
        }

        precinct.prepare_header_generation(num_layers);
        coder.precincts.push(precinct);
    }

    Ok(())
}

fn copy_block_samples(block: &mut CodeBlock, band: &Band) {
    let rect = block.rect;
    block.samples.clear();
    block.samples.reserve(rect.area());

    for y in rect.y0..rect.y1 {
        for x in rect.x0..rect.x1 {
            block.samples.push(band.at(x, y));
        }
    }
}

/// Read one tile-component rectangle out of an image plane, applying the
/// DC level shift for unsigned components.
fn extract_plane(image: &Image, component_idx: usize, rect: Region) -> Band {
    let component = &image.components[component_idx];

    // The component plane starts at the component-resolution image origin.
    let plane_x0 = image.x_offset.div_ceil(component.dx as u32);
    let plane_y0 = image.y_offset.div_ceil(component.dy as u32);

    let dc_offset = if component.signed {
        0
    } else {
        1i32 << (component.precision - 1)
    };

    let mut band = Band::zeroed(rect);
    for y in rect.y0..rect.y1 {
        let source = component.row(y - plane_y0);
        for x in rect.x0..rect.x1 {
            let value = source[(x - plane_x0) as usize] - dc_offset;
            band.set(x, y, value);
        }
    }

    band
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_signals_ht_and_geometry() {
        let image = Image::new(100, 80, 3, 8, false);
        let mut params = EncoderParams::default();
        params.tile_size = Some((64, 64));
        params.num_decompositions = 3;

        let header = build_header(&image, &params);

        assert!(header.capabilities.unwrap().uses_ht());
        assert_eq!(header.size_data.num_x_tiles(), 2);
        assert_eq!(header.size_data.num_y_tiles(), 2);
        assert_eq!(
            header.component_infos[0]
                .coding_style
                .parameters
                .num_resolution_levels,
            4
        );
    }

    #[test]
    fn unequal_precisions_are_rejected() {
        let mut image = Image::new(16, 16, 2, 8, false);
        image.components[1].precision = 10;

        let result = encode(&image, &EncoderParams::default());
        assert!(result.is_err());
    }
}
