//! Decoding pipeline: parses the codestream, distributes packet bytes to
//! codeblocks, runs the block coders, the inverse wavelet transform and
//! the inverse component transform, and composites the result.

use crate::block::{CodeBlock, coder_for};
use crate::codestream::{self, Codestream, ComponentInfo, Header, WaveletTransform, markers};
use crate::error::{ErrorKind, Position, Result, bail};
use crate::fdwt::Band;
use crate::idwt;
use crate::image::{Component, Image};
use crate::log::{ltrace, lwarn};
use crate::mct;
use crate::packet::{Precinct, parse_packet};
use crate::params::DecoderParams;
use crate::progression::PacketIter;
use crate::quant::{BandParams, FRACBITS};
use crate::tile::{self, ComponentTile, ResolutionTile, Tile};

/// Decode a raw codestream into an image.
pub(crate) fn decode(data: &[u8], params: &DecoderParams) -> Result<Image> {
    let mut reader = Codestream::over(data);

    if reader.marker()? != markers::SOC {
        bail!(ErrorKind::MalformedMarker("expected SOC marker"));
    }

    let header = codestream::read_header(&mut reader, params.strict)?;
    let tiles = tile::parse(&mut reader, &header)?;

    if tiles.is_empty() {
        bail!(ErrorKind::MalformedMarker("the image contains no tiles"));
    }

    let mut image = build_image(&header);

    for tile in &tiles {
        ltrace!(
            "tile {} rect [{},{} {}x{}]",
            tile.idx,
            tile.rect.x0,
            tile.rect.y0,
            tile.rect.width(),
            tile.rect.height(),
        );

        match decode_tile(tile, &header, &mut image) {
            Ok(()) => {}
            Err(error) if !params.strict => {
                // A damaged tile is abandoned; its region of the composite
                // stays untouched.
                lwarn!("abandoning tile {}: {}", tile.idx, error);
            }
            Err(error) => return Err(error.at(Position::Tile(tile.idx))),
        }
    }

    Ok(image)
}

fn build_image(header: &Header) -> Image {
    let size_data = &header.size_data;

    let components = size_data
        .component_sizes
        .iter()
        .map(|csi| {
            let dx = csi.horizontal_resolution as u32;
            let dy = csi.vertical_resolution as u32;

            let width = size_data.reference_grid_width.div_ceil(dx)
                - size_data.image_area_x_offset.div_ceil(dx);
            let height = size_data.reference_grid_height.div_ceil(dy)
                - size_data.image_area_y_offset.div_ceil(dy);

            Component::new(
                width,
                height,
                csi.horizontal_resolution,
                csi.vertical_resolution,
                csi.precision,
                csi.is_signed,
            )
        })
        .collect();

    Image {
        width: size_data.image_width(),
        height: size_data.image_height(),
        x_offset: size_data.image_area_x_offset,
        y_offset: size_data.image_area_y_offset,
        components,
        metadata: Default::default(),
    }
}

/// All per-resolution decode state of one tile-component.
struct ResolutionDecoder {
    precincts: Vec<Precinct>,
}

fn decode_tile(tile: &Tile<'_>, header: &Header, image: &mut Image) -> Result<()> {
    let ccap15 = header
        .capabilities
        .as_ref()
        .map(|c| c.ccap15)
        .unwrap_or(0);

    // Bound the packet tuple space before anything is allocated for it.
    // The progression engine's deduplication grid spans the product of all
    // four dimensions.
    let mut max_resolutions = 0u64;
    let mut max_precincts = 0u64;
    for component_tile in tile.component_tiles() {
        for resolution_tile in component_tile.resolution_tiles() {
            max_resolutions = max_resolutions.max(resolution_tile.resolution as u64 + 1);
            max_precincts = max_precincts.max(resolution_tile.num_precincts() as u64);
        }
    }

    let grid = tile.num_layers as u64
        * max_resolutions
        * tile.component_infos.len() as u64
        * max_precincts;
    if grid > 1 << 26 {
        bail!(ErrorKind::ResourceExhausted("packet grid beyond 2^26 tuples"));
    }

    // Build the precinct and codeblock grids.
    let mut components: Vec<Vec<ResolutionDecoder>> = Vec::new();
    for info in &tile.component_infos {
        let component_tile = ComponentTile::new(tile, info);
        let modes = info.code_block_mode();

        let mut resolutions = Vec::new();
        for resolution in 0..info.num_resolution_levels() {
            let resolution_tile = ResolutionTile::new(component_tile, resolution);
            let precincts = (0..resolution_tile.num_precincts())
                .map(|p| Precinct::build(&resolution_tile, p, tile.num_layers, modes))
                .collect();

            resolutions.push(ResolutionDecoder { precincts });
        }

        components.push(resolutions);
    }

    // Walk the packets of the concatenated tile parts.
    let tile_data: Vec<u8> = tile.tile_parts.concat();
    let mut reader = Codestream::over(&tile_data);

    for data in PacketIter::new(tile) {
        if reader.exhausted() {
            lwarn!(
                "tile {} ran out of packet data; decoding what arrived",
                tile.idx
            );
            break;
        }

        let info = &tile.component_infos[data.component as usize];
        let precinct = &mut components[data.component as usize][data.resolution as usize]
            .precincts[data.precinct as usize];

        parse_packet(
            &mut reader,
            precinct,
            data.layer_num,
            ccap15,
            info.coding_style.flags.may_use_sop_markers(),
            info.coding_style.flags.uses_eph_marker(),
        )?;
    }

    // Entropy-decode every codeblock and reassemble the sub-band planes.
    let mut planes: Vec<Band> = Vec::with_capacity(tile.component_infos.len());
    for (component_idx, info) in tile.component_infos.iter().enumerate() {
        let component_tile = ComponentTile::new(tile, info);
        let transformation = info.wavelet_transform();

        let mut ll: Option<Band> = None;

        for resolution in 0..info.num_resolution_levels() {
            let resolution_tile = ResolutionTile::new(component_tile, resolution);
            let decoder = &mut components[component_idx][resolution as usize];

            let mut bands: Vec<Band> = resolution_tile
                .sub_band_types()
                .iter()
                .map(|band| Band::zeroed(resolution_tile.sub_band_rect(*band)))
                .collect();

            for precinct in &mut decoder.precincts {
                for (pband, band) in precinct.bands.iter_mut().zip(bands.iter_mut()) {
                    let band_params = BandParams::new(info, pband.band, resolution);

                    for block in &mut pband.blocks {
                        coder_for(block.modes).decode(block, &band_params)?;
                        scatter_block_samples(block, band);
                    }
                }
            }

            if resolution == 0 {
                ll = Some(bands.remove(0));
            } else {
                let previous = ll.take().ok_or(ErrorKind::Truncated("missing LL band"))?;
                let [hl, lh, hh] = &bands[..] else {
                    bail!(ErrorKind::Truncated("missing detail bands"));
                };

                ll = Some(idwt::inverse_level(
                    &previous,
                    [hl, lh, hh],
                    resolution_tile.rect,
                    transformation,
                ));
            }
        }

        let plane = ll.ok_or(ErrorKind::Truncated("component without resolutions"))?;
        debug_assert_eq!(plane.rect, component_tile.rect);
        components[component_idx].clear();
        planes.push(plane);
    }

    // All planes decoded; the component transform needs them together.
    finish_tile(tile, &mut planes, image)
}

fn scatter_block_samples(block: &CodeBlock, band: &mut Band) {
    let rect = block.rect;
    let mut samples = block.samples.iter();

    for y in rect.y0..rect.y1 {
        for x in rect.x0..rect.x1 {
            if let Some(sample) = samples.next() {
                band.set(x, y, *sample);
            }
        }
    }
}

/// Undo the fixed-point scaling of the irreversible path, the component
/// transform, and the DC level shift, then composite into the image.
fn finish_tile(
    tile: &Tile<'_>,
    planes: &mut [Band],
    image: &mut Image,
) -> Result<()> {
    // The irreversible path carries FRACBITS fixed-point samples.
    for (plane, info) in planes.iter_mut().zip(tile.component_infos.iter()) {
        if info.wavelet_transform() == WaveletTransform::Irreversible97 {
            let precision = info.size_info.precision as u32;
            for sample in plane.data.iter_mut() {
                *sample =
                    ((((*sample as i64) << precision) + (1 << (FRACBITS - 1))) >> FRACBITS) as i32;
            }
        }
    }

    if tile.mct {
        if planes.len() < 3 {
            bail!(ErrorKind::ColorInvariant(
                "MCT flagged on an image with fewer than three components"
            ));
        }

        let transformation = tile.component_infos[0].wavelet_transform();
        if tile.component_infos[..3]
            .iter()
            .any(|i| i.wavelet_transform() != transformation)
        {
            bail!(ErrorKind::ColorInvariant(
                "MCT across components with different wavelet transforms"
            ));
        }

        let (first, _) = planes.split_at_mut(3);
        let [s0, s1, s2] = first else { unreachable!() };

        match transformation {
            WaveletTransform::Reversible53 => {
                mct::inverse_reversible(&mut s0.data, &mut s1.data, &mut s2.data)?;
            }
            WaveletTransform::Irreversible97 => {
                mct::inverse_irreversible(&mut s0.data, &mut s1.data, &mut s2.data)?;
            }
        }
    }

    let (x_offset, y_offset) = (image.x_offset, image.y_offset);
    for ((plane, info), component) in planes
        .iter_mut()
        .zip(tile.component_infos.iter())
        .zip(image.components.iter_mut())
    {
        undo_dc_shift(plane, info);

        // Composite into the image plane, relative to the component's
        // image-area origin.
        let plane_x0 = x_offset.div_ceil(component.dx as u32);
        let plane_y0 = y_offset.div_ceil(component.dy as u32);

        let rect = crate::rect::Region::new(
            plane.rect.x0 - plane_x0,
            plane.rect.y0 - plane_y0,
            plane.rect.x1 - plane_x0,
            plane.rect.y1 - plane_y0,
        );

        component.composite(rect, &plane.data);
    }

    Ok(())
}

fn undo_dc_shift(plane: &mut Band, info: &ComponentInfo) {
    let precision = info.size_info.precision as u32;

    let (low, high, offset) = if info.size_info.is_signed {
        (
            -(1i64 << (precision - 1)) as i32,
            ((1i64 << (precision - 1)) - 1) as i32,
            0,
        )
    } else {
        (0, ((1i64 << precision) - 1) as i32, 1i32 << (precision - 1))
    };

    for sample in plane.data.iter_mut() {
        *sample = (*sample + offset).clamp(low, high);
    }
}
