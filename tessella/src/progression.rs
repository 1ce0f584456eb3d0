//! Progression iteration, defined in Section B.12.
//!
//! The engine yields (layer, resolution, component, precinct) tuples in
//! the order the packets appear in the codestream. Progression-order
//! changes concatenate several sub-range walks; a packet is produced at
//! most once, enforced by a four-dimensional already-emitted grid.

use crate::codestream::{PocRecord, ProgressionOrder};
use crate::tile::{ResolutionTile, Tile};

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ProgressionData {
    pub(crate) layer_num: u16,
    pub(crate) resolution: u16,
    pub(crate) component: u16,
    pub(crate) precinct: u32,
}

/// The packet order of one tile, as a lazy iterator. The sequence is
/// precomputed at construction; stepping is allocation-free.
pub(crate) struct PacketIter {
    sequence: std::vec::IntoIter<ProgressionData>,
}

impl Iterator for PacketIter {
    type Item = ProgressionData;

    fn next(&mut self) -> Option<Self::Item> {
        self.sequence.next()
    }
}

impl PacketIter {
    pub(crate) fn new(tile: &Tile<'_>) -> Self {
        Self {
            sequence: build_packet_sequence(tile).into_iter(),
        }
    }
}

/// Build the complete packet sequence of a tile, honouring its POC
/// records. The tile's own progression order acts as a final catch-all
/// record, so every packet appears exactly once.
pub(crate) fn build_packet_sequence(tile: &Tile<'_>) -> Vec<ProgressionData> {
    let num_components = tile.component_infos.len() as u16;
    let max_resolutions = tile
        .component_infos
        .iter()
        .map(|c| c.num_resolution_levels())
        .max()
        .unwrap_or(0);

    let max_precincts = tile
        .component_tiles()
        .flat_map(|component_tile| {
            component_tile
                .resolution_tiles()
                .map(|r| r.num_precincts())
                .collect::<Vec<_>>()
        })
        .max()
        .unwrap_or(0);

    let mut records: Vec<PocRecord> = tile.poc_records.clone();
    records.push(PocRecord {
        resolution_start: 0,
        component_start: 0,
        layer_end: tile.num_layers,
        resolution_end: max_resolutions as u8,
        component_end: num_components,
        order: tile.progression_order,
    });

    let mut emitted = EmittedGrid::new(
        tile.num_layers,
        max_resolutions,
        num_components,
        max_precincts,
    );

    let mut sequence = Vec::new();
    for record in &records {
        walk_record(tile, record, &mut emitted, &mut sequence);
    }

    sequence
}

/// The "packet already emitted" bit grid over all four dimensions.
struct EmittedGrid {
    bits: Vec<bool>,
    resolutions: usize,
    components: usize,
    precincts: usize,
}

impl EmittedGrid {
    fn new(layers: u16, resolutions: u16, components: u16, precincts: u32) -> Self {
        Self {
            bits: vec![
                false;
                layers as usize
                    * resolutions as usize
                    * components as usize
                    * precincts as usize
            ],
            resolutions: resolutions as usize,
            components: components as usize,
            precincts: precincts as usize,
        }
    }

    /// Mark the tuple; returns whether it was new.
    fn insert(&mut self, data: &ProgressionData) -> bool {
        let idx = ((data.layer_num as usize * self.resolutions + data.resolution as usize)
            * self.components
            + data.component as usize)
            * self.precincts
            + data.precinct as usize;

        let new = !self.bits[idx];
        self.bits[idx] = true;
        new
    }
}

struct RecordBounds {
    layers: core::ops::Range<u16>,
    resolutions: core::ops::Range<u16>,
    components: core::ops::Range<u16>,
}

fn bounds(tile: &Tile<'_>, record: &PocRecord, max_resolutions: u16) -> RecordBounds {
    RecordBounds {
        layers: 0..u16::min(record.layer_end, tile.num_layers),
        resolutions: record.resolution_start as u16
            ..u16::min(record.resolution_end as u16, max_resolutions),
        components: record.component_start
            ..u16::min(record.component_end, tile.component_infos.len() as u16),
    }
}

fn walk_record(
    tile: &Tile<'_>,
    record: &PocRecord,
    emitted: &mut EmittedGrid,
    sequence: &mut Vec<ProgressionData>,
) {
    let max_resolutions = tile
        .component_infos
        .iter()
        .map(|c| c.num_resolution_levels())
        .max()
        .unwrap_or(0);
    let bounds = bounds(tile, record, max_resolutions);

    let mut push = |data: ProgressionData, emitted: &mut EmittedGrid| {
        if emitted.insert(&data) {
            sequence.push(data);
        }
    };

    match record.order {
        ProgressionOrder::LayerResolutionComponentPosition => {
            for layer in bounds.layers.clone() {
                for resolution in bounds.resolutions.clone() {
                    for_components_at(tile, &bounds, resolution, |component, resolution_tile| {
                        for precinct in 0..resolution_tile.num_precincts() {
                            push(
                                ProgressionData {
                                    layer_num: layer,
                                    resolution,
                                    component,
                                    precinct,
                                },
                                emitted,
                            );
                        }
                    });
                }
            }
        }
        ProgressionOrder::ResolutionLayerComponentPosition => {
            for resolution in bounds.resolutions.clone() {
                for layer in bounds.layers.clone() {
                    for_components_at(tile, &bounds, resolution, |component, resolution_tile| {
                        for precinct in 0..resolution_tile.num_precincts() {
                            push(
                                ProgressionData {
                                    layer_num: layer,
                                    resolution,
                                    component,
                                    precinct,
                                },
                                emitted,
                            );
                        }
                    });
                }
            }
        }
        ProgressionOrder::ResolutionPositionComponentLayer => {
            let tile_rect = tile.rect;
            for resolution in bounds.resolutions.clone() {
                for y in tile_rect.y0..tile_rect.y1 {
                    for x in tile_rect.x0..tile_rect.x1 {
                        for_components_at(
                            tile,
                            &bounds,
                            resolution,
                            |component, resolution_tile| {
                                if let Some(precinct) =
                                    find_precinct_index(resolution_tile, x, y)
                                {
                                    for layer in bounds.layers.clone() {
                                        push(
                                            ProgressionData {
                                                layer_num: layer,
                                                resolution,
                                                component,
                                                precinct,
                                            },
                                            emitted,
                                        );
                                    }
                                }
                            },
                        );
                    }
                }
            }
        }
        ProgressionOrder::PositionComponentResolutionLayer => {
            let tile_rect = tile.rect;
            for y in tile_rect.y0..tile_rect.y1 {
                for x in tile_rect.x0..tile_rect.x1 {
                    for (component, component_tile) in tile.component_tiles().enumerate() {
                        let component = component as u16;
                        if !bounds.components.contains(&component) {
                            continue;
                        }

                        for resolution_tile in component_tile.resolution_tiles() {
                            if !bounds.resolutions.contains(&resolution_tile.resolution) {
                                continue;
                            }

                            if let Some(precinct) = find_precinct_index(&resolution_tile, x, y) {
                                for layer in bounds.layers.clone() {
                                    push(
                                        ProgressionData {
                                            layer_num: layer,
                                            resolution: resolution_tile.resolution,
                                            component,
                                            precinct,
                                        },
                                        emitted,
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
        ProgressionOrder::ComponentPositionResolutionLayer => {
            let tile_rect = tile.rect;
            for (component, component_tile) in tile.component_tiles().enumerate() {
                let component = component as u16;
                if !bounds.components.contains(&component) {
                    continue;
                }

                for y in tile_rect.y0..tile_rect.y1 {
                    for x in tile_rect.x0..tile_rect.x1 {
                        for resolution_tile in component_tile.resolution_tiles() {
                            if !bounds.resolutions.contains(&resolution_tile.resolution) {
                                continue;
                            }

                            if let Some(precinct) = find_precinct_index(&resolution_tile, x, y) {
                                for layer in bounds.layers.clone() {
                                    push(
                                        ProgressionData {
                                            layer_num: layer,
                                            resolution: resolution_tile.resolution,
                                            component,
                                            precinct,
                                        },
                                        emitted,
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Visit each in-range component that has the given resolution.
fn for_components_at(
    tile: &Tile<'_>,
    bounds: &RecordBounds,
    resolution: u16,
    mut visit: impl FnMut(u16, &ResolutionTile<'_>),
) {
    for (component, component_tile) in tile.component_tiles().enumerate() {
        let component = component as u16;
        if !bounds.components.contains(&component) {
            continue;
        }

        if resolution >= component_tile.component_info.num_resolution_levels() {
            continue;
        }

        let resolution_tile = ResolutionTile::new(component_tile, resolution);
        if resolution_tile.num_precincts() == 0 {
            continue;
        }

        visit(component, &resolution_tile);
    }
}

/// Decide whether the reference-grid point (x, y) triggers the emission of
/// a precinct of this resolution, and if so which one (B.12.1.3): the
/// point must sit on the scaled precinct pitch, or be the tile origin when
/// the resolution's origin is off-grid in that axis.
fn find_precinct_index(resolution_tile: &ResolutionTile<'_>, x: u32, y: u32) -> Option<u32> {
    if resolution_tile.num_precincts() == 0 {
        return None;
    }

    let component_info = resolution_tile.component_tile.component_info;
    let tile_rect = resolution_tile.component_tile.tile.rect;

    let num_decomposition_levels = component_info
        .coding_style
        .parameters
        .num_decomposition_levels as u32;
    let resolution = resolution_tile.resolution as u32;
    if resolution > num_decomposition_levels {
        return None;
    }

    let vertical_resolution = component_info.size_info.vertical_resolution as u32;
    let horizontal_resolution = component_info.size_info.horizontal_resolution as u32;

    let base_shift = num_decomposition_levels - resolution;
    let resolution_scale = 1u64 << base_shift;

    let y_stride_shift = resolution_tile.precinct_exponent_y() as u32 + base_shift;
    let x_stride_shift = resolution_tile.precinct_exponent_x() as u32 + base_shift;

    let y_stride = vertical_resolution as u64 * (1u64 << y_stride_shift);
    let x_stride = horizontal_resolution as u64 * (1u64 << x_stride_shift);

    let y_val = y as u64;
    let x_val = x as u64;
    let ty0 = tile_rect.y0 as u64;
    let tx0 = tile_rect.x0 as u64;
    let try0 = resolution_tile.rect.y0 as u64;
    let trx0 = resolution_tile.rect.x0 as u64;

    let cond1 = y_val % y_stride == 0;
    let cond2 = y_val == ty0 && (try0 * resolution_scale) % y_stride != 0;
    if !(cond1 || cond2) {
        return None;
    }

    let cond3 = x_val % x_stride == 0;
    let cond4 = x_val == tx0 && (trx0 * resolution_scale) % x_stride != 0;
    if !(cond3 || cond4) {
        return None;
    }

    let horizontal_denom = horizontal_resolution as u64 * resolution_scale;
    let vertical_denom = vertical_resolution as u64 * resolution_scale;

    let precinct_x_scale = 1u64 << (resolution_tile.precinct_exponent_x() as u32);
    let precinct_y_scale = 1u64 << (resolution_tile.precinct_exponent_y() as u32);

    let diff_x =
        (x_val.div_ceil(horizontal_denom) / precinct_x_scale).checked_sub(trx0 / precinct_x_scale)?;
    let diff_y =
        (y_val.div_ceil(vertical_denom) / precinct_y_scale).checked_sub(try0 / precinct_y_scale)?;

    let precincts_wide = resolution_tile.num_precincts_x() as u64;
    let precinct = diff_x + precincts_wide * diff_y;
    if precinct >= resolution_tile.num_precincts() as u64 {
        return None;
    }

    precinct.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::{
        CodingStyleComponent, CodingStyleDefault, CodingStyleFlags, CodingStyleParameters,
        ComponentInfo, ComponentSizeInfo, Header, QuantizationInfo, QuantizationStyle, SizeData,
        WaveletTransform,
    };
    use crate::tile::Tile;

    fn test_header(num_layers: u16, order: ProgressionOrder) -> Header {
        let coding_style = CodingStyleComponent {
            flags: CodingStyleFlags::default(),
            parameters: CodingStyleParameters {
                num_decomposition_levels: 2,
                num_resolution_levels: 3,
                code_block_width: 5,
                code_block_height: 5,
                code_block_style: 0,
                transformation: WaveletTransform::Reversible53,
                precinct_exponents: vec![(6, 6); 3],
            },
        };

        let size_info = ComponentSizeInfo {
            precision: 8,
            is_signed: false,
            horizontal_resolution: 1,
            vertical_resolution: 1,
        };

        let component_infos = (0..3)
            .map(|_| ComponentInfo {
                size_info,
                coding_style: coding_style.clone(),
                quantization_info: QuantizationInfo {
                    quantization_style: QuantizationStyle::NoQuantization,
                    guard_bits: 2,
                    step_sizes: vec![],
                },
                roi_shift: 0,
                ht: true,
            })
            .collect();

        Header {
            size_data: SizeData {
                reference_grid_width: 256,
                reference_grid_height: 256,
                image_area_x_offset: 0,
                image_area_y_offset: 0,
                tile_width: 256,
                tile_height: 256,
                tile_x_offset: 0,
                tile_y_offset: 0,
                component_sizes: vec![size_info; 3],
            },
            global_coding_style: CodingStyleDefault {
                progression_order: order,
                num_layers,
                mct: false,
                component_parameters: coding_style,
            },
            component_infos,
            capabilities: None,
            poc_records: vec![],
            strict: false,
        }
    }

    fn orders() -> [ProgressionOrder; 5] {
        [
            ProgressionOrder::LayerResolutionComponentPosition,
            ProgressionOrder::ResolutionLayerComponentPosition,
            ProgressionOrder::ResolutionPositionComponentLayer,
            ProgressionOrder::PositionComponentResolutionLayer,
            ProgressionOrder::ComponentPositionResolutionLayer,
        ]
    }

    /// All five orders enumerate the same tuple set, each tuple exactly
    /// once.
    #[test]
    fn orders_are_permutations() {
        let mut reference: Option<Vec<ProgressionData>> = None;

        for order in orders() {
            let header = test_header(2, order);
            let tile = Tile::new(0, &header);

            let mut sequence = build_packet_sequence(&tile);

            let mut deduped = sequence.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(deduped.len(), sequence.len(), "{order:?} emitted a duplicate");

            sequence.sort();
            match &reference {
                None => reference = Some(sequence),
                Some(reference) => assert_eq!(reference, &sequence, "{order:?}"),
            }
        }
    }

    /// LRCP emits layers outermost; RLCP emits resolutions outermost.
    #[test]
    fn outer_loop_order() {
        let header = test_header(2, ProgressionOrder::LayerResolutionComponentPosition);
        let tile = Tile::new(0, &header);
        let lrcp = build_packet_sequence(&tile);
        assert!(lrcp.windows(2).all(|w| w[0].layer_num <= w[1].layer_num));

        let header = test_header(2, ProgressionOrder::ResolutionLayerComponentPosition);
        let tile = Tile::new(0, &header);
        let rlcp = build_packet_sequence(&tile);
        assert!(rlcp.windows(2).all(|w| w[0].resolution <= w[1].resolution));
    }

    /// A POC record reorders its sub-range; the catch-all record emits the
    /// rest, and nothing is emitted twice.
    #[test]
    fn poc_overrides_are_deduplicated() {
        let header = test_header(2, ProgressionOrder::LayerResolutionComponentPosition);
        let mut tile = Tile::new(0, &header);
        tile.poc_records = vec![PocRecord {
            resolution_start: 0,
            component_start: 0,
            layer_end: 2,
            resolution_end: 1,
            component_end: 3,
            order: ProgressionOrder::ComponentPositionResolutionLayer,
        }];

        let sequence = build_packet_sequence(&tile);

        let mut deduped = sequence.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), sequence.len());

        // The record's resolution-0 packets come first, component by
        // component.
        assert!(sequence[0].resolution == 0 && sequence[0].component == 0);

        // Compare against the plain LRCP tuple set.
        let plain_tile = Tile::new(0, &header);
        let mut plain = build_packet_sequence(&plain_tile);
        plain.sort();
        assert_eq!(deduped, plain);
    }
}
