//! Creating tiles and parsing their constituent tile parts.

use crate::codestream::{
    Codestream, ComponentInfo, Header, PocRecord, ProgressionOrder, markers, skip_marker_segment,
};
use crate::error::{Error, ErrorKind, Position, Result, bail};
use crate::log::lwarn;
use crate::rect::Region;

/// The sub-band orientations. `LowLow` only exists at resolution 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SubBandType {
    LowLow,
    HighLow,
    LowHigh,
    HighHigh,
}

impl SubBandType {
    /// The three sub-bands of a non-zero resolution, in codestream order.
    pub(crate) const HIGH_BANDS: [Self; 3] = [Self::HighLow, Self::LowHigh, Self::HighHigh];

    /// The horizontal offset on the interleaved grid (xob).
    pub(crate) fn x_offset(self) -> u32 {
        matches!(self, Self::HighLow | Self::HighHigh) as u32
    }

    /// The vertical offset on the interleaved grid (yob).
    pub(crate) fn y_offset(self) -> u32 {
        matches!(self, Self::LowHigh | Self::HighHigh) as u32
    }

    /// log2 of the sub-band's nominal gain for the reversible path.
    pub(crate) fn log_gain(self) -> u16 {
        match self {
            Self::LowLow => 0,
            Self::HighLow | Self::LowHigh => 1,
            Self::HighHigh => 2,
        }
    }

    /// Index within a resolution's band list (HL, LH, HH); the LL band of
    /// resolution 0 also sits at index 0.
    pub(crate) fn band_index(self) -> usize {
        match self {
            Self::LowLow | Self::HighLow => 0,
            Self::LowHigh => 1,
            Self::HighHigh => 2,
        }
    }
}

/// A single tile in the image.
#[derive(Clone, Debug)]
pub(crate) struct Tile<'a> {
    pub(crate) idx: u32,
    /// The concatenated tile parts that contain all the information for all
    /// constituent codeblocks.
    pub(crate) tile_parts: Vec<&'a [u8]>,
    /// Parameters for each component. In most cases, those are directly
    /// inherited from the main header. But in some cases, individual tiles
    /// might override them.
    pub(crate) component_infos: Vec<ComponentInfo>,
    /// The rectangle making up the area of the tile. `x1` and `y1` are
    /// exclusive.
    pub(crate) rect: Region,
    pub(crate) progression_order: ProgressionOrder,
    pub(crate) num_layers: u16,
    pub(crate) mct: bool,
    /// Progression-order changes, from the tile-part header or, failing
    /// that, the main header.
    pub(crate) poc_records: Vec<PocRecord>,
}

impl<'a> Tile<'a> {
    pub(crate) fn new(idx: u32, header: &Header) -> Tile<'a> {
        let rect = {
            let size_data = &header.size_data;

            let x_coord = size_data.tile_x_coord(idx);
            let y_coord = size_data.tile_y_coord(idx);

            // See B-7, B-8, B-9 and B-10.
            let x0 = u32::max(
                size_data.tile_x_offset + x_coord * size_data.tile_width,
                size_data.image_area_x_offset,
            );
            let y0 = u32::max(
                size_data.tile_y_offset + y_coord * size_data.tile_height,
                size_data.image_area_y_offset,
            );

            // Note that `x1` and `y1` are exclusive.
            let x1 = u32::min(
                size_data.tile_x_offset + (x_coord + 1) * size_data.tile_width,
                size_data.reference_grid_width,
            );
            let y1 = u32::min(
                size_data.tile_y_offset + (y_coord + 1) * size_data.tile_height,
                size_data.reference_grid_height,
            );

            Region::new(x0, y0, x1, y1)
        };

        Tile {
            idx,
            // Will be filled once we start parsing.
            tile_parts: vec![],
            rect,
            // By default, each tile inherits the settings from the main
            // header. When parsing the tile parts, some of these settings
            // might be overridden.
            component_infos: header.component_infos.clone(),
            progression_order: header.global_coding_style.progression_order,
            mct: header.global_coding_style.mct,
            num_layers: header.global_coding_style.num_layers,
            poc_records: header.poc_records.clone(),
        }
    }

    /// Return an iterator over the component tiles.
    pub(crate) fn component_tiles(&self) -> impl Iterator<Item = ComponentTile<'_>> {
        self.component_infos
            .iter()
            .map(|i| ComponentTile::new(self, i))
    }
}

/// Create the tiles and parse their constituent tile parts.
pub(crate) fn parse<'a>(reader: &mut Codestream<'a>, main_header: &Header) -> Result<Vec<Tile<'a>>> {
    let mut tiles = (0..main_header.size_data.num_tiles() as usize)
        .map(|idx| Tile::new(idx as u32, main_header))
        .collect::<Vec<_>>();

    parse_tile_part(reader, main_header, &mut tiles, true)?;

    while reader.peek_marker() == Some(markers::SOT) {
        parse_tile_part(reader, main_header, &mut tiles, false)?;
    }

    Ok(tiles)
}

fn parse_tile_part<'a>(
    reader: &mut Codestream<'a>,
    main_header: &Header,
    tiles: &mut [Tile<'a>],
    first: bool,
) -> Result<()> {
    if reader.marker()? != markers::SOT {
        bail!(ErrorKind::MalformedMarker("expected SOT at tile-part start"));
    }

    let tile_part_header =
        sot_marker(reader).ok_or(ErrorKind::MalformedMarker("SOT"))?;

    if tile_part_header.tile_index as u32 >= main_header.size_data.num_tiles() {
        bail!(ErrorKind::MalformedMarker("invalid tile index in SOT"));
    }

    let data_len = if tile_part_header.tile_part_length == 0 {
        reader.rest().len()
    } else {
        // Subtract 12 to account for the marker length.
        (tile_part_header.tile_part_length as usize)
            .checked_sub(12)
            .ok_or(ErrorKind::MalformedMarker("tile-part length too short"))?
    };

    let start = reader.position();

    let tile_idx = tile_part_header.tile_index as u32;
    let tile = &mut tiles[tile_part_header.tile_index as usize];
    let num_components = tile.component_infos.len();

    loop {
        let Some(marker) = reader.peek_marker() else {
            lwarn!(
                "expected marker in tile-part, but didn't find one. tile \
            part will be ignored."
            );

            return Ok(());
        };

        match marker {
            markers::SOD => {
                reader.marker()?;
                break;
            }
            // COD, COC, QCD, QCC and POC should only be used in the _first_
            // tile-part header, if they appear at all.
            markers::COD => {
                reader.marker()?;
                let cod = crate::codestream::cod_marker(reader)
                    .ok_or(Error::from(ErrorKind::MalformedMarker("COD")).at(Position::Tile(tile_idx)))?;

                if first {
                    tile.mct = cod.mct;
                    tile.num_layers = cod.num_layers;
                    tile.progression_order = cod.progression_order;

                    for component in &mut tile.component_infos {
                        component.coding_style = cod.component_parameters.clone();
                    }
                } else {
                    lwarn!("encountered unexpected COD marker in tile-part header");
                }
            }
            markers::COC => {
                reader.marker()?;

                let (component_index, coc) =
                    crate::codestream::coc_marker(reader, num_components as u16)
                        .ok_or(Error::from(ErrorKind::MalformedMarker("COC")).at(Position::Tile(tile_idx)))?;

                if first {
                    tile.component_infos
                        .get_mut(component_index as usize)
                        .ok_or(ErrorKind::MalformedMarker("COC component index"))?
                        .coding_style = coc;
                } else {
                    lwarn!("encountered unexpected COC marker in tile-part header");
                }
            }
            markers::QCD => {
                reader.marker()?;
                let qcd = crate::codestream::qcd_marker(reader)
                    .ok_or(Error::from(ErrorKind::MalformedMarker("QCD")).at(Position::Tile(tile_idx)))?;

                if first {
                    for component_info in &mut tile.component_infos {
                        component_info.quantization_info = qcd.clone();
                    }
                } else {
                    lwarn!("encountered unexpected QCD marker in tile-part header");
                }
            }
            markers::QCC => {
                reader.marker()?;
                let (component_index, qcc) =
                    crate::codestream::qcc_marker(reader, num_components as u16)
                        .ok_or(Error::from(ErrorKind::MalformedMarker("QCC")).at(Position::Tile(tile_idx)))?;

                if first {
                    tile.component_infos
                        .get_mut(component_index as usize)
                        .ok_or(ErrorKind::MalformedMarker("QCC component index"))?
                        .quantization_info = qcc.clone();
                } else {
                    lwarn!("encountered unexpected QCC marker in tile-part header");
                }
            }
            markers::POC => {
                reader.marker()?;
                let records = crate::codestream::poc_marker(reader, num_components as u16)
                    .ok_or(Error::from(ErrorKind::MalformedMarker("POC")).at(Position::Tile(tile_idx)))?;

                if first {
                    // Tile-part POC records replace any main-header ones.
                    tile.poc_records = records;
                } else {
                    lwarn!("encountered unexpected POC marker in tile-part header");
                }
            }
            markers::PPT => {
                bail!(ErrorKind::UnsupportedFeature("packed packet headers (PPT)"));
            }
            markers::EOC => break,
            _ => {
                reader.marker()?;
                skip_marker_segment(reader).ok_or(
                    Error::from(ErrorKind::Truncated("tile-part marker segment"))
                        .at(Position::Tile(tile_idx)),
                )?;
            }
        }
    }

    let mut remaining_bytes = if let Some(len) = data_len.checked_sub(reader.position() - start) {
        len
    } else {
        lwarn!("didn't find sufficient data in tile part");

        return Ok(());
    };

    let available = reader.rest().len();
    if remaining_bytes > available {
        if main_header.strict {
            return Err(
                Error::from(ErrorKind::Truncated("tile-part data")).at(Position::Tile(tile_idx))
            );
        }

        lwarn!(
            "tile-part of tile {} announces {} bytes but only {} remain",
            tile_idx,
            remaining_bytes,
            available
        );
        remaining_bytes = available;
    }

    tile.tile_parts.push(
        reader
            .take(remaining_bytes)
            .ok_or(Error::from(ErrorKind::Truncated("tile-part data")).at(Position::Tile(tile_idx)))?,
    );

    Ok(())
}

/// A tile, instantiated to a specific component.
#[derive(Debug, Copy, Clone)]
pub(crate) struct ComponentTile<'a> {
    /// The underlying tile.
    pub(crate) tile: &'a Tile<'a>,
    /// The information of the component of the tile.
    pub(crate) component_info: &'a ComponentInfo,
    /// The rectangle of the component tile.
    pub(crate) rect: Region,
}

impl<'a> ComponentTile<'a> {
    pub(crate) fn new(tile: &'a Tile<'a>, component_info: &'a ComponentInfo) -> Self {
        let tile_rect = tile.rect;

        let rect = if component_info.size_info.horizontal_resolution == 1
            && component_info.size_info.vertical_resolution == 1
        {
            tile_rect
        } else {
            // As described in B-12.
            let t_x0 = tile_rect
                .x0
                .div_ceil(component_info.size_info.horizontal_resolution as u32);
            let t_y0 = tile_rect
                .y0
                .div_ceil(component_info.size_info.vertical_resolution as u32);
            let t_x1 = tile_rect
                .x1
                .div_ceil(component_info.size_info.horizontal_resolution as u32);
            let t_y1 = tile_rect
                .y1
                .div_ceil(component_info.size_info.vertical_resolution as u32);

            Region::new(t_x0, t_y0, t_x1, t_y1)
        };

        ComponentTile {
            tile,
            component_info,
            rect,
        }
    }

    pub(crate) fn resolution_tiles(&self) -> impl Iterator<Item = ResolutionTile<'_>> {
        (0..self
            .component_info
            .coding_style
            .parameters
            .num_resolution_levels)
            .map(|r| ResolutionTile::new(*self, r))
    }
}

/// A tile instantiated to a specific resolution of a component tile.
pub(crate) struct ResolutionTile<'a> {
    /// The resolution of the tile.
    pub(crate) resolution: u16,
    /// The decomposition level of the tile.
    pub(crate) decomposition_level: u16,
    /// The underlying component tile.
    pub(crate) component_tile: ComponentTile<'a>,
    /// The rectangle of the resolution tile.
    pub(crate) rect: Region,
}

impl<'a> ResolutionTile<'a> {
    pub(crate) fn new(component_tile: ComponentTile<'_>, resolution: u16) -> ResolutionTile<'_> {
        assert!(
            component_tile
                .component_info
                .coding_style
                .parameters
                .num_resolution_levels
                > resolution
        );

        let rect = {
            // See formula B-14.
            let n_l = component_tile
                .component_info
                .coding_style
                .parameters
                .num_decomposition_levels;

            let denominator = 1u32 << (n_l - resolution);
            let tx0 = component_tile.rect.x0.div_ceil(denominator);
            let ty0 = component_tile.rect.y0.div_ceil(denominator);
            let tx1 = component_tile.rect.x1.div_ceil(denominator);
            let ty1 = component_tile.rect.y1.div_ceil(denominator);

            Region::new(tx0, ty0, tx1, ty1)
        };

        // Decomposition level and resolution level are inversely related
        // to each other. In addition to that, there is always one more
        // resolution than decomposition levels (resolution level 0 only
        // includes the LL subband of the N_L decomposition, resolution level
        // 1 includes the HL, LH and HH subbands of the N_L decomposition).
        let decomposition_level = {
            let n_l = component_tile
                .component_info
                .coding_style
                .parameters
                .num_decomposition_levels;

            if resolution == 0 {
                n_l
            } else {
                n_l - (resolution - 1)
            }
        };

        ResolutionTile {
            resolution,
            decomposition_level,
            component_tile,
            rect,
        }
    }

    /// The sub-bands present at this resolution, in codestream order.
    pub(crate) fn sub_band_types(&self) -> &'static [SubBandType] {
        if self.resolution == 0 {
            &[SubBandType::LowLow]
        } else {
            &SubBandType::HIGH_BANDS
        }
    }

    pub(crate) fn sub_band_rect(&self, sub_band_type: SubBandType) -> Region {
        // This is the only permissible sub-band type for the given resolution.
        if self.resolution == 0 {
            assert_eq!(sub_band_type, SubBandType::LowLow);
        }

        // Formula B-15. With no decompositions at all the LL band covers the
        // component tile itself.
        let xo_b = sub_band_type.x_offset();
        let yo_b = sub_band_type.y_offset();

        let half = if self.decomposition_level == 0 {
            0
        } else {
            1u32 << (self.decomposition_level - 1)
        };
        let numerator_x = half * xo_b;
        let numerator_y = half * yo_b;
        let denominator = 1u32 << self.decomposition_level;

        let tbx_0 = self
            .component_tile
            .rect
            .x0
            .saturating_sub(numerator_x)
            .div_ceil(denominator);
        let tbx_1 = self
            .component_tile
            .rect
            .x1
            .saturating_sub(numerator_x)
            .div_ceil(denominator);
        let tby_0 = self
            .component_tile
            .rect
            .y0
            .saturating_sub(numerator_y)
            .div_ceil(denominator);
        let tby_1 = self
            .component_tile
            .rect
            .y1
            .saturating_sub(numerator_y)
            .div_ceil(denominator);

        Region::new(tbx_0, tby_0, tbx_1, tby_1)
    }

    /// The exponent for determining the horizontal size of a precinct.
    ///
    /// `PPx` in the specification.
    pub(crate) fn precinct_exponent_x(&self) -> u8 {
        self.component_tile
            .component_info
            .coding_style
            .parameters
            .precinct_exponents[self.resolution as usize]
            .0
    }

    /// The exponent for determining the vertical size of a precinct.
    ///
    /// `PPy` in the specification.
    pub(crate) fn precinct_exponent_y(&self) -> u8 {
        self.component_tile
            .component_info
            .coding_style
            .parameters
            .precinct_exponents[self.resolution as usize]
            .1
    }

    pub(crate) fn num_precincts_x(&self) -> u32 {
        // See B-16.
        let Region { x0, x1, .. } = self.rect;

        if x0 == x1 {
            0
        } else {
            x1.div_ceil(1 << self.precinct_exponent_x()) - (x0 >> self.precinct_exponent_x())
        }
    }

    pub(crate) fn num_precincts_y(&self) -> u32 {
        // See B-16.
        let Region { y0, y1, .. } = self.rect;

        if y0 == y1 {
            0
        } else {
            y1.div_ceil(1 << self.precinct_exponent_y()) - (y0 >> self.precinct_exponent_y())
        }
    }

    pub(crate) fn num_precincts(&self) -> u32 {
        self.num_precincts_x() * self.num_precincts_y()
    }

    /// The rectangle of precinct `p` on this resolution's grid.
    pub(crate) fn precinct_rect(&self, p: u32) -> Region {
        let ppx = 1u32 << self.precinct_exponent_x();
        let ppy = 1u32 << self.precinct_exponent_y();

        let idxoff_x = self.rect.x0 / ppx;
        let idxoff_y = self.rect.y0 / ppy;

        let x = p % self.num_precincts_x();
        let y = p / self.num_precincts_x();

        Region::new(
            u32::max(self.rect.x0, ppx * (x + idxoff_x)),
            u32::max(self.rect.y0, ppy * (y + idxoff_y)),
            u32::min(self.rect.x1, ppx * (x + 1 + idxoff_x)),
            u32::min(self.rect.y1, ppy * (y + 1 + idxoff_y)),
        )
    }

    /// Map a precinct rectangle (on the resolution grid) to a sub-band.
    pub(crate) fn precinct_sub_band_rect(&self, p: u32, sub_band_type: SubBandType) -> Region {
        let rect = self.precinct_rect(p);

        if self.resolution == 0 {
            return rect.clip_to(self.sub_band_rect(sub_band_type));
        }

        let xob = sub_band_type.x_offset();
        let yob = sub_band_type.y_offset();

        let mapped = Region::new(
            rect.x0.saturating_sub(xob).div_ceil(2),
            rect.y0.saturating_sub(yob).div_ceil(2),
            rect.x1.saturating_sub(xob).div_ceil(2),
            rect.y1.saturating_sub(yob).div_ceil(2),
        );

        mapped.clip_to(self.sub_band_rect(sub_band_type))
    }

    pub(crate) fn code_block_width(&self) -> u32 {
        // See B-17.
        let xcb = self
            .component_tile
            .component_info
            .coding_style
            .parameters
            .code_block_width;

        let xcb = if self.resolution > 0 {
            u8::min(xcb, self.precinct_exponent_x().max(1) - 1)
        } else {
            u8::min(xcb, self.precinct_exponent_x())
        };

        1u32 << xcb
    }

    pub(crate) fn code_block_height(&self) -> u32 {
        // See B-18.
        let ycb = self
            .component_tile
            .component_info
            .coding_style
            .parameters
            .code_block_height;

        let ycb = if self.resolution > 0 {
            u8::min(ycb, self.precinct_exponent_y().max(1) - 1)
        } else {
            u8::min(ycb, self.precinct_exponent_y())
        };

        1u32 << ycb
    }
}

struct TilePartHeader {
    tile_index: u16,
    tile_part_length: u32,
}

/// SOT marker (A.4.2).
fn sot_marker(reader: &mut Codestream<'_>) -> Option<TilePartHeader> {
    // Length.
    let _ = reader.get_word()?;

    let tile_index = reader.get_word()?;
    let tile_part_length = reader.get_dword()?;

    // We infer those ourselves.
    let _tile_part_index = reader.get_byte()?;
    let _num_tile_parts = reader.get_byte()?;

    Some(TilePartHeader {
        tile_index,
        tile_part_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::{
        CodingStyleComponent, CodingStyleDefault, CodingStyleFlags, CodingStyleParameters,
        ComponentSizeInfo, QuantizationInfo, QuantizationStyle, SizeData, WaveletTransform,
    };

    /// Test case for the example in B.4.
    #[test]
    fn test_jpeg2000_standard_example_b4() {
        let component_size_info_0 = ComponentSizeInfo {
            precision: 8,
            is_signed: false,
            horizontal_resolution: 1,
            vertical_resolution: 1,
        };

        let dummy_component_coding_style = CodingStyleComponent {
            flags: CodingStyleFlags::default(),
            parameters: CodingStyleParameters {
                num_decomposition_levels: 0,
                num_resolution_levels: 0,
                code_block_width: 0,
                code_block_height: 0,
                code_block_style: 0,
                transformation: WaveletTransform::Irreversible97,
                precinct_exponents: vec![],
            },
        };

        let dummy_quantization_info = QuantizationInfo {
            quantization_style: QuantizationStyle::NoQuantization,
            guard_bits: 0,
            step_sizes: vec![],
        };

        let component_info_0 = ComponentInfo {
            size_info: component_size_info_0,
            coding_style: dummy_component_coding_style.clone(),
            quantization_info: dummy_quantization_info.clone(),
            roi_shift: 0,
            ht: false,
        };

        let component_size_info_1 = ComponentSizeInfo {
            precision: 8,
            is_signed: false,
            horizontal_resolution: 2,
            vertical_resolution: 2,
        };

        let component_info_1 = ComponentInfo {
            size_info: component_size_info_1,
            coding_style: dummy_component_coding_style.clone(),
            quantization_info: dummy_quantization_info.clone(),
            roi_shift: 0,
            ht: false,
        };

        let size_data = SizeData {
            reference_grid_width: 1432,
            reference_grid_height: 954,
            image_area_x_offset: 152,
            image_area_y_offset: 234,
            tile_width: 396,
            tile_height: 297,
            tile_x_offset: 0,
            tile_y_offset: 0,
            component_sizes: vec![component_size_info_0, component_size_info_1],
        };

        assert_eq!(size_data.image_width(), 1280);
        assert_eq!(size_data.image_height(), 720);

        assert_eq!(size_data.num_x_tiles(), 4);
        assert_eq!(size_data.num_y_tiles(), 4);
        assert_eq!(size_data.num_tiles(), 16);

        let header = Header {
            size_data,
            // Just dummy values.
            global_coding_style: CodingStyleDefault {
                progression_order: ProgressionOrder::LayerResolutionComponentPosition,
                num_layers: 0,
                mct: false,
                component_parameters: dummy_component_coding_style,
            },
            component_infos: vec![],
            capabilities: None,
            poc_records: vec![],
            strict: false,
        };

        let tile_0_0 = Tile::new(0, &header);
        let coords_0_0 = ComponentTile::new(&tile_0_0, &component_info_0).rect;
        assert_eq!(coords_0_0.x0, 152);
        assert_eq!(coords_0_0.y0, 234);
        assert_eq!(coords_0_0.x1, 396);
        assert_eq!(coords_0_0.y1, 297);
        assert_eq!(coords_0_0.width(), 244);
        assert_eq!(coords_0_0.height(), 63);

        let tile_1_0 = Tile::new(1, &header);
        let coords_1_0 = ComponentTile::new(&tile_1_0, &component_info_0).rect;
        assert_eq!(coords_1_0.x0, 396);
        assert_eq!(coords_1_0.y0, 234);
        assert_eq!(coords_1_0.x1, 792);
        assert_eq!(coords_1_0.y1, 297);
        assert_eq!(coords_1_0.width(), 396);
        assert_eq!(coords_1_0.height(), 63);

        let tile_0_1 = Tile::new(4, &header);
        let coords_0_1 = ComponentTile::new(&tile_0_1, &component_info_0).rect;
        assert_eq!(coords_0_1.x0, 152);
        assert_eq!(coords_0_1.y0, 297);
        assert_eq!(coords_0_1.x1, 396);
        assert_eq!(coords_0_1.y1, 594);
        assert_eq!(coords_0_1.width(), 244);
        assert_eq!(coords_0_1.height(), 297);

        let tile_1_1 = Tile::new(5, &header);
        let coords_1_1 = ComponentTile::new(&tile_1_1, &component_info_0).rect;
        assert_eq!(coords_1_1.x0, 396);
        assert_eq!(coords_1_1.y0, 297);
        assert_eq!(coords_1_1.x1, 792);
        assert_eq!(coords_1_1.y1, 594);
        assert_eq!(coords_1_1.width(), 396);
        assert_eq!(coords_1_1.height(), 297);

        let tile_3_3 = Tile::new(15, &header);
        let coords_3_3 = ComponentTile::new(&tile_3_3, &component_info_0).rect;
        assert_eq!(coords_3_3.x0, 1188);
        assert_eq!(coords_3_3.y0, 891);
        assert_eq!(coords_3_3.x1, 1432);
        assert_eq!(coords_3_3.y1, 954);
        assert_eq!(coords_3_3.width(), 244);
        assert_eq!(coords_3_3.height(), 63);

        let tile_0_0_comp1 = ComponentTile::new(&tile_0_0, &component_info_1).rect;
        assert_eq!(tile_0_0_comp1.x0, 76);
        assert_eq!(tile_0_0_comp1.y0, 117);
        assert_eq!(tile_0_0_comp1.x1, 198);
        assert_eq!(tile_0_0_comp1.y1, 149);
        assert_eq!(tile_0_0_comp1.width(), 122);
        assert_eq!(tile_0_0_comp1.height(), 32);

        let tile_1_0_comp1 = ComponentTile::new(&tile_1_0, &component_info_1).rect;
        assert_eq!(tile_1_0_comp1.x0, 198);
        assert_eq!(tile_1_0_comp1.y0, 117);
        assert_eq!(tile_1_0_comp1.x1, 396);
        assert_eq!(tile_1_0_comp1.y1, 149);
        assert_eq!(tile_1_0_comp1.width(), 198);
        assert_eq!(tile_1_0_comp1.height(), 32);

        let tile_0_1_comp1 = ComponentTile::new(&tile_0_1, &component_info_1).rect;
        assert_eq!(tile_0_1_comp1.x0, 76);
        assert_eq!(tile_0_1_comp1.y0, 149);
        assert_eq!(tile_0_1_comp1.x1, 198);
        assert_eq!(tile_0_1_comp1.y1, 297);
        assert_eq!(tile_0_1_comp1.width(), 122);
        assert_eq!(tile_0_1_comp1.height(), 148);

        let tile_1_1_comp1 = ComponentTile::new(&tile_1_1, &component_info_1).rect;
        assert_eq!(tile_1_1_comp1.x0, 198);
        assert_eq!(tile_1_1_comp1.y0, 149);
        assert_eq!(tile_1_1_comp1.x1, 396);
        assert_eq!(tile_1_1_comp1.y1, 297);
        assert_eq!(tile_1_1_comp1.width(), 198);
        assert_eq!(tile_1_1_comp1.height(), 148);

        let tile_2_1 = Tile::new(6, &header);
        let tile_2_1_comp1 = ComponentTile::new(&tile_2_1, &component_info_1).rect;
        assert_eq!(tile_2_1_comp1.x0, 396);
        assert_eq!(tile_2_1_comp1.y0, 149);
        assert_eq!(tile_2_1_comp1.x1, 594);
        assert_eq!(tile_2_1_comp1.y1, 297);
        assert_eq!(tile_2_1_comp1.width(), 198);
        assert_eq!(tile_2_1_comp1.height(), 148);

        assert_eq!(tile_1_1_comp1.width(), tile_2_1_comp1.width());
        assert_eq!(tile_1_1_comp1.height(), tile_2_1_comp1.height());
    }
}
