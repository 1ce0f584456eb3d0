//! Parsing and writing of codestream marker segments (Annex A).

use crate::error::{ErrorKind, Result, bail, err};
use crate::log::{ldebug, lwarn};
use bitflags::bitflags;

/// Cursor over codestream bytes.
///
/// Marker-segment parameters are big-endian (B.2); the cursor narrows its
/// remaining slice as they are taken and remembers how much it has
/// consumed, so errors can report an offset.
pub(crate) struct Codestream<'a> {
    rest: &'a [u8],
    consumed: usize,
}

impl<'a> Codestream<'a> {
    pub(crate) fn over(bytes: &'a [u8]) -> Self {
        Self {
            rest: bytes,
            consumed: 0,
        }
    }

    /// Bytes consumed so far.
    pub(crate) fn position(&self) -> usize {
        self.consumed
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.rest.is_empty()
    }

    /// Everything not yet consumed.
    pub(crate) fn rest(&self) -> &'a [u8] {
        self.rest
    }

    /// Take the next `len` bytes.
    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.rest.len() {
            return None;
        }

        let (taken, rest) = self.rest.split_at(len);
        self.rest = rest;
        self.consumed += len;
        Some(taken)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Option<()> {
        self.take(len).map(|_| ())
    }

    /// An 8-bit marker-segment parameter.
    pub(crate) fn get_byte(&mut self) -> Option<u8> {
        Some(self.take(1)?[0])
    }

    /// A 16-bit big-endian marker-segment parameter.
    pub(crate) fn get_word(&mut self) -> Option<u16> {
        Some(u16::from_be_bytes(self.take(2)?.try_into().ok()?))
    }

    /// A 32-bit big-endian marker-segment parameter.
    pub(crate) fn get_dword(&mut self) -> Option<u32> {
        Some(u32::from_be_bytes(self.take(4)?.try_into().ok()?))
    }

    /// The code of the marker at the cursor, without consuming anything.
    /// Markers are two-byte words whose first byte is 0xFF.
    pub(crate) fn peek_marker(&self) -> Option<u8> {
        match self.rest {
            [0xFF, code, ..] => Some(*code),
            _ => None,
        }
    }

    /// Consume the marker at the cursor and return its code.
    pub(crate) fn marker(&mut self) -> Result<u8> {
        if self.rest.len() < 2 {
            bail!(ErrorKind::Truncated("marker"));
        }

        let code = self
            .peek_marker()
            .ok_or(ErrorKind::MalformedMarker("expected marker prefix"))?;
        let _ = self.skip(2);
        Ok(code)
    }
}

/// The parsed main header of a codestream.
#[derive(Debug)]
pub(crate) struct Header {
    pub(crate) size_data: SizeData,
    pub(crate) global_coding_style: CodingStyleDefault,
    pub(crate) component_infos: Vec<ComponentInfo>,
    /// Part-15 capabilities, present when a CAP marker was found.
    pub(crate) capabilities: Option<Capabilities>,
    /// Progression-order changes from a main-header POC marker.
    pub(crate) poc_records: Vec<PocRecord>,
    /// Fail instead of warn on recoverable inconsistencies.
    pub(crate) strict: bool,
}

/// Read a main header, starting right after the SOC marker.
pub(crate) fn read_header(reader: &mut Codestream<'_>, strict: bool) -> Result<Header> {
    if reader.marker()? != markers::SIZ {
        bail!(ErrorKind::MalformedMarker("expected SIZ marker after SOC"));
    }

    let size_data = size_marker(reader)?;

    let mut cod = None;
    let mut qcd = None;
    let mut capabilities = None;
    let mut poc_records = Vec::new();

    let num_components = size_data.component_sizes.len() as u16;
    let mut cod_components: Vec<Option<CodingStyleComponent>> = vec![None; num_components as usize];
    let mut qcd_components: Vec<Option<QuantizationInfo>> = vec![None; num_components as usize];
    let mut roi_shifts: Vec<u8> = vec![0; num_components as usize];

    loop {
        match reader
            .peek_marker()
            .ok_or(ErrorKind::Truncated("main header"))?
        {
            markers::SOT => break,
            markers::CAP => {
                reader.marker()?;
                capabilities =
                    Some(cap_marker(reader).ok_or(ErrorKind::MalformedMarker("CAP"))?);
            }
            markers::COD => {
                reader.marker()?;
                cod = Some(cod_marker(reader).ok_or(ErrorKind::MalformedMarker("COD"))?);
            }
            markers::COC => {
                reader.marker()?;
                let (component_index, coc) = coc_marker(reader, num_components)
                    .ok_or(ErrorKind::MalformedMarker("COC"))?;
                *cod_components
                    .get_mut(component_index as usize)
                    .ok_or(ErrorKind::MalformedMarker("COC component index"))? = Some(coc);
            }
            markers::QCD => {
                reader.marker()?;
                qcd = Some(qcd_marker(reader).ok_or(ErrorKind::MalformedMarker("QCD"))?);
            }
            markers::QCC => {
                reader.marker()?;
                let (component_index, qcc) = qcc_marker(reader, num_components)
                    .ok_or(ErrorKind::MalformedMarker("QCC"))?;
                *qcd_components
                    .get_mut(component_index as usize)
                    .ok_or(ErrorKind::MalformedMarker("QCC component index"))? = Some(qcc);
            }
            markers::RGN => {
                reader.marker()?;
                let (component_index, shift) = rgn_marker(reader, num_components)
                    .ok_or(ErrorKind::MalformedMarker("RGN"))?;
                *roi_shifts
                    .get_mut(component_index as usize)
                    .ok_or(ErrorKind::MalformedMarker("RGN component index"))? = shift;
            }
            markers::POC => {
                reader.marker()?;
                poc_records.extend(
                    poc_marker(reader, num_components)
                        .ok_or(ErrorKind::MalformedMarker("POC"))?,
                );
            }
            markers::PPM => {
                bail!(ErrorKind::UnsupportedFeature("packed packet headers (PPM)"));
            }
            markers::TLM | markers::PLM | markers::COM | markers::CRG => {
                reader.marker()?;
                skip_marker_segment(reader)
                    .ok_or(ErrorKind::Truncated("informational marker segment"))?;
            }
            _ => {
                bail!(ErrorKind::MalformedMarker(
                    "unexpected marker in main header"
                ));
            }
        }
    }

    let cod = cod.ok_or(ErrorKind::MalformedMarker("missing COD marker"))?;
    let qcd = qcd.ok_or(ErrorKind::MalformedMarker("missing QCD marker"))?;

    let ht = capabilities.as_ref().is_some_and(Capabilities::uses_ht);
    if let Some(capabilities) = &capabilities {
        ldebug!(
            "Part-15 capabilities: ht {}, mixed {}",
            capabilities.uses_ht(),
            capabilities.ht_mixed()
        );
    }

    let component_infos: Vec<ComponentInfo> = size_data
        .component_sizes
        .iter()
        .enumerate()
        .map(|(idx, csi)| ComponentInfo {
            size_info: *csi,
            coding_style: cod_components[idx]
                .clone()
                .unwrap_or(cod.component_parameters.clone()),
            quantization_info: qcd_components[idx].clone().unwrap_or(qcd.clone()),
            roi_shift: roi_shifts[idx],
            ht,
        })
        .collect();

    Ok(Header {
        size_data,
        global_coding_style: cod,
        component_infos,
        capabilities,
        poc_records,
        strict,
    })
}

/// Part-15 capabilities from the CAP marker (A.5.2 / 15444-15).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Capabilities {
    /// Pcap: one bit per capability part; bit 15 flags Part-15 coding.
    pub(crate) pcap: u32,
    /// Ccap for part 15, when bit 15 of Pcap is set.
    pub(crate) ccap15: u16,
}

impl Capabilities {
    /// Whether HT code-blocks may occur in the codestream.
    pub(crate) fn uses_ht(&self) -> bool {
        self.pcap & (1 << (32 - 15)) != 0
    }

    /// Whether HT and legacy block coding may be mixed per codeblock.
    pub(crate) fn ht_mixed(&self) -> bool {
        self.ccap15 & 0xC000 != 0
    }
}

/// Progression order (Table A.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressionOrder {
    LayerResolutionComponentPosition,
    ResolutionLayerComponentPosition,
    ResolutionPositionComponentLayer,
    PositionComponentResolutionLayer,
    ComponentPositionResolutionLayer,
}

impl ProgressionOrder {
    pub(crate) fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::LayerResolutionComponentPosition),
            1 => Ok(Self::ResolutionLayerComponentPosition),
            2 => Ok(Self::ResolutionPositionComponentLayer),
            3 => Ok(Self::PositionComponentResolutionLayer),
            4 => Ok(Self::ComponentPositionResolutionLayer),
            _ => err!(ErrorKind::MalformedMarker("invalid progression order")),
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::LayerResolutionComponentPosition => 0,
            Self::ResolutionLayerComponentPosition => 1,
            Self::ResolutionPositionComponentLayer => 2,
            Self::PositionComponentResolutionLayer => 3,
            Self::ComponentPositionResolutionLayer => 4,
        }
    }
}

/// A progression-order change record from a POC marker (A.6.6).
#[derive(Debug, Clone, Copy)]
pub(crate) struct PocRecord {
    pub(crate) resolution_start: u8,
    pub(crate) component_start: u16,
    pub(crate) layer_end: u16,
    pub(crate) resolution_end: u8,
    pub(crate) component_end: u16,
    pub(crate) order: ProgressionOrder,
}

/// Wavelet transformation type (Table A.20).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaveletTransform {
    Irreversible97,
    Reversible53,
}

impl WaveletTransform {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Irreversible97),
            1 => Ok(Self::Reversible53),
            _ => err!(ErrorKind::MalformedMarker("invalid transformation type")),
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Irreversible97 => 0,
            Self::Reversible53 => 1,
        }
    }
}

/// Coding style flags (Table A.13).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CodingStyleFlags {
    raw: u8,
}

impl CodingStyleFlags {
    pub(crate) fn from_u8(value: u8) -> Self {
        Self { raw: value }
    }

    pub(crate) fn to_u8(self) -> u8 {
        self.raw
    }

    pub(crate) fn new(has_precincts: bool, use_sop: bool, use_eph: bool) -> Self {
        Self {
            raw: (has_precincts as u8) | ((use_sop as u8) << 1) | ((use_eph as u8) << 2),
        }
    }

    pub(crate) fn has_precincts(&self) -> bool {
        (self.raw & 0x01) != 0
    }

    pub(crate) fn may_use_sop_markers(&self) -> bool {
        (self.raw & 0x02) != 0
    }

    pub(crate) fn uses_eph_marker(&self) -> bool {
        (self.raw & 0x04) != 0
    }
}

bitflags! {
    /// The per-codeblock coding mode mask. The low six bits mirror the
    /// code-block style byte of COD/COC (Table A.19); the HT bits come from
    /// the CAP marker and from packet-header parsing state (HT_PHLD,
    /// HT_MIXED).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct CodeBlockMode: u16 {
        const BYPASS = 0x01;
        const RESET = 0x02;
        const RESTART = 0x04;
        const CAUSAL = 0x08;
        const SEGMARK = 0x20;
        const HT = 0x40;
        const HT_PHLD = 0x80;
        const HT_MIXED = 0x100;
    }
}

impl CodeBlockMode {
    pub(crate) fn from_style_byte(value: u8) -> Self {
        Self::from_bits_truncate((value & 0x2F) as u16)
    }

    pub(crate) fn style_byte(self) -> u8 {
        (self.bits() & 0x2F) as u8
    }
}

/// Quantization style (Table A.28).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QuantizationStyle {
    NoQuantization,
    ScalarDerived,
    ScalarExpounded,
}

impl QuantizationStyle {
    fn from_u8(value: u8) -> Result<Self> {
        match value & 0x1F {
            0 => Ok(Self::NoQuantization),
            1 => Ok(Self::ScalarDerived),
            2 => Ok(Self::ScalarExpounded),
            _ => err!(ErrorKind::MalformedMarker("invalid quantization style")),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::NoQuantization => 0,
            Self::ScalarDerived => 1,
            Self::ScalarExpounded => 2,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct StepSize {
    pub(crate) mantissa: u16,
    pub(crate) exponent: u16,
}

/// Quantization properties, from the QCD and QCC markers (A.6.4 and A.6.5).
#[derive(Clone, Debug)]
pub(crate) struct QuantizationInfo {
    pub(crate) quantization_style: QuantizationStyle,
    pub(crate) guard_bits: u8,
    pub(crate) step_sizes: Vec<StepSize>,
}

/// Default values for coding style, from the COD marker (A.6.1).
#[derive(Debug, Clone)]
pub(crate) struct CodingStyleDefault {
    pub(crate) progression_order: ProgressionOrder,
    pub(crate) num_layers: u16,
    pub(crate) mct: bool,
    // This is the default used for all components, if not overridden by COC.
    pub(crate) component_parameters: CodingStyleComponent,
}

/// Values of coding style for each component, from the COC marker (A.6.2).
#[derive(Clone, Debug)]
pub(crate) struct CodingStyleComponent {
    pub(crate) flags: CodingStyleFlags,
    pub(crate) parameters: CodingStyleParameters,
}

/// Shared parameters between the COC and COD marker (A.6.1 and A.6.2).
#[derive(Clone, Debug)]
pub(crate) struct CodingStyleParameters {
    pub(crate) num_decomposition_levels: u16,
    pub(crate) num_resolution_levels: u16,
    /// log2 of the nominal code-block width.
    pub(crate) code_block_width: u8,
    /// log2 of the nominal code-block height.
    pub(crate) code_block_height: u8,
    pub(crate) code_block_style: u8,
    pub(crate) transformation: WaveletTransform,
    pub(crate) precinct_exponents: Vec<(u8, u8)>,
}

/// Everything the pipeline needs to know about one component.
#[derive(Debug, Clone)]
pub(crate) struct ComponentInfo {
    pub(crate) size_info: ComponentSizeInfo,
    pub(crate) coding_style: CodingStyleComponent,
    pub(crate) quantization_info: QuantizationInfo,
    pub(crate) roi_shift: u8,
    /// Whether codeblocks of this component use the Part-15 coder.
    pub(crate) ht: bool,
}

impl ComponentInfo {
    /// Exponent and mantissa for a sub-band, honouring the quantization
    /// style (expounded vs. derived, E.1).
    pub(crate) fn exponent_mantissa(&self, band_index: usize, resolution: u16) -> (u16, u16) {
        let n_ll = self.coding_style.parameters.num_decomposition_levels;

        // A short step-size list is a header lie; fall back to a zero step
        // so the caller's plausibility checks can reject the band.
        let fallback = StepSize {
            exponent: 0,
            mantissa: 0,
        };

        let step_sizes = &self.quantization_info.step_sizes;
        match self.quantization_info.quantization_style {
            QuantizationStyle::NoQuantization | QuantizationStyle::ScalarExpounded => {
                let idx = if resolution == 0 {
                    0
                } else {
                    (1 + (resolution - 1) * 3 + band_index as u16) as usize
                };
                let entry = step_sizes.get(idx).copied().unwrap_or(fallback);

                (entry.exponent, entry.mantissa)
            }
            QuantizationStyle::ScalarDerived => {
                let entry = step_sizes.first().copied().unwrap_or(fallback);
                let n_b = if resolution == 0 {
                    n_ll
                } else {
                    n_ll + 1 - resolution
                };

                ((entry.exponent + n_b).saturating_sub(n_ll), entry.mantissa)
            }
        }
    }

    pub(crate) fn wavelet_transform(&self) -> WaveletTransform {
        self.coding_style.parameters.transformation
    }

    pub(crate) fn num_resolution_levels(&self) -> u16 {
        self.coding_style.parameters.num_resolution_levels
    }

    /// The coding mode mask codeblocks of this component start out with.
    pub(crate) fn code_block_mode(&self) -> CodeBlockMode {
        let mut mode = CodeBlockMode::from_style_byte(self.coding_style.parameters.code_block_style);
        if self.ht {
            mode |= CodeBlockMode::HT;
        }
        mode
    }
}

#[derive(Debug)]
pub(crate) struct SizeData {
    /// Width of the reference grid (Xsiz).
    pub(crate) reference_grid_width: u32,
    /// Height of the reference grid (Ysiz).
    pub(crate) reference_grid_height: u32,
    /// Horizontal offset from the origin of the reference grid to the
    /// left side of the image area (XOsiz).
    pub(crate) image_area_x_offset: u32,
    /// Vertical offset from the origin of the reference grid to the top
    /// side of the image area (YOsiz).
    pub(crate) image_area_y_offset: u32,
    /// Width of one reference tile with respect to the reference grid (XTsiz).
    pub(crate) tile_width: u32,
    /// Height of one reference tile with respect to the reference grid (YTsiz).
    pub(crate) tile_height: u32,
    /// Horizontal offset from the origin of the reference grid to the left
    /// side of the first tile (XTOsiz).
    pub(crate) tile_x_offset: u32,
    /// Vertical offset from the origin of the reference grid to the top
    /// side of the first tile (YTOsiz).
    pub(crate) tile_y_offset: u32,
    /// Component information (Ssiz/XRsiz/YRsiz).
    pub(crate) component_sizes: Vec<ComponentSizeInfo>,
}

/// Component information (A.5.1 and Table A.11).
#[derive(Debug, Clone, Copy)]
pub(crate) struct ComponentSizeInfo {
    pub(crate) precision: u8,
    pub(crate) is_signed: bool,
    pub(crate) horizontal_resolution: u8,
    pub(crate) vertical_resolution: u8,
}

impl SizeData {
    pub(crate) fn tile_x_coord(&self, idx: u32) -> u32 {
        // See B-6.
        idx % self.num_x_tiles()
    }

    pub(crate) fn tile_y_coord(&self, idx: u32) -> u32 {
        // See B-6.
        idx / self.num_x_tiles()
    }

    /// The number of tiles in the x direction.
    pub(crate) fn num_x_tiles(&self) -> u32 {
        // See formula B-5.
        (self.reference_grid_width - self.tile_x_offset).div_ceil(self.tile_width)
    }

    /// The number of tiles in the y direction.
    pub(crate) fn num_y_tiles(&self) -> u32 {
        // See formula B-5.
        (self.reference_grid_height - self.tile_y_offset).div_ceil(self.tile_height)
    }

    /// The total number of tiles.
    pub(crate) fn num_tiles(&self) -> u32 {
        self.num_x_tiles() * self.num_y_tiles()
    }

    /// Return the overall width of the image.
    pub(crate) fn image_width(&self) -> u32 {
        self.reference_grid_width - self.image_area_x_offset
    }

    /// Return the overall height of the image.
    pub(crate) fn image_height(&self) -> u32 {
        self.reference_grid_height - self.image_area_y_offset
    }
}

/// SIZ marker (A.5.1).
fn size_marker(reader: &mut Codestream<'_>) -> Result<SizeData> {
    let size_data =
        size_marker_inner(reader).ok_or(ErrorKind::MalformedMarker("SIZ"))?;

    if size_data.tile_width == 0
        || size_data.tile_height == 0
        || size_data.reference_grid_width == 0
        || size_data.reference_grid_height == 0
    {
        bail!(ErrorKind::MalformedMarker("invalid image dimensions"));
    }

    if size_data.tile_x_offset >= size_data.reference_grid_width
        || size_data.tile_y_offset >= size_data.reference_grid_height
    {
        bail!(ErrorKind::MalformedMarker("invalid image dimensions"));
    }

    // The tile grid offsets (XTOsiz, YTOsiz) are constrained to be no greater
    // than the image area offsets (B-3).
    if size_data.tile_x_offset > size_data.image_area_x_offset
        || size_data.tile_y_offset > size_data.image_area_y_offset
    {
        bail!(ErrorKind::MalformedMarker("tile offsets are invalid"));
    }

    // Also, the tile size plus the tile offset shall be greater than the
    // image area offset. This ensures that the first tile (tile 0) will
    // contain at least one reference grid point from the image area (B-4).
    if size_data.tile_x_offset + size_data.tile_width <= size_data.image_area_x_offset
        || size_data.tile_y_offset + size_data.tile_height <= size_data.image_area_y_offset
    {
        bail!(ErrorKind::MalformedMarker("tile offsets are invalid"));
    }

    if size_data.num_tiles() > 65535 {
        bail!(ErrorKind::MalformedMarker("more than 65535 tiles"));
    }

    let area = size_data.reference_grid_width as u64 * size_data.reference_grid_height as u64;
    if area > 1 << 28 {
        bail!(ErrorKind::ResourceExhausted("image area beyond 2^28 samples"));
    }

    if size_data.component_sizes.len() > 16384 {
        bail!(ErrorKind::MalformedMarker("more than 16384 components"));
    }

    for comp in &size_data.component_sizes {
        if comp.precision == 0 || comp.vertical_resolution == 0 || comp.horizontal_resolution == 0 {
            bail!(ErrorKind::MalformedMarker("invalid component metadata"));
        }

        if comp.precision > 31 {
            bail!(ErrorKind::UnsupportedFeature(
                "component precision above 31 bits"
            ));
        }
    }

    Ok(size_data)
}

fn size_marker_inner(reader: &mut Codestream<'_>) -> Option<SizeData> {
    // Length.
    let _ = reader.get_word()?;
    // Decoder capabilities.
    let _ = reader.get_word()?;

    let xsiz = reader.get_dword()?;
    let ysiz = reader.get_dword()?;
    let x_osiz = reader.get_dword()?;
    let y_osiz = reader.get_dword()?;
    let xt_siz = reader.get_dword()?;
    let yt_siz = reader.get_dword()?;
    let xto_siz = reader.get_dword()?;
    let yto_siz = reader.get_dword()?;
    let csiz = reader.get_word()?;

    let mut components = Vec::with_capacity(csiz as usize);
    for _ in 0..csiz {
        let ssiz = reader.get_byte()?;
        let x_rsiz = reader.get_byte()?;
        let y_rsiz = reader.get_byte()?;

        let precision = (ssiz & 0x7F) + 1;
        let is_signed = (ssiz & 0x80) != 0;

        components.push(ComponentSizeInfo {
            precision,
            is_signed,
            horizontal_resolution: x_rsiz,
            vertical_resolution: y_rsiz,
        });
    }

    Some(SizeData {
        reference_grid_width: xsiz,
        reference_grid_height: ysiz,
        image_area_x_offset: x_osiz,
        image_area_y_offset: y_osiz,
        tile_width: xt_siz,
        tile_height: yt_siz,
        tile_x_offset: xto_siz,
        tile_y_offset: yto_siz,
        component_sizes: components,
    })
}

/// CAP marker (15444-15, A.5.2).
fn cap_marker(reader: &mut Codestream<'_>) -> Option<Capabilities> {
    let length = reader.get_word()?;
    let pcap = reader.get_dword()?;

    // One 16-bit Ccap field per set bit of Pcap.
    let num_ccap = pcap.count_ones() as usize;
    if length as usize != 6 + 2 * num_ccap {
        return None;
    }

    let mut ccap15 = 0;
    for bit in 0..32u32 {
        if pcap & (1 << (31 - bit)) != 0 {
            let ccap = reader.get_word()?;
            if bit + 1 == 15 {
                ccap15 = ccap;
            }
        }
    }

    Some(Capabilities { pcap, ccap15 })
}

fn coding_style_parameters(
    reader: &mut Codestream<'_>,
    coding_style: &CodingStyleFlags,
) -> Option<CodingStyleParameters> {
    let num_decomposition_levels = reader.get_byte()? as u16;
    if num_decomposition_levels > 32 {
        return None;
    }
    let num_resolution_levels = num_decomposition_levels + 1;

    // The exponent fields are four bits wide; offsets above 8 would breach
    // the 4096-sample codeblock bound.
    let code_block_width = (reader.get_byte()? & 0x0F) + 2;
    let code_block_height = (reader.get_byte()? & 0x0F) + 2;
    if code_block_width > 10 || code_block_height > 10 {
        return None;
    }

    let code_block_style = reader.get_byte()?;
    let transformation = WaveletTransform::from_u8(reader.get_byte()?).ok()?;

    let mut precinct_exponents = Vec::new();
    if coding_style.has_precincts() {
        // "Entropy coder with precincts defined below."
        for _ in 0..num_resolution_levels {
            // Table A.21.
            let precinct_size = reader.get_byte()?;
            let width_exp = precinct_size & 0xF;
            let height_exp = precinct_size >> 4;
            precinct_exponents.push((width_exp, height_exp));
        }
    } else {
        // "Entropy coder, precincts with PPx = 15 and PPy = 15"
        for _ in 0..num_resolution_levels {
            precinct_exponents.push((15, 15));
        }
    }

    Some(CodingStyleParameters {
        num_decomposition_levels,
        num_resolution_levels,
        code_block_width,
        code_block_height,
        code_block_style,
        transformation,
        precinct_exponents,
    })
}

pub(crate) fn skip_marker_segment(reader: &mut Codestream<'_>) -> Option<()> {
    let length = reader.get_word()?.checked_sub(2)?;
    reader.skip(length as usize)?;

    Some(())
}

/// COD marker (A.6.1).
pub(crate) fn cod_marker(reader: &mut Codestream<'_>) -> Option<CodingStyleDefault> {
    // Length.
    let _ = reader.get_word()?;

    let coding_style_flags = CodingStyleFlags::from_u8(reader.get_byte()?);
    let progression_order = ProgressionOrder::from_u8(reader.get_byte()?).ok()?;

    let num_layers = reader.get_word()?;
    let mct = reader.get_byte()? == 1;

    let coding_style_parameters = coding_style_parameters(reader, &coding_style_flags)?;

    Some(CodingStyleDefault {
        progression_order,
        num_layers,
        mct,
        component_parameters: CodingStyleComponent {
            flags: coding_style_flags,
            parameters: coding_style_parameters,
        },
    })
}

/// COC marker (A.6.2).
pub(crate) fn coc_marker(
    reader: &mut Codestream<'_>,
    csiz: u16,
) -> Option<(u16, CodingStyleComponent)> {
    // Length.
    let _ = reader.get_word()?;

    let component_index = if csiz < 257 {
        reader.get_byte()? as u16
    } else {
        reader.get_word()?
    };
    let coding_style = CodingStyleFlags::from_u8(reader.get_byte()?);

    // SPcoc, the same structure as SPcod from COD.
    let parameters = coding_style_parameters(reader, &coding_style)?;

    let coc = CodingStyleComponent {
        flags: coding_style,
        parameters,
    };

    Some((component_index, coc))
}

/// QCD marker (A.6.4).
pub(crate) fn qcd_marker(reader: &mut Codestream<'_>) -> Option<QuantizationInfo> {
    let length = reader.get_word()?;

    let sqcd_val = reader.get_byte()?;
    let quantization_style = QuantizationStyle::from_u8(sqcd_val & 0x1F).ok()?;
    let guard_bits = (sqcd_val >> 5) & 0x07;

    let remaining_bytes = (length.checked_sub(3)?) as usize;

    let mut parameters = quantization_parameters(reader, quantization_style, remaining_bytes)?;
    parameters.guard_bits = guard_bits;

    Some(parameters)
}

/// QCC marker (A.6.5).
pub(crate) fn qcc_marker(reader: &mut Codestream<'_>, csiz: u16) -> Option<(u16, QuantizationInfo)> {
    let length = reader.get_word()?;

    let component_index = if csiz < 257 {
        reader.get_byte()? as u16
    } else {
        reader.get_word()?
    };

    let sqcc_val = reader.get_byte()?;
    let quantization_style = QuantizationStyle::from_u8(sqcc_val & 0x1F).ok()?;
    let guard_bits = (sqcc_val >> 5) & 0x07;

    let component_index_size = if csiz < 257 { 1 } else { 2 };
    let remaining_bytes = (length.checked_sub(2 + component_index_size + 1)?) as usize;

    let mut parameters = quantization_parameters(reader, quantization_style, remaining_bytes)?;
    parameters.guard_bits = guard_bits;

    Some((component_index, parameters))
}

fn quantization_parameters(
    reader: &mut Codestream<'_>,
    quantization_style: QuantizationStyle,
    remaining_bytes: usize,
) -> Option<QuantizationInfo> {
    let mut step_sizes = Vec::new();

    let irreversible = |val: u16| {
        let exponent = val >> 11;
        let mantissa = val & ((1 << 11) - 1);

        StepSize { exponent, mantissa }
    };

    match quantization_style {
        QuantizationStyle::NoQuantization => {
            // 8 bits per band (5 bits exponent, 3 bits reserved).
            for _ in 0..remaining_bytes {
                let value = reader.get_byte()? as u16;
                step_sizes.push(StepSize {
                    // Unused.
                    mantissa: 0,
                    exponent: value >> 3,
                });
            }
        }
        QuantizationStyle::ScalarDerived => {
            let value = reader.get_word()?;
            step_sizes.push(irreversible(value));
        }
        QuantizationStyle::ScalarExpounded => {
            let num_bands = remaining_bytes / 2;
            for _ in 0..num_bands {
                let value = reader.get_word()?;

                step_sizes.push(irreversible(value));
            }
        }
    }

    Some(QuantizationInfo {
        quantization_style,
        guard_bits: 0, // Will be set by the caller.
        step_sizes,
    })
}

/// RGN marker (A.6.3). Only the implicit-ROI style (Srgn = 0) exists.
fn rgn_marker(reader: &mut Codestream<'_>, csiz: u16) -> Option<(u16, u8)> {
    let _ = reader.get_word()?;

    let component_index = if csiz < 257 {
        reader.get_byte()? as u16
    } else {
        reader.get_word()?
    };

    let style = reader.get_byte()?;
    let shift = reader.get_byte()?;

    if style != 0 {
        lwarn!("unknown ROI style {}, ignoring RGN marker", style);
        return Some((component_index, 0));
    }

    // Shifts beyond 37 cannot occur in a conforming codestream and would
    // push the magnitude range past the register width.
    if shift > 37 {
        lwarn!("implausible ROI shift {}, ignoring RGN marker", shift);
        return Some((component_index, 0));
    }

    Some((component_index, shift))
}

/// POC marker (A.6.6).
pub(crate) fn poc_marker(reader: &mut Codestream<'_>, csiz: u16) -> Option<Vec<PocRecord>> {
    let length = reader.get_word()?;

    let component_index_size = if csiz < 257 { 1 } else { 2 };
    let record_size = 5 + 2 * component_index_size;
    let num_records = (length as usize).checked_sub(2)? / record_size;

    let mut records = Vec::with_capacity(num_records);
    for _ in 0..num_records {
        let resolution_start = reader.get_byte()?;
        let component_start = if csiz < 257 {
            reader.get_byte()? as u16
        } else {
            reader.get_word()?
        };
        let layer_end = reader.get_word()?;
        let resolution_end = reader.get_byte()?;
        let component_end = if csiz < 257 {
            reader.get_byte()? as u16
        } else {
            reader.get_word()?
        };
        let order = ProgressionOrder::from_u8(reader.get_byte()?).ok()?;

        records.push(PocRecord {
            resolution_start,
            component_start,
            layer_end,
            resolution_end,
            component_end,
            order,
        });
    }

    Some(records)
}

/// Marker-segment writers, the mirror images of the parsers above.
pub(crate) mod write {
    use super::*;

    fn push_u16(out: &mut Vec<u8>, value: u16) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn push_u32(out: &mut Vec<u8>, value: u32) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn marker(out: &mut Vec<u8>, code: u8) {
        out.push(0xFF);
        out.push(code);
    }

    /// Write a marker followed by its segment, with the length field
    /// covering the body plus itself.
    fn segment(out: &mut Vec<u8>, code: u8, body: &[u8]) {
        marker(out, code);
        push_u16(out, body.len() as u16 + 2);
        out.extend_from_slice(body);
    }

    pub(crate) fn soc(out: &mut Vec<u8>) {
        marker(out, markers::SOC);
    }

    pub(crate) fn eoc(out: &mut Vec<u8>) {
        marker(out, markers::EOC);
    }

    pub(crate) fn siz(out: &mut Vec<u8>, size_data: &SizeData) {
        let mut body = Vec::new();
        // Rsiz: no restrictions; Part-15 capability lives in CAP.
        push_u16(&mut body, 0);
        push_u32(&mut body, size_data.reference_grid_width);
        push_u32(&mut body, size_data.reference_grid_height);
        push_u32(&mut body, size_data.image_area_x_offset);
        push_u32(&mut body, size_data.image_area_y_offset);
        push_u32(&mut body, size_data.tile_width);
        push_u32(&mut body, size_data.tile_height);
        push_u32(&mut body, size_data.tile_x_offset);
        push_u32(&mut body, size_data.tile_y_offset);
        push_u16(&mut body, size_data.component_sizes.len() as u16);

        for comp in &size_data.component_sizes {
            body.push((comp.precision - 1) | ((comp.is_signed as u8) << 7));
            body.push(comp.horizontal_resolution);
            body.push(comp.vertical_resolution);
        }

        segment(out, markers::SIZ, &body);
    }

    pub(crate) fn cap(out: &mut Vec<u8>, capabilities: &Capabilities) {
        let mut body = Vec::new();
        push_u32(&mut body, capabilities.pcap);
        for bit in 0..32u32 {
            if capabilities.pcap & (1 << (31 - bit)) != 0 {
                let value = if bit + 1 == 15 {
                    capabilities.ccap15
                } else {
                    0
                };
                push_u16(&mut body, value);
            }
        }

        segment(out, markers::CAP, &body);
    }

    fn coding_style_parameters(body: &mut Vec<u8>, style: &CodingStyleComponent) {
        let parameters = &style.parameters;
        body.push(parameters.num_decomposition_levels as u8);
        body.push(parameters.code_block_width - 2);
        body.push(parameters.code_block_height - 2);
        body.push(parameters.code_block_style);
        body.push(parameters.transformation.to_u8());

        if style.flags.has_precincts() {
            for (w, h) in &parameters.precinct_exponents {
                body.push(w | (h << 4));
            }
        }
    }

    pub(crate) fn cod(out: &mut Vec<u8>, cod: &CodingStyleDefault) {
        let mut body = Vec::new();
        body.push(cod.component_parameters.flags.to_u8());
        body.push(cod.progression_order.to_u8());
        push_u16(&mut body, cod.num_layers);
        body.push(cod.mct as u8);
        coding_style_parameters(&mut body, &cod.component_parameters);

        segment(out, markers::COD, &body);
    }

    pub(crate) fn qcd(out: &mut Vec<u8>, info: &QuantizationInfo) {
        let mut body = Vec::new();
        body.push(info.quantization_style.to_u8() | (info.guard_bits << 5));

        match info.quantization_style {
            QuantizationStyle::NoQuantization => {
                for step in &info.step_sizes {
                    body.push((step.exponent << 3) as u8);
                }
            }
            QuantizationStyle::ScalarDerived => {
                let step = &info.step_sizes[0];
                push_u16(&mut body, (step.exponent << 11) | step.mantissa);
            }
            QuantizationStyle::ScalarExpounded => {
                for step in &info.step_sizes {
                    push_u16(&mut body, (step.exponent << 11) | step.mantissa);
                }
            }
        }

        segment(out, markers::QCD, &body);
    }

    pub(crate) fn rgn(out: &mut Vec<u8>, component: u16, num_components: u16, shift: u8) {
        let mut body = Vec::new();
        if num_components < 257 {
            body.push(component as u8);
        } else {
            push_u16(&mut body, component);
        }
        body.push(0);
        body.push(shift);

        segment(out, markers::RGN, &body);
    }

    pub(crate) fn poc(out: &mut Vec<u8>, records: &[PocRecord], num_components: u16) {
        let mut body = Vec::new();
        for record in records {
            body.push(record.resolution_start);
            if num_components < 257 {
                body.push(record.component_start as u8);
            } else {
                push_u16(&mut body, record.component_start);
            }
            push_u16(&mut body, record.layer_end);
            body.push(record.resolution_end);
            if num_components < 257 {
                body.push(record.component_end as u8);
            } else {
                push_u16(&mut body, record.component_end);
            }
            body.push(record.order.to_u8());
        }

        segment(out, markers::POC, &body);
    }

    pub(crate) fn com(out: &mut Vec<u8>, text: &str) {
        let mut body = Vec::new();
        // Rcom = 1: Latin-1 text.
        push_u16(&mut body, 1);
        body.extend_from_slice(text.as_bytes());

        segment(out, markers::COM, &body);
    }

    /// SOT marker (A.4.2). `tile_part_length` covers the SOT marker itself
    /// through the end of the tile-part data.
    pub(crate) fn sot(
        out: &mut Vec<u8>,
        tile_index: u16,
        tile_part_length: u32,
        tile_part_index: u8,
        num_tile_parts: u8,
    ) {
        marker(out, markers::SOT);
        push_u16(out, 10);
        push_u16(out, tile_index);
        push_u32(out, tile_part_length);
        out.push(tile_part_index);
        out.push(num_tile_parts);
    }

    pub(crate) fn sod(out: &mut Vec<u8>) {
        marker(out, markers::SOD);
    }

    /// SOP marker with its 16-bit packet counter (A.8.1).
    pub(crate) fn sop(out: &mut Vec<u8>, sequence: u16) {
        marker(out, markers::SOP);
        push_u16(out, 4);
        push_u16(out, sequence);
    }

    pub(crate) fn eph(out: &mut Vec<u8>) {
        marker(out, markers::EPH);
    }
}

#[allow(unused)]
/// Marker codes (Table A.2).
pub(crate) mod markers {
    /// Start of codestream - 'SOC'.
    pub(crate) const SOC: u8 = 0x4F;
    /// Start of tile-part - 'SOT'.
    pub(crate) const SOT: u8 = 0x90;
    /// Start of data - 'SOD'.
    pub(crate) const SOD: u8 = 0x93;
    /// End of codestream - 'EOC'.
    pub(crate) const EOC: u8 = 0xD9;

    /// Image and tile size - 'SIZ'.
    pub(crate) const SIZ: u8 = 0x51;
    /// Extended capabilities - 'CAP'.
    pub(crate) const CAP: u8 = 0x50;
    /// Corresponding profile - 'CPF'.
    pub(crate) const CPF: u8 = 0x59;

    /// Coding style default - 'COD'.
    pub(crate) const COD: u8 = 0x52;
    /// Coding component - 'COC'.
    pub(crate) const COC: u8 = 0x53;
    /// Region-of-interest - 'RGN'.
    pub(crate) const RGN: u8 = 0x5E;
    /// Quantization default - 'QCD'.
    pub(crate) const QCD: u8 = 0x5C;
    /// Quantization component - 'QCC'.
    pub(crate) const QCC: u8 = 0x5D;
    /// Progression order change - 'POC'.
    pub(crate) const POC: u8 = 0x5F;

    /// Tile-part lengths - 'TLM'.
    pub(crate) const TLM: u8 = 0x55;
    /// Packet length, main header - 'PLM'.
    pub(crate) const PLM: u8 = 0x57;
    /// Packet length, tile-part header - 'PLT'.
    pub(crate) const PLT: u8 = 0x58;
    /// Packed packet headers, main header - 'PPM'.
    pub(crate) const PPM: u8 = 0x60;
    /// Packed packet headers, tile-part header - 'PPT'.
    pub(crate) const PPT: u8 = 0x61;

    /// Start of packet - 'SOP'.
    pub(crate) const SOP: u8 = 0x91;
    /// End of packet header - 'EPH'.
    pub(crate) const EPH: u8 = 0x92;

    /// Component registration - 'CRG'.
    pub(crate) const CRG: u8 = 0x63;
    /// Comment - 'COM'.
    pub(crate) const COM: u8 = 0x64;

    pub(crate) fn to_string(marker: u8) -> &'static str {
        match marker {
            // Delimiting markers.
            SOC => "SOC",
            SOT => "SOT",
            SOD => "SOD",
            EOC => "EOC",

            // Fixed information.
            SIZ => "SIZ",
            CAP => "CAP",
            CPF => "CPF",

            // Functional markers.
            COD => "COD",
            COC => "COC",
            RGN => "RGN",
            QCD => "QCD",
            QCC => "QCC",
            POC => "POC",

            // Pointer markers.
            TLM => "TLM",
            PLM => "PLM",
            PLT => "PLT",
            PPM => "PPM",
            PPT => "PPT",

            // In-bit-stream markers.
            SOP => "SOP",
            EPH => "EPH",

            // Informational markers.
            CRG => "CRG",
            COM => "COM",

            _ => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn siz_round_trip() {
        let size_data = SizeData {
            reference_grid_width: 640,
            reference_grid_height: 480,
            image_area_x_offset: 0,
            image_area_y_offset: 0,
            tile_width: 256,
            tile_height: 256,
            tile_x_offset: 0,
            tile_y_offset: 0,
            component_sizes: vec![
                ComponentSizeInfo {
                    precision: 8,
                    is_signed: false,
                    horizontal_resolution: 1,
                    vertical_resolution: 1,
                },
                ComponentSizeInfo {
                    precision: 12,
                    is_signed: true,
                    horizontal_resolution: 2,
                    vertical_resolution: 2,
                },
            ],
        };

        let mut out = Vec::new();
        write::siz(&mut out, &size_data);

        let mut reader = Codestream::over(&out);
        assert_eq!(reader.marker().unwrap(), markers::SIZ);
        let parsed = size_marker(&mut reader).unwrap();

        assert_eq!(parsed.reference_grid_width, 640);
        assert_eq!(parsed.reference_grid_height, 480);
        assert_eq!(parsed.num_tiles(), 6);
        assert_eq!(parsed.component_sizes.len(), 2);
        assert_eq!(parsed.component_sizes[1].precision, 12);
        assert!(parsed.component_sizes[1].is_signed);
        assert_eq!(parsed.component_sizes[1].horizontal_resolution, 2);
    }

    #[test]
    fn cod_round_trip() {
        let cod = CodingStyleDefault {
            progression_order: ProgressionOrder::ResolutionPositionComponentLayer,
            num_layers: 3,
            mct: true,
            component_parameters: CodingStyleComponent {
                flags: CodingStyleFlags::new(true, true, false),
                parameters: CodingStyleParameters {
                    num_decomposition_levels: 5,
                    num_resolution_levels: 6,
                    code_block_width: 6,
                    code_block_height: 6,
                    code_block_style: 0,
                    transformation: WaveletTransform::Reversible53,
                    precinct_exponents: vec![(15, 15); 6],
                },
            },
        };

        let mut out = Vec::new();
        write::cod(&mut out, &cod);

        let mut reader = Codestream::over(&out);
        assert_eq!(reader.marker().unwrap(), markers::COD);
        let parsed = cod_marker(&mut reader).unwrap();

        assert_eq!(
            parsed.progression_order,
            ProgressionOrder::ResolutionPositionComponentLayer
        );
        assert_eq!(parsed.num_layers, 3);
        assert!(parsed.mct);
        assert!(parsed.component_parameters.flags.may_use_sop_markers());
        assert!(!parsed.component_parameters.flags.uses_eph_marker());
        assert_eq!(parsed.component_parameters.parameters.code_block_width, 6);
        assert_eq!(
            parsed.component_parameters.parameters.transformation,
            WaveletTransform::Reversible53
        );
        assert_eq!(
            parsed.component_parameters.parameters.precinct_exponents,
            vec![(15, 15); 6]
        );
    }

    #[test]
    fn cap_round_trip() {
        let capabilities = Capabilities {
            pcap: 1 << (32 - 15),
            ccap15: 0,
        };

        let mut out = Vec::new();
        write::cap(&mut out, &capabilities);

        let mut reader = Codestream::over(&out);
        assert_eq!(reader.marker().unwrap(), markers::CAP);
        let parsed = cap_marker(&mut reader).unwrap();

        assert!(parsed.uses_ht());
        assert!(!parsed.ht_mixed());
    }

    #[test]
    fn qcd_round_trip() {
        let info = QuantizationInfo {
            quantization_style: QuantizationStyle::ScalarExpounded,
            guard_bits: 2,
            step_sizes: vec![
                StepSize {
                    exponent: 10,
                    mantissa: 0,
                },
                StepSize {
                    exponent: 11,
                    mantissa: 1024,
                },
            ],
        };

        let mut out = Vec::new();
        write::qcd(&mut out, &info);

        let mut reader = Codestream::over(&out);
        assert_eq!(reader.marker().unwrap(), markers::QCD);
        let parsed = qcd_marker(&mut reader).unwrap();

        assert_eq!(parsed.quantization_style, QuantizationStyle::ScalarExpounded);
        assert_eq!(parsed.guard_bits, 2);
        assert_eq!(parsed.step_sizes.len(), 2);
        assert_eq!(parsed.step_sizes[1].exponent, 11);
        assert_eq!(parsed.step_sizes[1].mantissa, 1024);
    }

    #[test]
    fn poc_round_trip() {
        let records = vec![
            PocRecord {
                resolution_start: 0,
                component_start: 0,
                layer_end: 1,
                resolution_end: 2,
                component_end: 3,
                order: ProgressionOrder::LayerResolutionComponentPosition,
            },
            PocRecord {
                resolution_start: 2,
                component_start: 0,
                layer_end: 1,
                resolution_end: 6,
                component_end: 3,
                order: ProgressionOrder::ComponentPositionResolutionLayer,
            },
        ];

        let mut out = Vec::new();
        write::poc(&mut out, &records, 3);

        let mut reader = Codestream::over(&out);
        assert_eq!(reader.marker().unwrap(), markers::POC);
        let parsed = poc_marker(&mut reader, 3).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].resolution_start, 2);
        assert_eq!(parsed[1].resolution_end, 6);
        assert_eq!(
            parsed[1].order,
            ProgressionOrder::ComponentPositionResolutionLayer
        );
    }
}
