//! Caller-facing configuration for encoding and decoding.

use crate::codestream::{CodeBlockMode, ProgressionOrder, WaveletTransform};
use crate::error::{ErrorKind, Result, bail};
use crate::image::Image;

/// The wavelet filter pair to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transformation {
    /// The irreversible 9/7 filter (lossy path).
    Irreversible97,
    /// The reversible 5/3 filter (lossless path).
    #[default]
    Reversible53,
}

impl Transformation {
    pub(crate) fn wavelet(self) -> WaveletTransform {
        match self {
            Self::Irreversible97 => WaveletTransform::Irreversible97,
            Self::Reversible53 => WaveletTransform::Reversible53,
        }
    }
}

/// The packet progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Progression {
    /// Layer, resolution, component, position.
    #[default]
    Lrcp,
    /// Resolution, layer, component, position.
    Rlcp,
    /// Resolution, position, component, layer.
    Rpcl,
    /// Position, component, resolution, layer.
    Pcrl,
    /// Component, position, resolution, layer.
    Cprl,
}

impl Progression {
    pub(crate) fn order(self) -> ProgressionOrder {
        match self {
            Self::Lrcp => ProgressionOrder::LayerResolutionComponentPosition,
            Self::Rlcp => ProgressionOrder::ResolutionLayerComponentPosition,
            Self::Rpcl => ProgressionOrder::ResolutionPositionComponentLayer,
            Self::Pcrl => ProgressionOrder::PositionComponentResolutionLayer,
            Self::Cprl => ProgressionOrder::ComponentPositionResolutionLayer,
        }
    }
}

/// One progression-order change: a sub-range of (layer, resolution,
/// component) tuples walked in its own order before the default
/// progression resumes.
#[derive(Debug, Clone, Copy)]
pub struct ProgressionChange {
    /// First resolution level covered by this record.
    pub resolution_start: u8,
    /// One past the last resolution level.
    pub resolution_end: u8,
    /// First component covered by this record.
    pub component_start: u16,
    /// One past the last component.
    pub component_end: u16,
    /// One past the last layer.
    pub layer_end: u16,
    pub progression: Progression,
}

bitflags::bitflags! {
    /// Optional code-block coding style flags (Table A.19). The encoder
    /// always produces HT codeblocks; these flags tune the surrounding
    /// behaviour.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CodeBlockStyle: u8 {
        const BYPASS = 0x01;
        const RESET = 0x02;
        const RESTART = 0x04;
        const CAUSAL = 0x08;
        const SEGMARK = 0x20;
    }
}

/// Encoder configuration.
#[derive(Debug, Clone)]
pub struct EncoderParams {
    /// Nominal codeblock width; a power of two in {4, ..., 64}.
    pub code_block_width: u32,
    /// Nominal codeblock height; a power of two in {4, ..., 64}.
    pub code_block_height: u32,
    /// Per-resolution precinct size exponents (log2 width, log2 height).
    /// Empty means maximal precincts (15, 15) everywhere.
    pub precinct_sizes: Vec<(u8, u8)>,
    /// Number of DWT decomposition levels, 0 to 32.
    pub num_decompositions: u16,
    /// Apply the multi-component transform to the first three components.
    pub mct: bool,
    pub transformation: Transformation,
    pub progression: Progression,
    /// Progression-order changes, signalled through a POC marker. Packets
    /// not covered by any record follow `progression`.
    pub progression_changes: Vec<ProgressionChange>,
    /// Number of quality layers, at least 1.
    pub num_layers: u16,
    pub code_block_style: CodeBlockStyle,
    pub use_sop: bool,
    pub use_eph: bool,
    /// Per-component ROI up-shift; empty means no ROI.
    pub roi_shifts: Vec<u8>,
    /// Tile size on the reference grid; `None` makes one tile of the
    /// whole image.
    pub tile_size: Option<(u32, u32)>,
    pub tile_origin: (u32, u32),
    pub image_origin: (u32, u32),
    /// Quantizer guard bits, 1 to 7.
    pub guard_bits: u8,
}

impl Default for EncoderParams {
    fn default() -> Self {
        Self {
            code_block_width: 64,
            code_block_height: 64,
            precinct_sizes: Vec::new(),
            num_decompositions: 5,
            mct: false,
            transformation: Transformation::default(),
            progression: Progression::default(),
            progression_changes: Vec::new(),
            num_layers: 1,
            code_block_style: CodeBlockStyle::empty(),
            use_sop: false,
            use_eph: false,
            roi_shifts: Vec::new(),
            tile_size: None,
            tile_origin: (0, 0),
            image_origin: (0, 0),
            guard_bits: 2,
        }
    }
}

impl EncoderParams {
    pub(crate) fn validate(&self, image: &Image) -> Result<()> {
        for side in [self.code_block_width, self.code_block_height] {
            if !side.is_power_of_two() || !(4..=64).contains(&side) {
                bail!(ErrorKind::InvalidParameter(
                    "codeblock sides must be powers of two in [4, 64]"
                ));
            }
        }
        if self.code_block_width * self.code_block_height > 4096 {
            bail!(ErrorKind::InvalidParameter("codeblock area above 4096"));
        }

        if self.num_decompositions > 32 {
            bail!(ErrorKind::InvalidParameter("more than 32 DWT levels"));
        }

        for (w, h) in &self.precinct_sizes {
            if *w > 15 || *h > 15 {
                bail!(ErrorKind::InvalidParameter(
                    "precinct exponents must be at most 15"
                ));
            }
            // Codeblocks must fit into the precincts of every resolution.
            if (1u32 << w) < self.code_block_width || (1u32 << h) < self.code_block_height {
                bail!(ErrorKind::InvalidParameter(
                    "precincts smaller than the codeblock size"
                ));
            }
        }

        if self.num_layers == 0 {
            bail!(ErrorKind::InvalidParameter("at least one layer is required"));
        }

        for change in &self.progression_changes {
            if change.resolution_end <= change.resolution_start
                || change.component_end <= change.component_start
                || change.layer_end == 0
            {
                bail!(ErrorKind::InvalidParameter(
                    "empty progression-change range"
                ));
            }
        }

        if !(1..=7).contains(&self.guard_bits) {
            bail!(ErrorKind::InvalidParameter("guard bits outside [1, 7]"));
        }

        if self.mct {
            if image.components.len() < 3 {
                bail!(ErrorKind::InvalidParameter(
                    "MCT requires at least three components"
                ));
            }

            let first = &image.components[0];
            if image.components[..3]
                .iter()
                .any(|c| c.dx != first.dx || c.dy != first.dy || c.precision != first.precision)
            {
                bail!(ErrorKind::InvalidParameter(
                    "MCT requires matching component geometry"
                ));
            }
        }

        if !self.roi_shifts.is_empty() && self.roi_shifts.len() != image.components.len() {
            bail!(ErrorKind::InvalidParameter(
                "ROI shifts must cover every component"
            ));
        }

        if let Some((w, h)) = self.tile_size {
            if w == 0 || h == 0 {
                bail!(ErrorKind::InvalidParameter("empty tile size"));
            }
        }

        Ok(())
    }

    /// The precinct exponents actually signalled for each resolution.
    pub(crate) fn precinct_exponents(&self) -> Vec<(u8, u8)> {
        if self.precinct_sizes.is_empty() {
            vec![(15, 15); self.num_decompositions as usize + 1]
        } else {
            let mut exponents = self.precinct_sizes.clone();
            exponents.resize(
                self.num_decompositions as usize + 1,
                *exponents.last().unwrap_or(&(15, 15)),
            );
            exponents
        }
    }

    pub(crate) fn code_block_mode(&self) -> CodeBlockMode {
        CodeBlockMode::from_style_byte(self.code_block_style.bits()) | CodeBlockMode::HT
    }
}

/// Decoder configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderParams {
    /// Fail on recoverable inconsistencies instead of warning. Without
    /// strict mode a damaged tile is abandoned and the composite image
    /// keeps its previous content in that region.
    pub strict: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_validate() {
        let image = Image::new(64, 64, 3, 8, false);
        assert!(EncoderParams::default().validate(&image).is_ok());
    }

    #[test]
    fn out_of_range_params_are_rejected() {
        let image = Image::new(64, 64, 1, 8, false);

        let mut params = EncoderParams::default();
        params.code_block_width = 128;
        assert!(params.validate(&image).is_err());

        let mut params = EncoderParams::default();
        params.code_block_width = 64;
        params.code_block_height = 128;
        assert!(params.validate(&image).is_err());

        let mut params = EncoderParams::default();
        params.num_decompositions = 33;
        assert!(params.validate(&image).is_err());

        let mut params = EncoderParams::default();
        params.num_layers = 0;
        assert!(params.validate(&image).is_err());

        let mut params = EncoderParams::default();
        params.mct = true;
        assert!(params.validate(&image).is_err());

        let mut params = EncoderParams::default();
        params.precinct_sizes = vec![(3, 3)];
        assert!(params.validate(&image).is_err());
    }
}
