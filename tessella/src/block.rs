//! The codeblock entity and the block-coder dispatch.

use crate::codestream::CodeBlockMode;
use crate::error::Result;
use crate::quant::BandParams;
use crate::rect::Region;
use smallvec::SmallVec;

/// The unit of entropy coding: one rectangle of quantized coefficients
/// together with its compressed bytes and packet-layer bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct CodeBlock {
    pub(crate) rect: Region,
    /// Position of this codeblock on the precinct-subband grid.
    pub(crate) x_idx: u32,
    pub(crate) y_idx: u32,
    /// Sample buffer: quantized coefficients in two's complement. The
    /// encoder reads them; the decoder fills them.
    pub(crate) samples: Vec<i32>,
    /// The compressed bytes of all coding passes, in pass order.
    pub(crate) compressed: Vec<u8>,
    /// Byte length of each coding pass (or pass segment on the decode
    /// side).
    pub(crate) pass_lengths: SmallVec<[u32; 3]>,
    /// Number of passes contributed by each quality layer.
    pub(crate) layer_passes: Vec<u8>,
    /// Cumulative pass count at the start of each layer.
    pub(crate) layer_start: Vec<u8>,
    pub(crate) num_passes: u32,
    /// Signalled zero bit-planes.
    pub(crate) num_zbp: u8,
    /// Length-indicator state, monotone non-decreasing, initially 3.
    pub(crate) lblock: u32,
    pub(crate) modes: CodeBlockMode,
    /// Whether a previous layer already included this codeblock.
    pub(crate) included: bool,
    /// Passes that belong to empty HT sets and precede the next real
    /// cleanup pass.
    pub(crate) fast_skip_passes: u32,
}

impl CodeBlock {
    pub(crate) fn new(rect: Region, x_idx: u32, y_idx: u32, num_layers: u16, modes: CodeBlockMode) -> Self {
        Self {
            rect,
            x_idx,
            y_idx,
            samples: Vec::new(),
            compressed: Vec::new(),
            pass_lengths: SmallVec::new(),
            layer_passes: vec![0; num_layers as usize],
            layer_start: vec![0; num_layers as usize],
            num_passes: 0,
            num_zbp: 0,
            lblock: 3,
            modes,
            included: false,
            fast_skip_passes: 0,
        }
    }

    /// Total number of compressed bytes across all passes.
    pub(crate) fn total_length(&self) -> usize {
        self.pass_lengths.iter().map(|l| *l as usize).sum()
    }
}

/// The capability set shared by the Part-1 and Part-15 block coders.
pub(crate) trait BlockCoder {
    /// Entropy-code `block.samples` into its compressed buffer, filling in
    /// the pass metadata.
    fn encode(&self, block: &mut CodeBlock, params: &BandParams) -> Result<()>;

    /// Reconstruct `block.samples` from the compressed passes.
    fn decode(&self, block: &mut CodeBlock, params: &BandParams) -> Result<()>;

    fn max_block_width(&self) -> u32;
    fn max_block_height(&self) -> u32;
}

/// Pick the coder variant a codeblock's mode mask asks for.
pub(crate) fn coder_for(modes: CodeBlockMode) -> &'static dyn BlockCoder {
    if modes.contains(CodeBlockMode::HT) {
        &crate::ht::HtCoder
    } else {
        &crate::bitplane::Part1Coder
    }
}
