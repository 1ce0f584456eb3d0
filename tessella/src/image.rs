//! The image composite layer: planar component buffers, their metadata,
//! and the assembly of decoded tiles into destination planes.

use crate::error::{ErrorKind, Result, bail};
use crate::log::lwarn;
use crate::rect::Region;

/// Sample planes are padded to this many samples per row so that rows stay
/// aligned for vectorised consumers.
const STRIDE_ALIGN: u32 = 16;

/// Profiles beyond this size are dropped with a warning.
const MAX_ICC_PROFILE_LEN: usize = 255 * 1024 * 1024;

/// One image component: a dense row-major plane of i32 samples holding
/// `precision` significant bits.
#[derive(Debug, Clone)]
pub struct Component {
    /// Horizontal sub-sampling factor on the reference grid.
    pub dx: u8,
    /// Vertical sub-sampling factor on the reference grid.
    pub dy: u8,
    /// Bit precision, 1 to 38.
    pub precision: u8,
    /// Whether samples are signed.
    pub signed: bool,
    pub width: u32,
    pub height: u32,
    /// Samples per row; at least `width`.
    pub stride: u32,
    pub data: Vec<i32>,
}

impl Component {
    pub fn new(width: u32, height: u32, dx: u8, dy: u8, precision: u8, signed: bool) -> Self {
        let stride = width.next_multiple_of(STRIDE_ALIGN);
        Self {
            dx,
            dy,
            precision,
            signed,
            width,
            height,
            stride,
            data: vec![0; (stride * height) as usize],
        }
    }

    #[inline]
    pub fn row(&self, y: u32) -> &[i32] {
        &self.data[(y * self.stride) as usize..][..self.width as usize]
    }

    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [i32] {
        &mut self.data[(y * self.stride) as usize..][..self.width as usize]
    }

    /// Copy a decoded tile-component rectangle into this plane. `rect` is
    /// in this component's own coordinates, relative to the image origin.
    pub(crate) fn composite(&mut self, rect: Region, samples: &[i32]) {
        debug_assert_eq!(samples.len(), rect.area());

        for (row_idx, source_row) in samples.chunks_exact(rect.width() as usize).enumerate() {
            let y = rect.y0 + row_idx as u32;
            if y >= self.height {
                break;
            }

            let width = usize::min(source_row.len(), (self.width - rect.x0) as usize);
            self.row_mut(y)[rect.x0 as usize..rect.x0 as usize + width]
                .copy_from_slice(&source_row[..width]);
        }
    }

    /// Replicate the decimated plane up to the 1:1 reference grid.
    pub fn upsample(&self) -> Component {
        if self.dx == 1 && self.dy == 1 {
            return self.clone();
        }

        let mut out = Component::new(
            self.width * self.dx as u32,
            self.height * self.dy as u32,
            1,
            1,
            self.precision,
            self.signed,
        );

        for y in 0..out.height {
            let source_row = self.row(u32::min(y / self.dy as u32, self.height - 1));
            let target_row = out.row_mut(y);

            for (x, target) in target_row.iter_mut().enumerate() {
                *target = source_row[usize::min(x / self.dx as usize, source_row.len() - 1)];
            }
        }

        out
    }
}

/// The colour interpretation of the components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    Srgb,
    Gray,
    Ycbcr,
    EYcbcr,
    Cmyk,
    CieLab,
    Icc,
    #[default]
    Unknown,
}

/// A rational resolution in pixels per metre: `num / den * 10^exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionRatio {
    pub numerator: u16,
    pub denominator: u16,
    pub exponent: i8,
}

/// Channel semantics from a channel-definition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Color,
    Opacity,
    PremultipliedOpacity,
    Unspecified,
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelDefinition {
    /// The channel index the definition applies to.
    pub channel: u16,
    pub channel_type: ChannelType,
    /// The colour this channel is associated with (0 = whole image).
    pub association: u16,
}

/// A palette together with its component-mapping entries.
#[derive(Debug, Clone, Default)]
pub struct Palette {
    /// One column per output channel; each column holds the LUT values.
    pub columns: Vec<Vec<i32>>,
    /// (source component, mapping kind, palette column) triples.
    pub mapping: Vec<ComponentMapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentMapping {
    pub component: u16,
    /// 0 = direct use, 1 = palette mapping.
    pub mapping_type: u8,
    pub palette_column: u8,
}

/// Metadata attached to an image, outside the codestream itself.
#[derive(Debug, Clone, Default)]
pub struct ImageMetadata {
    pub color_space: ColorSpace,
    pub icc_profile: Option<Vec<u8>>,
    pub capture_resolution: Option<(ResolutionRatio, ResolutionRatio)>,
    pub display_resolution: Option<(ResolutionRatio, ResolutionRatio)>,
    pub channel_definitions: Vec<ChannelDefinition>,
    pub palette: Option<Palette>,
    /// Opaque XML / IPTC / vendor blobs carried alongside the image.
    pub blobs: Vec<Vec<u8>>,
}

impl ImageMetadata {
    /// Attach an ICC profile, dropping oversized ones with a warning.
    pub fn set_icc_profile(&mut self, profile: Vec<u8>) {
        if profile.len() > MAX_ICC_PROFILE_LEN {
            lwarn!(
                "ignoring ICC profile of {} bytes (maximum is {})",
                profile.len(),
                MAX_ICC_PROFILE_LEN
            );
            return;
        }

        self.icc_profile = Some(profile);
    }

    /// Validate the palette / mapping / channel-definition triple.
    pub(crate) fn validate(&self, num_components: u16) -> Result<()> {
        let mut seen_channels = Vec::new();
        for definition in &self.channel_definitions {
            if seen_channels.contains(&definition.channel) {
                bail!(ErrorKind::ColorInvariant("duplicate channel definition"));
            }
            seen_channels.push(definition.channel);
        }

        if let Some(palette) = &self.palette {
            if palette.columns.is_empty() {
                bail!(ErrorKind::ColorInvariant("palette without columns"));
            }

            let mut seen = Vec::new();
            for mapping in &palette.mapping {
                if mapping.component >= num_components {
                    bail!(ErrorKind::ColorInvariant(
                        "component mapping references a missing component"
                    ));
                }

                if mapping.mapping_type == 1
                    && mapping.palette_column as usize >= palette.columns.len()
                {
                    bail!(ErrorKind::ColorInvariant(
                        "component mapping references a missing palette column"
                    ));
                }

                let key = (mapping.component, mapping.palette_column);
                if mapping.mapping_type == 1 && seen.contains(&key) {
                    bail!(ErrorKind::ColorInvariant("duplicate component mapping"));
                }
                seen.push(key);
            }
        }

        Ok(())
    }
}

/// A decoded or to-be-encoded image: a rectangle on the reference grid and
/// an ordered sequence of components.
#[derive(Debug, Clone)]
pub struct Image {
    /// Image area width on the reference grid.
    pub width: u32,
    /// Image area height on the reference grid.
    pub height: u32,
    /// Reference grid offset of the image area.
    pub x_offset: u32,
    pub y_offset: u32,
    pub components: Vec<Component>,
    pub metadata: ImageMetadata,
}

impl Image {
    /// Create an image whose components all share the full grid.
    pub fn new(width: u32, height: u32, num_components: u16, precision: u8, signed: bool) -> Self {
        Self {
            width,
            height,
            x_offset: 0,
            y_offset: 0,
            components: (0..num_components)
                .map(|_| Component::new(width, height, 1, 1, precision, signed))
                .collect(),
            metadata: ImageMetadata::default(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.components.is_empty() {
            bail!(ErrorKind::InvalidParameter("image without components"));
        }

        for component in &self.components {
            if component.precision == 0 || component.precision > 38 {
                bail!(ErrorKind::InvalidParameter(
                    "component precision outside [1, 38]"
                ));
            }
            if component.dx == 0 || component.dy == 0 {
                bail!(ErrorKind::InvalidParameter("zero sub-sampling factor"));
            }
            if component.stride < component.width {
                bail!(ErrorKind::InvalidParameter("stride below component width"));
            }
            if component.data.len() < (component.stride * component.height) as usize {
                bail!(ErrorKind::ResourceExhausted("component plane too small"));
            }
        }

        self.metadata.validate(self.components.len() as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_places_tiles() {
        let mut component = Component::new(8, 8, 1, 1, 8, false);

        let tile = vec![7i32; 16];
        component.composite(Region::new(4, 4, 8, 8), &tile);

        assert_eq!(component.row(3)[4], 0);
        assert_eq!(component.row(4)[3], 0);
        assert_eq!(component.row(4)[4], 7);
        assert_eq!(component.row(7)[7], 7);
    }

    #[test]
    fn upsample_replicates() {
        let mut component = Component::new(2, 2, 2, 2, 8, false);
        component.row_mut(0).copy_from_slice(&[1, 2]);
        component.row_mut(1).copy_from_slice(&[3, 4]);

        let up = component.upsample();
        assert_eq!(up.width, 4);
        assert_eq!(up.height, 4);
        assert_eq!(up.row(0), &[1, 1, 2, 2]);
        assert_eq!(up.row(1), &[1, 1, 2, 2]);
        assert_eq!(up.row(2), &[3, 3, 4, 4]);
        assert_eq!(up.row(3), &[3, 3, 4, 4]);
    }

    #[test]
    fn oversized_icc_profile_is_dropped() {
        let mut metadata = ImageMetadata::default();
        metadata.set_icc_profile(vec![0; MAX_ICC_PROFILE_LEN + 1]);
        assert!(metadata.icc_profile.is_none());

        metadata.set_icc_profile(vec![0; 64]);
        assert!(metadata.icc_profile.is_some());
    }

    #[test]
    fn metadata_invariants() {
        let mut metadata = ImageMetadata::default();
        metadata.channel_definitions = vec![
            ChannelDefinition {
                channel: 0,
                channel_type: ChannelType::Color,
                association: 1,
            },
            ChannelDefinition {
                channel: 0,
                channel_type: ChannelType::Opacity,
                association: 0,
            },
        ];
        assert!(metadata.validate(3).is_err());

        let mut metadata = ImageMetadata::default();
        metadata.palette = Some(Palette {
            columns: vec![vec![0, 1, 2]],
            mapping: vec![ComponentMapping {
                component: 5,
                mapping_type: 1,
                palette_column: 0,
            }],
        });
        assert!(metadata.validate(3).is_err());

        let mut metadata = ImageMetadata::default();
        metadata.palette = Some(Palette {
            columns: vec![vec![0, 1, 2]],
            mapping: vec![ComponentMapping {
                component: 0,
                mapping_type: 1,
                palette_column: 0,
            }],
        });
        assert!(metadata.validate(3).is_ok());
    }
}
