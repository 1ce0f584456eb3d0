//! The forward discrete wavelet transform.
//!
//! Both filters run as integer lifting on the reference-grid parity: even
//! absolute positions carry the low-pass samples, odd positions the
//! high-pass samples. The irreversible 9/7 filter uses the 16-bit
//! fixed-point lifting coefficients; the K/1/K normalisation steps are
//! folded into the quantiser, so analysis is four lifting steps only.
//!
//! Boundary handling is periodic-symmetric extension (PSEo): every lifting
//! step reads neighbours through the mirror, which keeps forward and
//! inverse transforms exact integer mirrors of each other.

use crate::codestream::WaveletTransform;
use crate::rect::Region;

/// 9/7 lifting step coefficients as (multiplier, offset, shift).
pub(crate) const STEP_A: (i64, i64, u32) = (-25987, 8192, 14);
pub(crate) const STEP_B: (i64, i64, u32) = (-3472, 32767, 16);
pub(crate) const STEP_C: (i64, i64, u32) = (28931, 16384, 15);
pub(crate) const STEP_D: (i64, i64, u32) = (29066, 32767, 16);

/// Scale factors for rows or columns that hold a single sample.
pub(crate) const SINGLE_LOW: f32 = 0.8128931;
pub(crate) const SINGLE_HIGH: f32 = 1.2301741;

/// One sub-band (or LL) buffer together with the region it covers.
#[derive(Debug, Clone)]
pub(crate) struct Band {
    pub(crate) rect: Region,
    pub(crate) data: Vec<i32>,
}

impl Band {
    pub(crate) fn zeroed(rect: Region) -> Self {
        Self {
            data: vec![0; rect.area()],
            rect,
        }
    }

    #[inline]
    pub(crate) fn at(&self, x: u32, y: u32) -> i32 {
        self.data[((y - self.rect.y0) * self.rect.width() + (x - self.rect.x0)) as usize]
    }

    #[inline]
    pub(crate) fn set(&mut self, x: u32, y: u32, value: i32) {
        self.data[((y - self.rect.y0) * self.rect.width() + (x - self.rect.x0)) as usize] = value;
    }
}

/// The rectangle a child band occupies after one decomposition (B-15,
/// applied for a single level).
pub(crate) fn child_rect(rect: Region, xob: u32, yob: u32) -> Region {
    Region::new(
        rect.x0.saturating_sub(xob).div_ceil(2),
        rect.y0.saturating_sub(yob).div_ceil(2),
        rect.x1.saturating_sub(xob).div_ceil(2),
        rect.y1.saturating_sub(yob).div_ceil(2),
    )
}

/// Mirror `idx` back into [i0, i1), as specified in Equation (F-4). The
/// mirror preserves parity, so a lifting step never reads samples of the
/// parity it is updating.
#[inline]
pub(crate) fn periodic_symmetric_extension(idx: i64, i0: i64, i1: i64) -> i64 {
    let span = 2 * (i1 - i0 - 1);
    if span == 0 {
        return i0;
    }

    let offset = (idx - i0).rem_euclid(span);
    i0 + offset.min(span - offset)
}

#[inline]
fn fixed_step(sum: i64, (mult, offset, shift): (i64, i64, u32)) -> i32 {
    ((mult * sum + offset) >> shift) as i32
}

/// Apply one lifting step to all samples of `parity` inside [i0, i1),
/// reading neighbours through the symmetric extension.
fn lift(line: &mut [i32], i0: u32, i1: u32, parity: u32, step: impl Fn(i64) -> i32, forward: bool) {
    let (i0, i1) = (i0 as i64, i1 as i64);

    let mut n = i0 + ((parity as i64) ^ (i0 & 1)).rem_euclid(2);
    while n < i1 {
        let left = line[(periodic_symmetric_extension(n - 1, i0, i1) - i0) as usize] as i64;
        let right = line[(periodic_symmetric_extension(n + 1, i0, i1) - i0) as usize] as i64;

        let delta = step(left + right);
        let target = &mut line[(n - i0) as usize];
        if forward {
            *target += delta;
        } else {
            *target -= delta;
        }

        n += 2;
    }
}

/// Forward-transform one line covering absolute positions [i0, i1).
pub(crate) fn forward_1d(line: &mut [i32], i0: u32, i1: u32, transform: WaveletTransform) {
    debug_assert_eq!(line.len(), (i1 - i0) as usize);

    if i1 - i0 == 1 {
        match transform {
            WaveletTransform::Reversible53 => {
                if i0 % 2 == 1 {
                    line[0] <<= 1;
                }
            }
            WaveletTransform::Irreversible97 => {
                let factor = if i0 % 2 == 0 { SINGLE_LOW } else { SINGLE_HIGH };
                line[0] = (line[0] as f32 * factor).round() as i32;
            }
        }
        return;
    }

    match transform {
        WaveletTransform::Reversible53 => {
            lift(line, i0, i1, 1, |sum| (sum >> 1) as i32, false);
            lift(line, i0, i1, 0, |sum| ((sum + 2) >> 2) as i32, true);
        }
        WaveletTransform::Irreversible97 => {
            lift(line, i0, i1, 1, |sum| fixed_step(sum, STEP_A), true);
            lift(line, i0, i1, 0, |sum| fixed_step(sum, STEP_B), true);
            lift(line, i0, i1, 1, |sum| fixed_step(sum, STEP_C), true);
            lift(line, i0, i1, 0, |sum| fixed_step(sum, STEP_D), true);
        }
    }
}

/// Inverse-transform one line covering absolute positions [i0, i1). The
/// exact mirror of [`forward_1d`].
pub(crate) fn inverse_1d(line: &mut [i32], i0: u32, i1: u32, transform: WaveletTransform) {
    debug_assert_eq!(line.len(), (i1 - i0) as usize);

    if i1 - i0 == 1 {
        match transform {
            WaveletTransform::Reversible53 => {
                if i0 % 2 == 1 {
                    line[0] >>= 1;
                }
            }
            WaveletTransform::Irreversible97 => {
                let factor = if i0 % 2 == 0 { SINGLE_LOW } else { SINGLE_HIGH };
                line[0] = (line[0] as f32 / factor).round() as i32;
            }
        }
        return;
    }

    match transform {
        WaveletTransform::Reversible53 => {
            lift(line, i0, i1, 0, |sum| ((sum + 2) >> 2) as i32, false);
            lift(line, i0, i1, 1, |sum| (sum >> 1) as i32, true);
        }
        WaveletTransform::Irreversible97 => {
            lift(line, i0, i1, 0, |sum| fixed_step(sum, STEP_D), false);
            lift(line, i0, i1, 1, |sum| fixed_step(sum, STEP_C), false);
            lift(line, i0, i1, 0, |sum| fixed_step(sum, STEP_B), false);
            lift(line, i0, i1, 1, |sum| fixed_step(sum, STEP_A), false);
        }
    }
}

/// Perform one forward decomposition level: filter vertically, then
/// horizontally, then deinterleave the result into LL, HL, LH and HH by
/// sample parity. Returns the bands in that order.
pub(crate) fn forward_level(input: &Band, transform: WaveletTransform) -> [Band; 4] {
    let rect = input.rect;
    let mut work = input.clone();

    if !rect.is_empty() {
        // Vertical pass over every column.
        let mut column = Vec::with_capacity(rect.height() as usize);
        for x in rect.x0..rect.x1 {
            column.clear();
            for y in rect.y0..rect.y1 {
                column.push(work.at(x, y));
            }

            forward_1d(&mut column, rect.y0, rect.y1, transform);

            for (y, value) in (rect.y0..rect.y1).zip(column.iter()) {
                work.set(x, y, *value);
            }
        }

        // Horizontal pass over every row.
        let width = rect.width() as usize;
        for row in work.data.chunks_exact_mut(width) {
            forward_1d(row, rect.x0, rect.x1, transform);
        }
    }

    let mut bands = [
        Band::zeroed(child_rect(rect, 0, 0)),
        Band::zeroed(child_rect(rect, 1, 0)),
        Band::zeroed(child_rect(rect, 0, 1)),
        Band::zeroed(child_rect(rect, 1, 1)),
    ];

    for y in rect.y0..rect.y1 {
        for x in rect.x0..rect.x1 {
            let value = work.at(x, y);
            let band = match (x % 2, y % 2) {
                (0, 0) => &mut bands[0],
                (1, 0) => &mut bands[1],
                (0, 1) => &mut bands[2],
                _ => &mut bands[3],
            };

            band.set(x / 2, y / 2, value);
        }
    }

    bands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idwt;

    fn ramp(rect: Region) -> Band {
        let mut band = Band::zeroed(rect);
        for y in rect.y0..rect.y1 {
            for x in rect.x0..rect.x1 {
                band.set(x, y, (x as i32 * 31 + y as i32 * 17) % 255 - 127);
            }
        }
        band
    }

    #[test]
    fn pse() {
        assert_eq!(periodic_symmetric_extension(0, 3, 6), 4);
        assert_eq!(periodic_symmetric_extension(1, 3, 6), 5);
        assert_eq!(periodic_symmetric_extension(2, 3, 6), 4);
        assert_eq!(periodic_symmetric_extension(3, 3, 6), 3);
        assert_eq!(periodic_symmetric_extension(4, 3, 6), 4);
        assert_eq!(periodic_symmetric_extension(5, 3, 6), 5);
        assert_eq!(periodic_symmetric_extension(6, 3, 6), 4);
        assert_eq!(periodic_symmetric_extension(7, 3, 6), 3);
        assert_eq!(periodic_symmetric_extension(8, 3, 6), 4);
        assert_eq!(periodic_symmetric_extension(9, 3, 6), 5);
    }

    #[test]
    fn constant_input_decomposes_cleanly_53() {
        let rect = Region::new(0, 0, 8, 8);
        let mut band = Band::zeroed(rect);
        band.data.fill(42);

        let [ll, hl, lh, hh] = forward_level(&band, WaveletTransform::Reversible53);

        assert!(ll.data.iter().all(|v| *v == 42));
        assert!(hl.data.iter().all(|v| *v == 0));
        assert!(lh.data.iter().all(|v| *v == 0));
        assert!(hh.data.iter().all(|v| *v == 0));
    }

    #[test]
    fn zero_input_stays_zero() {
        for transform in [
            WaveletTransform::Reversible53,
            WaveletTransform::Irreversible97,
        ] {
            let rect = Region::new(3, 5, 12, 11);
            let band = Band::zeroed(rect);

            let bands = forward_level(&band, transform);
            for band in bands {
                assert!(band.data.iter().all(|v| *v == 0));
            }
        }
    }

    #[test]
    fn round_trip_is_exact() {
        for transform in [
            WaveletTransform::Reversible53,
            WaveletTransform::Irreversible97,
        ] {
            // Odd origins exercise the parity handling.
            for rect in [
                Region::new(0, 0, 16, 16),
                Region::new(3, 1, 18, 12),
                Region::new(7, 7, 8, 13),
                Region::new(2, 9, 13, 10),
            ] {
                let input = ramp(rect);

                let [ll, hl, lh, hh] = forward_level(&input, transform);
                let restored = idwt::inverse_level(&ll, [&hl, &lh, &hh], rect, transform);

                assert_eq!(restored.data, input.data, "transform {transform:?} {rect:?}");
            }
        }
    }

    #[test]
    fn single_line_round_trip_53() {
        let rect = Region::new(4, 2, 12, 3);
        let input = ramp(rect);

        let [ll, hl, lh, hh] = forward_level(&input, WaveletTransform::Reversible53);
        assert_eq!(lh.rect.area(), 0);
        assert_eq!(hh.rect.area(), 0);

        let restored =
            idwt::inverse_level(&ll, [&hl, &lh, &hh], rect, WaveletTransform::Reversible53);
        assert_eq!(restored.data, input.data);
    }
}
