//! The inverse discrete wavelet transform, as specified in Annex F.

use crate::codestream::WaveletTransform;
use crate::fdwt::{Band, inverse_1d};
use crate::rect::Region;

/// Reconstruct one decomposition level: interleave the LL band and the
/// three detail bands onto the parent grid (the 2D_INTERLEAVE procedure
/// from F.3.3), then run the horizontal and vertical synthesis filters.
pub(crate) fn inverse_level(
    ll: &Band,
    bands: [&Band; 3],
    out_rect: Region,
    transform: WaveletTransform,
) -> Band {
    let mut out = Band::zeroed(out_rect);

    let [hl, lh, hh] = bands;
    for (band, xob, yob) in [(ll, 0u32, 0u32), (hl, 1, 0), (lh, 0, 1), (hh, 1, 1)] {
        interleave(&mut out, band, xob, yob);
    }

    if out_rect.is_empty() {
        return out;
    }

    // Horizontal pass over every row (HOR_SR, F.3.4).
    let width = out_rect.width() as usize;
    for row in out.data.chunks_exact_mut(width) {
        inverse_1d(row, out_rect.x0, out_rect.x1, transform);
    }

    // Vertical pass over every column (VER_SR, F.3.5).
    let mut column = Vec::with_capacity(out_rect.height() as usize);
    for x in out_rect.x0..out_rect.x1 {
        column.clear();
        for y in out_rect.y0..out_rect.y1 {
            column.push(out.at(x, y));
        }

        inverse_1d(&mut column, out_rect.y0, out_rect.y1, transform);

        for (y, value) in (out_rect.y0..out_rect.y1).zip(column.iter()) {
            out.set(x, y, *value);
        }
    }

    out
}

/// Scatter a band's samples onto the interleaved grid according to its
/// parity offset.
fn interleave(out: &mut Band, band: &Band, xob: u32, yob: u32) {
    for y in band.rect.y0..band.rect.y1 {
        for x in band.rect.x0..band.rect.x1 {
            let gx = 2 * x + xob;
            let gy = 2 * y + yob;

            // The band rectangle may extend one interleaved sample past the
            // parent rectangle when the origins disagree in parity.
            if gx >= out.rect.x0 && gx < out.rect.x1 && gy >= out.rect.y0 && gy < out.rect.y1 {
                out.set(gx, gy, band.at(x, y));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_parities() {
        let out_rect = Region::new(0, 0, 4, 4);

        let mut ll = Band::zeroed(Region::new(0, 0, 2, 2));
        ll.data.fill(1);
        let mut hl = Band::zeroed(Region::new(0, 0, 2, 2));
        hl.data.fill(2);
        let mut lh = Band::zeroed(Region::new(0, 0, 2, 2));
        lh.data.fill(3);
        let mut hh = Band::zeroed(Region::new(0, 0, 2, 2));
        hh.data.fill(4);

        let mut out = Band::zeroed(out_rect);
        interleave(&mut out, &ll, 0, 0);
        interleave(&mut out, &hl, 1, 0);
        interleave(&mut out, &lh, 0, 1);
        interleave(&mut out, &hh, 1, 1);

        assert_eq!(out.at(0, 0), 1);
        assert_eq!(out.at(1, 0), 2);
        assert_eq!(out.at(0, 1), 3);
        assert_eq!(out.at(1, 1), 4);
        assert_eq!(out.at(2, 2), 1);
        assert_eq!(out.at(3, 3), 4);
    }
}
