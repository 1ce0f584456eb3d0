//! HT cleanup encoding: one mandatory pass covering the whole codeblock.
//!
//! The codeblock is scanned as quad-pairs in row-major order. Significance
//! and exponent-max patterns go to the VLC stream, runs of insignificant
//! quads (and the "both u values large" event of the initial line pair) go
//! to MEL, magnitudes and signs go to MagSgn.

use crate::block::CodeBlock;
use crate::error::Result;
use crate::ht::streams::{MagSgnWriter, MelEncoder, VlcWriter, terminate_mel_vlc};
use crate::ht::vlc::{
    encode_quad, encode_u_extension, encode_u_prefix, encode_u_suffix, split_u, tables,
};
use crate::quant::BandParams;

/// Everything the scan tracks about the codeblock's quads.
struct QuadStorage {
    qw: u32,
    qh: u32,
    /// Per quad-sample significance; four entries per quad, in the order
    /// (0,0), (0,1), (1,0), (1,1) within the quad.
    sigma: Vec<u8>,
    /// Per quad-sample exponent: the bit length of the MagSgn value, zero
    /// for insignificant samples.
    exponent: Vec<u8>,
    /// Per quad-sample MagSgn value: 2 * (magnitude - 1) + sign.
    value: Vec<u32>,
}

impl QuadStorage {
    /// Returns `None` when the codeblock holds no significant sample at
    /// all.
    fn build(block: &CodeBlock) -> Option<Self> {
        let width = block.rect.width();
        let height = block.rect.height();
        let qw = width.div_ceil(2);
        let qh = height.div_ceil(2);

        let mut storage = Self {
            qw,
            qh,
            sigma: vec![0; (4 * qw * qh) as usize],
            exponent: vec![0; (4 * qw * qh) as usize],
            value: vec![0; (4 * qw * qh) as usize],
        };

        let mut or_val = 0u32;
        for qy in 0..qh {
            for qx in 0..qw {
                let q = qy * qw + qx;
                for i in 0..4u32 {
                    let x = 2 * qx + (i >> 1);
                    let y = 2 * qy + (i & 1);
                    if x >= width || y >= height {
                        continue;
                    }

                    let sample = block.samples[(y * width + x) as usize];
                    if sample == 0 {
                        continue;
                    }

                    or_val |= 1;
                    let sign = (sample < 0) as u32;
                    let magnitude = sample.unsigned_abs() & 0x7FFF_FFFF;
                    let value = ((magnitude - 1) << 1) | sign;

                    let n = (4 * q + i) as usize;
                    storage.sigma[n] = 1;
                    storage.exponent[n] = (32 - (value | 1).leading_zeros()) as u8;
                    storage.value[n] = value;
                }
            }
        }

        (or_val != 0).then_some(storage)
    }

    fn rho(&self, q: u32) -> u8 {
        let n = (4 * q) as usize;
        self.sigma[n]
            | (self.sigma[n + 1] << 1)
            | (self.sigma[n + 2] << 2)
            | (self.sigma[n + 3] << 3)
    }

    /// Significance context of quad `q`, derived from already-coded
    /// neighbours only.
    fn context(&self, q: u32) -> u16 {
        let qw = self.qw;

        if q < qw {
            // Initial line pair: previous quad's four samples, packed as
            // (f | sf) | (w << 1) | (sw << 2).
            if q == 0 {
                return 0;
            }
            let p = (4 * (q - 1)) as usize;
            ((self.sigma[p] | self.sigma[p + 1])
                | (self.sigma[p + 2] << 1)
                | (self.sigma[p + 3] << 2)) as u16
        } else {
            let up = (4 * (q - qw)) as usize;
            let mut context = self.sigma[up + 1] as u16; // n
            context += (self.sigma[up + 3] as u16) << 2; // ne
            if q % qw != 0 {
                context |= self.sigma[up - 1] as u16; // nw
                let cur = (4 * q) as usize;
                context += ((self.sigma[cur - 1] | self.sigma[cur - 2]) as u16) << 1; // (sw | w)
            }
            if (q + 1) % qw != 0 {
                context |= (self.sigma[up + 5] as u16) << 2; // nf
            }
            context
        }
    }

    /// Kappa for a quad of a non-initial line pair.
    fn kappa(&self, q: u32, rho: u8) -> u32 {
        let qw = self.qw;
        let up = (4 * (q - qw)) as usize;

        let gamma = (rho.count_ones() > 1) as i32;

        let e_n = self.exponent[up + 1] as i32;
        let e_ne = self.exponent[up + 3] as i32;
        let e_nw = if q % qw != 0 {
            self.exponent[up - 1] as i32
        } else {
            0
        };
        let e_nf = if (q + 1) % qw != 0 {
            self.exponent[up + 5] as i32
        } else {
            0
        };

        let max_e = e_n.max(e_ne).max(e_nw).max(e_nf);
        i32::max(1, gamma * (max_e - 1)) as u32
    }
}

struct CleanupEncoder<'a> {
    storage: &'a QuadStorage,
    magsgn: MagSgnWriter,
    mel: MelEncoder,
    vlc: VlcWriter,
}

impl CleanupEncoder<'_> {
    /// Code one quad's VLC word and MagSgn contributions. Returns the u
    /// residual of the quad.
    fn code_quad(&mut self, q: u32, context: u16, kappa: u32, table: &[u16]) -> u32 {
        let storage = self.storage;
        let n = (4 * q) as usize;
        let rho = storage.rho(q);

        let e_max = *storage.exponent[n..n + 4].iter().max().unwrap_or(&0) as u32;
        let big_u = u32::max(e_max, kappa);
        let u_q = big_u - kappa;

        let emb = if u_q != 0 {
            let mut emb = 0u8;
            for i in 0..4 {
                if storage.exponent[n + i] as u32 == e_max {
                    emb |= 1 << i;
                }
            }
            emb
        } else {
            0
        };

        let n_q = (emb as u16) | ((rho as u16) << 4) | (context << 8);
        let (cwd, len, emb_k) = encode_quad(table, n_q);
        let emb_1 = emb & emb_k;

        for i in 0..4 {
            let m_n = storage.sigma[n + i] as u32 * big_u - ((emb_k >> i) & 1) as u32;
            self.magsgn
                .emit(storage.value[n + i], m_n as u8, ((emb_1 >> i) & 1) as u32);
        }

        self.vlc.emit(cwd, len);

        u_q
    }

    /// Emit the u residuals of a quad pair of the initial line pair,
    /// including the shared "both large" MEL event.
    fn code_u_pair_initial(&mut self, u0: u32, u1: u32, u_off0: bool, u_off1: bool) {
        if u_off0 && u_off1 {
            if u32::min(u0, u1) > 2 {
                self.mel.encode(true);
                let (p0, s0, e0) = split_u(u0 - 2);
                let (p1, s1, e1) = split_u(u1 - 2);
                encode_u_prefix(&mut self.vlc, p0);
                encode_u_prefix(&mut self.vlc, p1);
                encode_u_suffix(&mut self.vlc, p0, s0);
                encode_u_suffix(&mut self.vlc, p1, s1);
                encode_u_extension(&mut self.vlc, s0, e0);
                encode_u_extension(&mut self.vlc, s1, e1);
            } else {
                self.mel.encode(false);
                let (p0, s0, e0) = split_u(u0);
                encode_u_prefix(&mut self.vlc, p0);
                if p0 > 2 {
                    // u1 is 1 or 2, carried by a single bit between the
                    // first quad's prefix and suffix.
                    self.vlc.emit((u1 - 1) as u16, 1);
                    encode_u_suffix(&mut self.vlc, p0, s0);
                    encode_u_extension(&mut self.vlc, s0, e0);
                } else {
                    let (p1, s1, e1) = split_u(u1);
                    encode_u_prefix(&mut self.vlc, p1);
                    encode_u_suffix(&mut self.vlc, p0, s0);
                    encode_u_suffix(&mut self.vlc, p1, s1);
                    encode_u_extension(&mut self.vlc, s0, e0);
                    encode_u_extension(&mut self.vlc, s1, e1);
                }
            }
        } else if u_off0 {
            self.code_u_single(u0);
        } else if u_off1 {
            self.code_u_single(u1);
        }
    }

    /// Emit the u residuals of a quad pair of a non-initial line pair.
    fn code_u_pair(&mut self, u0: u32, u1: u32, u_off0: bool, u_off1: bool) {
        if u_off0 && u_off1 {
            let (p0, s0, e0) = split_u(u0);
            let (p1, s1, e1) = split_u(u1);
            encode_u_prefix(&mut self.vlc, p0);
            encode_u_prefix(&mut self.vlc, p1);
            encode_u_suffix(&mut self.vlc, p0, s0);
            encode_u_suffix(&mut self.vlc, p1, s1);
            encode_u_extension(&mut self.vlc, s0, e0);
            encode_u_extension(&mut self.vlc, s1, e1);
        } else if u_off0 {
            self.code_u_single(u0);
        } else if u_off1 {
            self.code_u_single(u1);
        }
    }

    fn code_u_single(&mut self, u: u32) {
        let (prefix, suffix, extension) = split_u(u);
        encode_u_prefix(&mut self.vlc, prefix);
        encode_u_suffix(&mut self.vlc, prefix, suffix);
        encode_u_extension(&mut self.vlc, suffix, extension);
    }
}

/// Encode a codeblock's cleanup pass. On return the block holds its
/// compressed segment and pass bookkeeping.
pub(crate) fn encode_cleanup(block: &mut CodeBlock, params: &BandParams) -> Result<()> {
    block.compressed.clear();
    block.pass_lengths.clear();
    block.num_zbp = params.m_b.saturating_sub(1);

    let Some(storage) = QuadStorage::build(block) else {
        // Nothing to code: zero passes, no bytes.
        block.num_passes = 0;
        return Ok(());
    };

    let vlc_tables = tables();
    let mut encoder = CleanupEncoder {
        storage: &storage,
        magsgn: MagSgnWriter::new(),
        mel: MelEncoder::new(),
        vlc: VlcWriter::new(),
    };

    let (qw, qh) = (storage.qw, storage.qh);

    for qy in 0..qh {
        let initial = qy == 0;
        let table: &[u16] = if initial {
            &vlc_tables.enc0
        } else {
            &vlc_tables.enc1
        };

        let mut qx = 0;
        while qx + 1 < qw {
            let q0 = qy * qw + qx;
            let q1 = q0 + 1;

            let context0 = storage.context(q0);
            let kappa0 = if initial { 1 } else { storage.kappa(q0, storage.rho(q0)) };
            if context0 == 0 {
                encoder.mel.encode(storage.rho(q0) != 0);
            }
            let u0 = encoder.code_quad(q0, context0, kappa0, table);
            let u_off0 = u0 != 0;

            let context1 = storage.context(q1);
            let kappa1 = if initial { 1 } else { storage.kappa(q1, storage.rho(q1)) };
            if context1 == 0 {
                encoder.mel.encode(storage.rho(q1) != 0);
            }
            let u1 = encoder.code_quad(q1, context1, kappa1, table);
            let u_off1 = u1 != 0;

            if initial {
                encoder.code_u_pair_initial(u0, u1, u_off0, u_off1);
            } else {
                encoder.code_u_pair(u0, u1, u_off0, u_off1);
            }

            qx += 2;
        }

        if qw % 2 == 1 {
            let q = qy * qw + (qw - 1);
            let context = storage.context(q);
            let kappa = if initial { 1 } else { storage.kappa(q, storage.rho(q)) };
            if context == 0 {
                encoder.mel.encode(storage.rho(q) != 0);
            }
            let u = encoder.code_quad(q, context, kappa, table);
            if u != 0 {
                encoder.code_u_single(u);
            }
        }
    }

    // Terminate the three streams and pack Scup into the trailing two
    // bytes.
    let mut buf = encoder.magsgn.finish();
    let tail = terminate_mel_vlc(encoder.mel, encoder.vlc);
    let scup = tail.len();
    buf.extend_from_slice(&tail);

    let lcup = buf.len();
    buf[lcup - 1] = (scup >> 4) as u8;
    buf[lcup - 2] = (buf[lcup - 2] & 0xF0) | (scup & 0x0F) as u8;

    block.pass_lengths.push(lcup as u32);
    block.num_passes = 1;
    block.compressed = buf;

    Ok(())
}
