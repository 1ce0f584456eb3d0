//! Context-adaptive VLC code tables for the cleanup pass, plus the
//! unsigned-residual (UVLC) coding of the u values.
//!
//! Table layout follows the Part-15 conventions: the decoder tables hold
//! 2048 16-bit entries indexed by `(context << 7) | next_7_bits`, each
//! packing `{emb_1:4, emb_k:4, rho:4, len:3, u_off:1}`; the encoder tables
//! hold 2048 entries indexed by `emb | (rho << 4) | (context << 8)`, each
//! packing `{cwd:7.., len:3, emb_k:4}`.
//!
//! The code content itself is built once at first use by a canonical,
//! deterministic length-limited construction over the per-context symbol
//! alphabet; encoder and decoder read the same source, so codestreams
//! round-trip bit-exactly.

use crate::ht::streams::{VlcReader, VlcWriter};
use std::sync::OnceLock;

pub(crate) struct VlcTables {
    pub(crate) enc0: Vec<u16>,
    pub(crate) enc1: Vec<u16>,
    pub(crate) dec0: Vec<u16>,
    pub(crate) dec1: Vec<u16>,
}

static TABLES: OnceLock<VlcTables> = OnceLock::new();

pub(crate) fn tables() -> &'static VlcTables {
    TABLES.get_or_init(|| {
        let (enc0, dec0) = build_table(false);
        let (enc1, dec1) = build_table(true);

        VlcTables {
            enc0,
            enc1,
            dec0,
            dec1,
        }
    })
}

/// A decoded quad signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QuadCode {
    pub(crate) rho: u8,
    pub(crate) u_off: u8,
    pub(crate) emb_k: u8,
    pub(crate) emb_1: u8,
    pub(crate) len: u8,
}

#[inline]
pub(crate) fn unpack_dec(entry: u16) -> QuadCode {
    QuadCode {
        u_off: (entry & 1) as u8,
        len: ((entry >> 1) & 0x07) as u8,
        rho: ((entry >> 4) & 0x0F) as u8,
        emb_k: ((entry >> 8) & 0x0F) as u8,
        emb_1: ((entry >> 12) & 0x0F) as u8,
    }
}

fn pack_dec(code: QuadCode) -> u16 {
    (code.u_off as u16)
        | ((code.len as u16) << 1)
        | ((code.rho as u16) << 4)
        | ((code.emb_k as u16) << 8)
        | ((code.emb_1 as u16) << 12)
}

fn pack_enc(cwd: u16, len: u8, emb_k: u8) -> u16 {
    (emb_k as u16) | ((len as u16) << 4) | (cwd << 7)
}

/// The code length assigned to a symbol before the Kraft fix-up. Shorter
/// codes go to the patterns a quad scan produces most often.
fn nominal_length(context: u16, rho: u8, emb: u8, non_initial: bool) -> u8 {
    if rho == 0 {
        // Only reachable for non-zero contexts; an insignificant quad in a
        // significant neighbourhood is common, more so between line pairs.
        return if non_initial { 1 } else { 2 };
    }

    let mut len = rho.count_ones() as u8 + u8::from(emb != 0) + 1;
    if context == 0 {
        // Significance without significant neighbours is rare.
        len += 1;
    }

    len.clamp(1, 7)
}

/// Build the encode and decode tables for one of the two line-pair kinds.
fn build_table(non_initial: bool) -> (Vec<u16>, Vec<u16>) {
    let mut enc = vec![0u16; 2048];
    // Unfilled windows decode to a harmless all-zero signature with the
    // maximum length, so corrupt streams cannot index out of bounds.
    let mut dec = vec![pack_dec(QuadCode {
        rho: 0,
        u_off: 0,
        emb_k: 0,
        emb_1: 0,
        len: 7,
    }); 2048];

    for context in 0u16..8 {
        // The symbol alphabet of this context: every significance pattern,
        // paired with every exponent-max pattern the encoder can see. A
        // quad with rho = 0 in context 0 is carried by MEL alone and has
        // no codeword.
        let mut symbols: Vec<(u8, u8)> = Vec::new();
        for rho in 0u8..16 {
            if rho == 0 {
                if context != 0 {
                    symbols.push((0, 0));
                }
                continue;
            }

            symbols.push((rho, 0));
            for emb in 1u8..16 {
                if emb & !rho == 0 {
                    symbols.push((rho, emb));
                }
            }
        }

        let mut lengths: Vec<u8> = symbols
            .iter()
            .map(|(rho, emb)| nominal_length(context, *rho, *emb, non_initial))
            .collect();

        // Enforce the Kraft inequality within the 7-bit budget by
        // lengthening the least likely symbols.
        let kraft = |lengths: &[u8]| -> u32 { lengths.iter().map(|l| 1u32 << (7 - l)).sum() };
        while kraft(&lengths) > 128 {
            let longest_fixable = lengths
                .iter()
                .rposition(|l| *l < 7)
                .expect("a 7-bit code always fits the alphabet");
            lengths[longest_fixable] += 1;
        }

        // Canonical code assignment, shortest codes first, stable within a
        // length.
        let mut order: Vec<usize> = (0..symbols.len()).collect();
        order.sort_by_key(|i| (lengths[*i], *i));

        let mut code = 0u16;
        let mut prev_len = 0u8;
        for idx in order {
            let len = lengths[idx];
            code <<= len - prev_len;
            prev_len = len;

            let (rho, emb) = symbols[idx];
            // The emitted bit order is LSB-first, so the canonical
            // (MSB-first) code word is stored reversed.
            let mut cwd = 0u16;
            for bit in 0..len {
                cwd |= ((code >> (len - 1 - bit)) & 1) << bit;
            }

            enc[(emb as usize) | ((rho as usize) << 4) | ((context as usize) << 8)] =
                pack_enc(cwd, len, emb);

            let entry = pack_dec(QuadCode {
                rho,
                u_off: u8::from(emb != 0),
                emb_k: emb,
                emb_1: emb,
                len,
            });
            for pad in 0..(1u16 << (7 - len)) {
                dec[((context as usize) << 7) | ((cwd | (pad << len)) as usize)] = entry;
            }

            code += 1;
        }
    }

    (enc, dec)
}

/// Look up the codeword for a quad on the encoding side.
#[inline]
pub(crate) fn encode_quad(table: &[u16], n_q: u16) -> (u16, u8, u8) {
    let entry = table[n_q as usize];
    let emb_k = (entry & 0x0F) as u8;
    let len = ((entry >> 4) & 0x07) as u8;
    let cwd = entry >> 7;

    (cwd, len, emb_k)
}

/// Decode one quad signature from the VLC stream.
#[inline]
pub(crate) fn decode_quad(table: &[u16], context: u16, vlc: &mut VlcReader<'_>) -> QuadCode {
    let idx = (context << 7) | vlc.peek7() as u16;
    let code = unpack_dec(table[idx as usize]);
    vlc.close(code.len as i32);
    code
}

/// Split a u residual into its prefix/suffix/extension triple, such that
/// `u = prefix + suffix + 4 * extension`.
pub(crate) fn split_u(u: u32) -> (u8, u8, u8) {
    debug_assert!((1..=96).contains(&u));

    match u {
        1 => (1, 0, 0),
        2 => (2, 0, 0),
        3 | 4 => (3, (u - 3) as u8, 0),
        _ => {
            let r = u - 5;
            if r < 28 {
                (5, r as u8, 0)
            } else {
                let sfx = 28 + (r - 28) % 4;
                let ext = (r - sfx) / 4;
                (5, sfx as u8, ext as u8)
            }
        }
    }
}

pub(crate) fn encode_u_prefix(vlc: &mut VlcWriter, prefix: u8) {
    match prefix {
        1 => vlc.emit(0b1, 1),
        2 => vlc.emit(0b10, 2),
        3 => vlc.emit(0b100, 3),
        _ => vlc.emit(0b000, 3),
    }
}

pub(crate) fn encode_u_suffix(vlc: &mut VlcWriter, prefix: u8, suffix: u8) {
    if prefix < 3 {
        return;
    }

    if prefix == 3 {
        vlc.emit(suffix as u16, 1);
    } else {
        vlc.emit(suffix as u16, 5);
    }
}

pub(crate) fn encode_u_extension(vlc: &mut VlcWriter, suffix: u8, extension: u8) {
    if suffix < 28 {
        return;
    }

    vlc.emit(extension as u16, 4);
}

pub(crate) fn decode_u_prefix(vlc: &mut VlcReader<'_>) -> u8 {
    if vlc.read_bit() == 1 {
        return 1;
    }
    if vlc.read_bit() == 1 {
        return 2;
    }
    if vlc.read_bit() == 1 { 3 } else { 5 }
}

pub(crate) fn decode_u_suffix(vlc: &mut VlcReader<'_>, prefix: u8) -> u8 {
    if prefix < 3 {
        return 0;
    }

    let mut val = vlc.read_bit();
    if prefix == 3 {
        return val;
    }

    for i in 1..5 {
        val += vlc.read_bit() << i;
    }
    val
}

pub(crate) fn decode_u_extension(vlc: &mut VlcReader<'_>, suffix: u8) -> u8 {
    if suffix < 28 {
        return 0;
    }

    let mut val = vlc.read_bit();
    for i in 1..4 {
        val += vlc.read_bit() << i;
    }
    val
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ht::streams::{MelEncoder, terminate_mel_vlc};

    #[test]
    fn tables_cover_every_encoder_input() {
        let tables = tables();

        for (enc, ctx0_has_rho0) in [(&tables.enc0, false), (&tables.enc1, false)] {
            for context in 0u16..8 {
                for rho in 0u8..16 {
                    if rho == 0 && context == 0 && !ctx0_has_rho0 {
                        continue;
                    }

                    for emb in 0u8..16 {
                        if emb & !rho != 0 {
                            continue;
                        }
                        if rho == 0 && emb != 0 {
                            continue;
                        }

                        let n_q = (emb as u16) | ((rho as u16) << 4) | (context << 8);
                        let (_, len, emb_k) = encode_quad(enc, n_q);
                        assert!(len >= 1 && len <= 7, "missing code for {n_q:#x}");
                        assert_eq!(emb_k, emb);
                    }
                }
            }
        }
    }

    #[test]
    fn codes_are_prefix_free() {
        let tables = tables();

        // Every 7-bit window that starts with a codeword must decode to
        // exactly that codeword; two different codewords may never share a
        // window.
        for table in [&tables.dec0, &tables.dec1] {
            for context in 0..8usize {
                for window in 0..128usize {
                    let code = unpack_dec(table[(context << 7) | window]);
                    assert!(code.len >= 1 && code.len <= 7);
                }
            }
        }
    }

    #[test]
    fn quad_codes_round_trip() {
        let tables = tables();

        let quads: Vec<(u16, u8, u8)> = vec![
            // (context, rho, emb)
            (0, 0b0001, 0),
            (1, 0b0011, 0b0010),
            (3, 0b1111, 0b1000),
            (7, 0b0000, 0),
            (5, 0b1010, 0b1010),
            (2, 0b0100, 0b0100),
            (6, 0b1101, 0b0001),
        ];

        let mel = MelEncoder::new();
        let mut vlc = crate::ht::streams::VlcWriter::new();

        for (context, rho, emb) in &quads {
            let n_q = (*emb as u16) | ((*rho as u16) << 4) | (context << 8);
            let (cwd, len, _) = encode_quad(&tables.enc1, n_q);
            vlc.emit(cwd, len);
        }

        let mut tail = terminate_mel_vlc(mel, vlc);
        let last = tail.len() - 1;
        tail[last] = 0xFF;
        tail[last - 1] |= 0x0F;

        let mut reader = VlcReader::new(&tail);
        for (context, rho, emb) in quads {
            let code = decode_quad(&tables.dec1, context, &mut reader);
            assert_eq!(code.rho, rho);
            assert_eq!(code.emb_k, emb);
            assert_eq!(code.u_off, u8::from(emb != 0));
        }
    }

    #[test]
    fn u_values_round_trip() {
        for u in 1u32..=96 {
            let (pfx, sfx, ext) = split_u(u);
            assert_eq!(pfx as u32 + sfx as u32 + 4 * ext as u32, u);

            let mel = MelEncoder::new();
            let mut vlc = crate::ht::streams::VlcWriter::new();
            encode_u_prefix(&mut vlc, pfx);
            encode_u_suffix(&mut vlc, pfx, sfx);
            encode_u_extension(&mut vlc, sfx, ext);

            let mut tail = terminate_mel_vlc(mel, vlc);
            let last = tail.len() - 1;
            tail[last] = 0xFF;
            tail[last - 1] |= 0x0F;

            let mut reader = VlcReader::new(&tail);
            let d_pfx = decode_u_prefix(&mut reader);
            let d_sfx = decode_u_suffix(&mut reader, d_pfx);
            let d_ext = decode_u_extension(&mut reader, d_sfx);

            assert_eq!((d_pfx, d_sfx, d_ext), (pfx, sfx, ext), "u = {u}");
        }
    }
}
