//! HT cleanup decoding: reconstructs significance and magnitudes for a
//! whole codeblock from the MagSgn, MEL and VLC sub-streams.

use crate::block::CodeBlock;
use crate::error::{ErrorKind, Result, bail};
use crate::ht::BlockStates;
use crate::ht::streams::{MagSgnReader, MelDecoder, VlcReader};
use crate::ht::vlc::{
    QuadCode, decode_quad, decode_u_extension, decode_u_prefix, decode_u_suffix, tables,
};

/// Decode the cleanup segment `dcup` (already modDcup-substituted) into
/// the block's sample plane (sign-magnitude, magnitudes at bit `p_lsb`)
/// and significance states.
pub(crate) fn decode_cleanup(
    block: &mut CodeBlock,
    dcup: &[u8],
    pcup: usize,
    p_lsb: u32,
    states: &mut BlockStates,
) -> Result<()> {
    let width = block.rect.width();
    let height = block.rect.height();
    let qw = width.div_ceil(2);
    let qh = height.div_ceil(2);

    let mut sigma = vec![0u8; (4 * qw * qh) as usize];
    let mut exponent = vec![0u8; (4 * qw * qh) as usize];
    let mut mu = vec![0u32; (4 * qw * qh) as usize];

    let vlc_tables = tables();
    let mut magsgn = MagSgnReader::new(&dcup[..pcup]);
    let mut mel = MelDecoder::new(&dcup[pcup..]);
    let mut vlc = VlcReader::new(&dcup[pcup..]);

    // Decode the signature of one quad: MEL carries significance in a
    // zero context, the VLC tables carry everything else.
    let mut decode_sig_emb = |context: u16,
                              mel: &mut MelDecoder<'_>,
                              vlc: &mut VlcReader<'_>,
                              table: &[u16]|
     -> QuadCode {
        if context == 0 && mel.decode() == 0 {
            return QuadCode {
                rho: 0,
                u_off: 0,
                emb_k: 0,
                emb_1: 0,
                len: 0,
            };
        }

        decode_quad(table, context, vlc)
    };

    // Recover the four samples of quad `q` given its signature and U.
    let mut recover_quad = |q: u32,
                            code: &QuadCode,
                            big_u: u32,
                            sigma: &mut [u8],
                            exponent: &mut [u8],
                            mu: &mut [u32],
                            magsgn: &mut MagSgnReader<'_>| {
        for i in 0..4usize {
            let n = (4 * q) as usize + i;
            sigma[n] = (code.rho >> i) & 1;

            let m_n = sigma[n] as u32 * big_u - ((code.emb_k >> i) & 1) as u32;
            let known_1 = ((code.emb_1 >> i) & 1) as u32;
            let v = magsgn.decode(m_n, known_1);

            if m_n != 0 {
                exponent[n] = (32 - v.leading_zeros()) as u8;
                let mut value = (v >> 1) + 1;
                value <<= p_lsb;
                value |= (v & 1) << 31; // sign bit
                mu[n] = value;
            }
        }
    };

    // The u residual of a lone quad (or a quad outside the pairing).
    let mut decode_u_single = |vlc: &mut VlcReader<'_>| -> u32 {
        let prefix = decode_u_prefix(vlc);
        let suffix = decode_u_suffix(vlc, prefix);
        let extension = decode_u_extension(vlc, suffix);
        prefix as u32 + suffix as u32 + ((extension as u32) << 2)
    };

    let context_initial = |sigma: &[u8], q: u32| -> u16 {
        if q == 0 {
            return 0;
        }
        let p = (4 * (q - 1)) as usize;
        ((sigma[p] | sigma[p + 1]) | (sigma[p + 2] << 1) | (sigma[p + 3] << 2)) as u16
    };

    let context_non_initial = |sigma: &[u8], q: u32| -> u16 {
        let up = (4 * (q - qw)) as usize;
        let mut context = sigma[up + 1] as u16; // n
        context += (sigma[up + 3] as u16) << 2; // ne
        if q % qw != 0 {
            context |= sigma[up - 1] as u16; // nw
            let cur = (4 * q) as usize;
            context += ((sigma[cur - 1] | sigma[cur - 2]) as u16) << 1; // (sw | w)
        }
        if (q + 1) % qw != 0 {
            context |= (sigma[up + 5] as u16) << 2; // nf
        }
        context
    };

    let kappa_non_initial = |sigma_rho: u8, exponent: &[u8], q: u32| -> u32 {
        let up = (4 * (q - qw)) as usize;
        let gamma = (sigma_rho.count_ones() > 1) as i32;

        let e_n = exponent[up + 1] as i32;
        let e_ne = exponent[up + 3] as i32;
        let e_nw = if q % qw != 0 {
            exponent[up - 1] as i32
        } else {
            0
        };
        let e_nf = if (q + 1) % qw != 0 {
            exponent[up + 5] as i32
        } else {
            0
        };

        let max_e = e_n.max(e_ne).max(e_nw).max(e_nf);
        i32::max(1, gamma * (max_e - 1)) as u32
    };

    for qy in 0..qh {
        let initial = qy == 0;
        let table: &[u16] = if initial {
            &vlc_tables.dec0
        } else {
            &vlc_tables.dec1
        };

        let mut qx = 0;
        while qx + 1 < qw {
            let q0 = qy * qw + qx;
            let q1 = q0 + 1;

            let context0 = if initial {
                context_initial(&sigma, q0)
            } else {
                context_non_initial(&sigma, q0)
            };
            let code0 = decode_sig_emb(context0, &mut mel, &mut vlc, table);
            for i in 0..4usize {
                sigma[(4 * q0) as usize + i] = (code0.rho >> i) & 1;
            }

            let context1 = if initial {
                context_initial(&sigma, q1)
            } else {
                context_non_initial(&sigma, q1)
            };
            let code1 = decode_sig_emb(context1, &mut mel, &mut vlc, table);
            for i in 0..4usize {
                sigma[(4 * q1) as usize + i] = (code1.rho >> i) & 1;
            }

            // The u residuals of the pair.
            let (u0, u1) = if code0.u_off == 1 && code1.u_off == 1 {
                if initial {
                    if mel.decode() == 1 {
                        // Both residuals are large; coded with an offset of
                        // two, prefixes first.
                        let p0 = decode_u_prefix(&mut vlc);
                        let p1 = decode_u_prefix(&mut vlc);
                        let s0 = decode_u_suffix(&mut vlc, p0);
                        let s1 = decode_u_suffix(&mut vlc, p1);
                        let e0 = decode_u_extension(&mut vlc, s0);
                        let e1 = decode_u_extension(&mut vlc, s1);
                        (
                            2 + p0 as u32 + s0 as u32 + ((e0 as u32) << 2),
                            2 + p1 as u32 + s1 as u32 + ((e1 as u32) << 2),
                        )
                    } else {
                        let p0 = decode_u_prefix(&mut vlc);
                        if p0 > 2 {
                            let u1 = vlc.read_bit() as u32 + 1;
                            let s0 = decode_u_suffix(&mut vlc, p0);
                            let e0 = decode_u_extension(&mut vlc, s0);
                            (p0 as u32 + s0 as u32 + ((e0 as u32) << 2), u1)
                        } else {
                            let p1 = decode_u_prefix(&mut vlc);
                            let s0 = decode_u_suffix(&mut vlc, p0);
                            let s1 = decode_u_suffix(&mut vlc, p1);
                            let e0 = decode_u_extension(&mut vlc, s0);
                            let e1 = decode_u_extension(&mut vlc, s1);
                            (
                                p0 as u32 + s0 as u32 + ((e0 as u32) << 2),
                                p1 as u32 + s1 as u32 + ((e1 as u32) << 2),
                            )
                        }
                    }
                } else {
                    let p0 = decode_u_prefix(&mut vlc);
                    let p1 = decode_u_prefix(&mut vlc);
                    let s0 = decode_u_suffix(&mut vlc, p0);
                    let s1 = decode_u_suffix(&mut vlc, p1);
                    let e0 = decode_u_extension(&mut vlc, s0);
                    let e1 = decode_u_extension(&mut vlc, s1);
                    (
                        p0 as u32 + s0 as u32 + ((e0 as u32) << 2),
                        p1 as u32 + s1 as u32 + ((e1 as u32) << 2),
                    )
                }
            } else if code0.u_off == 1 {
                (decode_u_single(&mut vlc), 0)
            } else if code1.u_off == 1 {
                (0, decode_u_single(&mut vlc))
            } else {
                (0, 0)
            };

            let kappa0 = if initial {
                1
            } else {
                kappa_non_initial(code0.rho, &exponent, q0)
            };
            let kappa1 = if initial {
                1
            } else {
                kappa_non_initial(code1.rho, &exponent, q1)
            };

            // A valid stream never needs more magnitude bits than the
            // register width; anything larger is corruption.
            if kappa0 + u0 > 32 || kappa1 + u1 > 32 {
                bail!(ErrorKind::Truncated("HT cleanup magnitude exponent"));
            }

            recover_quad(
                q0,
                &code0,
                kappa0 + u0,
                &mut sigma,
                &mut exponent,
                &mut mu,
                &mut magsgn,
            );
            recover_quad(
                q1,
                &code1,
                kappa1 + u1,
                &mut sigma,
                &mut exponent,
                &mut mu,
                &mut magsgn,
            );

            qx += 2;
        }

        if qw % 2 == 1 {
            let q = qy * qw + (qw - 1);

            let context = if initial {
                context_initial(&sigma, q)
            } else {
                context_non_initial(&sigma, q)
            };
            let code = decode_sig_emb(context, &mut mel, &mut vlc, table);
            for i in 0..4usize {
                sigma[(4 * q) as usize + i] = (code.rho >> i) & 1;
            }

            let u = if code.u_off == 1 {
                decode_u_single(&mut vlc)
            } else {
                0
            };

            let kappa = if initial {
                1
            } else {
                kappa_non_initial(code.rho, &exponent, q)
            };

            if kappa + u > 32 {
                bail!(ErrorKind::Truncated("HT cleanup magnitude exponent"));
            }

            recover_quad(
                q,
                &code,
                kappa + u,
                &mut sigma,
                &mut exponent,
                &mut mu,
                &mut magsgn,
            );
        }
    }

    if block.samples.len() != (width * height) as usize {
        bail!(ErrorKind::ResourceExhausted("codeblock sample buffer"));
    }

    // Convert the quad-ordered mu and sigma planes into raster scan.
    for qy in 0..qh {
        for qx in 0..qw {
            let q = qy * qw + qx;
            for i in 0..4u32 {
                let x = 2 * qx + (i >> 1);
                let y = 2 * qy + (i & 1);
                if x >= width || y >= height {
                    continue;
                }

                let n = (4 * q + i) as usize;
                block.samples[(y * width + x) as usize] = mu[n] as i32;
                states.set_sigma(x, y, sigma[n]);
            }
        }
    }

    Ok(())
}
