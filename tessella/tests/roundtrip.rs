//! End-to-end encode/decode scenarios.

use tessella::{
    DecoderParams, EncoderParams, Image, Progression, Transformation, decode, decode_with, encode,
};

/// A multiplicative congruential generator for deterministic test data.
fn prng(seed: &mut u64) -> u32 {
    *seed = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    (*seed >> 33) as u32
}

fn gradient_image(width: u32, height: u32, components: u16, precision: u8) -> Image {
    let mut image = Image::new(width, height, components, precision, false);
    let max = (1i64 << precision) as i32;

    for (c, component) in image.components.iter_mut().enumerate() {
        for y in 0..height {
            let row = component.row_mut(y);
            for (x, sample) in row.iter_mut().enumerate() {
                *sample = ((x as i32 * 3 + y as i32 * 7 + c as i32 * 11) % max).abs();
            }
        }
    }

    image
}

fn random_image(width: u32, height: u32, components: u16, precision: u8, signed: bool) -> Image {
    let mut image = Image::new(width, height, components, precision, signed);
    let mut seed = 0xDECAFu64 + width as u64 * 31 + height as u64;

    for component in image.components.iter_mut() {
        for y in 0..height {
            for sample in component.row_mut(y).iter_mut() {
                let range = 1u32 << precision;
                let value = (prng(&mut seed) % range) as i32;
                *sample = if signed {
                    value - (range / 2) as i32
                } else {
                    value
                };
            }
        }
    }

    image
}

fn assert_images_equal(a: &Image, b: &Image) {
    assert_eq!(a.components.len(), b.components.len());
    for (ca, cb) in a.components.iter().zip(b.components.iter()) {
        assert_eq!(ca.width, cb.width);
        assert_eq!(ca.height, cb.height);
        for y in 0..ca.height {
            assert_eq!(ca.row(y), cb.row(y), "row {y}");
        }
    }
}

/// Scenario: an 8x8 single-component lossless image with 4x4 codeblocks
/// and one decomposition round-trips exactly.
#[test]
fn s1_small_gray_lossless() {
    let mut image = Image::new(8, 8, 1, 8, false);
    for y in 0..8 {
        let row = image.components[0].row_mut(y);
        for (x, sample) in row.iter_mut().enumerate() {
            *sample = (y * 8) as i32 + x as i32;
        }
    }

    let mut params = EncoderParams::default();
    params.code_block_width = 4;
    params.code_block_height = 4;
    params.num_decompositions = 1;

    let codestream = encode(&image, &params).unwrap();

    // One tile, one tile-part, a valid marker skeleton.
    assert_eq!(&codestream[..2], &[0xFF, 0x4F]);
    assert_eq!(&codestream[codestream.len() - 2..], &[0xFF, 0xD9]);
    let sot_count = codestream
        .windows(2)
        .filter(|w| w == &[0xFF, 0x90])
        .count();
    assert_eq!(sot_count, 1);

    let restored = decode(&codestream).unwrap();
    assert_images_equal(&image, &restored);
}

/// Scenario: constant gray RGB through the 9/7 path with MCT reconstructs
/// within one step, and the inverse MCT restores R = G = B.
#[test]
fn s2_constant_rgb_irreversible_mct() {
    let mut image = Image::new(16, 16, 3, 8, false);
    for component in image.components.iter_mut() {
        for y in 0..16 {
            component.row_mut(y).fill(128);
        }
    }

    let mut params = EncoderParams::default();
    params.transformation = Transformation::Irreversible97;
    params.mct = true;
    params.num_decompositions = 2;

    let codestream = encode(&image, &params).unwrap();
    let restored = decode(&codestream).unwrap();

    for component in &restored.components {
        for y in 0..component.height {
            for sample in component.row(y) {
                assert!((sample - 128).abs() <= 1, "sample {sample}");
            }
        }
    }

    for y in 0..16 {
        let r = restored.components[0].row(y);
        let g = restored.components[1].row(y);
        let b = restored.components[2].row(y);
        assert_eq!(r, g);
        assert_eq!(g, b);
    }
}

/// Lossless round trips across dimensions, precisions and signedness.
#[test]
fn lossless_round_trips() {
    for (width, height, components, precision, signed) in [
        (37u32, 23u32, 1u16, 8u8, false),
        (64, 64, 3, 8, false),
        (16, 16, 1, 12, false),
        (33, 17, 2, 10, true),
        (128, 96, 3, 8, false),
    ] {
        let image = random_image(width, height, components, precision, signed);

        let mut params = EncoderParams::default();
        params.num_decompositions = 3;
        params.code_block_width = 32;
        params.code_block_height = 32;

        let codestream = encode(&image, &params).unwrap();
        let restored = decode(&codestream).unwrap();

        assert_images_equal(&image, &restored);
    }
}

/// Lossless round trip with the reversible MCT.
#[test]
fn lossless_round_trip_with_mct() {
    let image = random_image(32, 32, 3, 8, false);

    let mut params = EncoderParams::default();
    params.mct = true;
    params.num_decompositions = 2;

    let codestream = encode(&image, &params).unwrap();
    let restored = decode(&codestream).unwrap();

    assert_images_equal(&image, &restored);
}

/// Multiple tiles compose back into the full image.
#[test]
fn multi_tile_round_trip() {
    let image = gradient_image(100, 60, 2, 8);

    let mut params = EncoderParams::default();
    params.tile_size = Some((48, 32));
    params.num_decompositions = 2;

    let codestream = encode(&image, &params).unwrap();

    // 3 x 2 tiles.
    let sot_count = codestream
        .windows(2)
        .filter(|w| w == &[0xFF, 0x90])
        .count();
    assert_eq!(sot_count, 6);

    let restored = decode(&codestream).unwrap();
    assert_images_equal(&image, &restored);
}

/// Sub-sampled components keep their own plane geometry.
#[test]
fn subsampled_component_round_trip() {
    let mut image = Image::new(32, 32, 2, 8, false);
    image.components[1] = tessella::Component::new(16, 16, 2, 2, 8, false);

    for (c, component) in image.components.iter_mut().enumerate() {
        for y in 0..component.height {
            let row = component.row_mut(y);
            for (x, sample) in row.iter_mut().enumerate() {
                *sample = ((x + y as usize + c) % 251) as i32;
            }
        }
    }

    let mut params = EncoderParams::default();
    params.num_decompositions = 2;

    let codestream = encode(&image, &params).unwrap();
    let restored = decode(&codestream).unwrap();

    assert_images_equal(&image, &restored);

    let up = restored.components[1].upsample();
    assert_eq!(up.width, 32);
    assert_eq!(up.height, 32);
}

/// Two encode runs with identical inputs produce identical bytes.
#[test]
fn deterministic_packet_order() {
    let image = random_image(64, 48, 3, 8, false);

    let mut params = EncoderParams::default();
    params.num_decompositions = 2;
    params.num_layers = 2;

    let first = encode(&image, &params).unwrap();
    let second = encode(&image, &params).unwrap();

    assert_eq!(first, second);
}

/// Multiple quality layers still decode exactly; the later layers hold
/// empty contributions.
#[test]
fn multi_layer_round_trip() {
    let image = random_image(48, 48, 1, 8, false);

    let mut params = EncoderParams::default();
    params.num_layers = 3;
    params.num_decompositions = 2;

    let codestream = encode(&image, &params).unwrap();
    let restored = decode(&codestream).unwrap();

    assert_images_equal(&image, &restored);
}

/// SOP and EPH markers are emitted and consumed transparently.
#[test]
fn sop_eph_round_trip() {
    let image = random_image(32, 32, 1, 8, false);

    let mut params = EncoderParams::default();
    params.use_sop = true;
    params.use_eph = true;
    params.num_decompositions = 1;

    let codestream = encode(&image, &params).unwrap();

    assert!(codestream.windows(2).any(|w| w == [0xFF, 0x91]));
    assert!(codestream.windows(2).any(|w| w == [0xFF, 0x92]));

    let restored = decode(&codestream).unwrap();
    assert_images_equal(&image, &restored);
}

/// Scenario: the same image in LRCP and RPCL order carries the same
/// packets; only their order differs. With SOP markers the packets can be
/// cut apart and compared body by body.
#[test]
fn s5_progression_orders_carry_identical_packets() {
    let image = gradient_image(256, 256, 3, 8);

    let mut base = EncoderParams::default();
    base.num_decompositions = 2;
    base.use_sop = true;
    base.code_block_width = 32;
    base.code_block_height = 32;
    base.precinct_sizes = vec![(7, 7); 3];

    let mut lrcp_params = base.clone();
    lrcp_params.progression = Progression::Lrcp;
    let mut rpcl_params = base.clone();
    rpcl_params.progression = Progression::Rpcl;

    let lrcp = encode(&image, &lrcp_params).unwrap();
    let rpcl = encode(&image, &rpcl_params).unwrap();

    // Both must decode to the same image.
    assert_images_equal(&decode(&lrcp).unwrap(), &decode(&rpcl).unwrap());

    // Split each stream at its SOP markers and compare the packet multisets
    // (without the 6-byte SOP prefix, whose counter depends on the order).
    let packets = |data: &[u8]| -> Vec<Vec<u8>> {
        let mut starts: Vec<usize> = data
            .windows(2)
            .enumerate()
            .filter(|(_, w)| *w == [0xFF, 0x91])
            .map(|(i, _)| i)
            .collect();
        // The codestream tail (EOC) bounds the last packet.
        starts.push(data.len() - 2);

        starts
            .windows(2)
            .map(|pair| data[pair[0] + 6..pair[1]].to_vec())
            .collect()
    };

    let mut lrcp_packets = packets(&lrcp);
    let mut rpcl_packets = packets(&rpcl);
    assert_eq!(lrcp_packets.len(), rpcl_packets.len());
    assert!(!lrcp_packets.is_empty());

    lrcp_packets.sort();
    rpcl_packets.sort();
    assert_eq!(lrcp_packets, rpcl_packets);
}

/// A progression-order change reorders part of the stream; the decoder
/// follows the POC marker and reconstructs exactly.
#[test]
fn poc_round_trip() {
    let image = random_image(64, 64, 3, 8, false);

    let mut params = EncoderParams::default();
    params.num_decompositions = 2;
    params.progression = tessella::Progression::Lrcp;
    params.progression_changes = vec![tessella::ProgressionChange {
        resolution_start: 0,
        resolution_end: 1,
        component_start: 0,
        component_end: 3,
        layer_end: 1,
        progression: tessella::Progression::Cprl,
    }];

    let codestream = encode(&image, &params).unwrap();

    // A POC marker is present.
    assert!(codestream.windows(2).any(|w| w == [0xFF, 0x5F]));

    let restored = decode(&codestream).unwrap();
    assert_images_equal(&image, &restored);
}

/// All five progression orders decode identically.
#[test]
fn all_progression_orders_decode() {
    let image = random_image(64, 64, 3, 8, false);

    for progression in [
        Progression::Lrcp,
        Progression::Rlcp,
        Progression::Rpcl,
        Progression::Pcrl,
        Progression::Cprl,
    ] {
        let mut params = EncoderParams::default();
        params.num_decompositions = 2;
        params.progression = progression;

        let codestream = encode(&image, &params).unwrap();
        let restored = decode(&codestream).unwrap();
        assert_images_equal(&image, &restored);
    }
}

/// Bit-stuffing invariant over entire codestreams: a 0xFF byte inside
/// packet data is never followed by a byte with its top bit set, except
/// for marker codes.
#[test]
fn no_unstuffed_ff_sequences() {
    let image = random_image(64, 64, 1, 8, false);

    let mut params = EncoderParams::default();
    params.num_decompositions = 2;

    let codestream = encode(&image, &params).unwrap();

    for pair in codestream.windows(2) {
        assert_ne!(pair, [0xFF, 0xFF]);
    }
}

/// An ROI up-shift survives a lossless round trip.
#[test]
fn roi_round_trip() {
    let image = random_image(32, 32, 1, 8, false);

    let mut params = EncoderParams::default();
    params.num_decompositions = 1;
    params.roi_shifts = vec![3];

    let codestream = encode(&image, &params).unwrap();

    // An RGN marker is present.
    assert!(codestream.windows(2).any(|w| w == [0xFF, 0x5E]));

    let restored = decode(&codestream).unwrap();
    assert_images_equal(&image, &restored);
}

/// The irreversible path stays close to the input.
#[test]
fn irreversible_error_is_bounded() {
    let image = gradient_image(64, 64, 1, 8);

    let mut params = EncoderParams::default();
    params.transformation = Transformation::Irreversible97;
    params.num_decompositions = 3;

    let codestream = encode(&image, &params).unwrap();
    let restored = decode(&codestream).unwrap();

    let mut worst = 0i32;
    for y in 0..64 {
        for (a, b) in image.components[0]
            .row(y)
            .iter()
            .zip(restored.components[0].row(y))
        {
            worst = worst.max((a - b).abs());
        }
    }

    assert!(worst <= 2, "worst-case error {worst}");
}

/// Scenario: re-encoding a lossy decode at the same settings stays nearly
/// identical to the first decode.
#[test]
fn s6_lossy_reencode_stability() {
    let source = gradient_image(64, 64, 1, 8);

    let mut params = EncoderParams::default();
    params.transformation = Transformation::Irreversible97;
    params.num_decompositions = 2;

    let first = decode(&encode(&source, &params).unwrap()).unwrap();
    let second = decode(&encode(&first, &params).unwrap()).unwrap();

    // PSNR of the second decode against the first.
    let mut sum_sq = 0f64;
    let mut count = 0f64;
    for y in 0..64 {
        for (a, b) in first.components[0]
            .row(y)
            .iter()
            .zip(second.components[0].row(y))
        {
            sum_sq += f64::from((a - b) * (a - b));
            count += 1.0;
        }
    }

    let mse = sum_sq / count;
    let psnr = if mse == 0.0 {
        f64::INFINITY
    } else {
        10.0 * (255.0f64 * 255.0 / mse).log10()
    };

    assert!(psnr >= 60.0, "PSNR {psnr}");
}

/// Truncated data fails in strict mode but still yields the decodable
/// prefix otherwise.
#[test]
fn truncated_stream_behaviour() {
    let image = random_image(32, 32, 1, 8, false);

    let mut params = EncoderParams::default();
    params.num_decompositions = 1;

    let codestream = encode(&image, &params).unwrap();
    let truncated = &codestream[..codestream.len() * 3 / 4];

    let strict = DecoderParams { strict: true };
    assert!(decode_with(truncated, &strict).is_err());

    // Lenient mode returns an image; the decoded prefix matches where
    // data arrived.
    let lenient = decode(truncated);
    assert!(lenient.is_ok());
}

/// Garbage input is rejected, not panicked on.
#[test]
fn garbage_input_is_rejected() {
    assert!(decode(&[]).is_err());
    assert!(decode(&[0x00, 0x01, 0x02]).is_err());
    assert!(decode(&[0xFF, 0x4F, 0xFF, 0xFF, 0x00]).is_err());

    let mut seed = 0x600Du64;
    let garbage: Vec<u8> = (0..512).map(|_| (prng(&mut seed) & 0xFF) as u8).collect();
    let _ = decode(&garbage);
}
