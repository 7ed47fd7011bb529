use atlus_fs::{
    compression::{compress, decompress},
    Error, Result,
};
use pretty_assertions::assert_eq;
use tracing::{info, instrument};
use tracing_test::traced_test;

fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x2545_F491u32;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}

#[instrument(skip(input), fields(len = input.len()))]
fn assert_survives(input: &[u8]) -> Result<Vec<u8>> {
    let packed = compress(input);
    info!(packed = packed.len(), "compressed");
    assert_eq!(decompress(&packed, input.len())?, input);
    Ok(packed)
}

#[traced_test]
#[test]
fn patterns_survive_compression() -> Result<()> {
    assert_survives(&[])?;
    assert_survives(&noise(10_000))?;
    assert_survives(&[0x42; 70_000])?;
    assert_survives(&[0xFF; 40])?;

    let interleaved: Vec<u8> = (1..=5000u32).flat_map(|i| [(i % 255 + 1) as u8, 0]).collect();
    assert_survives(&interleaved)?;

    let text = b"The quick brown fox jumps over the lazy dog. ".repeat(200);
    assert_survives(&text)?;

    let mut mixed = noise(300);
    mixed.extend([0; 17]);
    mixed.extend(noise(300));
    mixed.extend([7, 0, 8, 0, 9]);
    mixed.extend(noise(70_000));
    assert_survives(&mixed)?;

    Ok(())
}

#[test]
fn runs_compress_well() -> Result<()> {
    let packed = assert_survives(&vec![0; 100_000])?;
    assert!(packed.len() < 16);

    let packed = assert_survives(&[0x10; 0x1_0000])?;
    assert_eq!(packed.len(), 6);

    Ok(())
}

#[test]
fn decode_every_operation() -> Result<()> {
    #[rustfmt::skip]
    let packed = [
        // copy 1, 2
        0x02, 0x01, 0x02,
        // three bytes from two back
        0x63, 0x02,
        // two bytes from five back, wide distance
        0x82, 0x05, 0x00,
        // 9 and 8 each followed by a zero
        0xA2, 0x09, 0x08,
        // 33 zeros, wide count
        0x20, 0x21, 0x00,
        // 0xEE four times
        0x44, 0xEE,
    ];

    let mut expected = vec![1, 2, 1, 2, 1, 1, 2, 9, 0, 8, 0];
    expected.extend([0; 33]);
    expected.extend([0xEE; 4]);

    assert_eq!(decompress(&packed, expected.len())?, expected);
    // output past the expected length is dropped
    assert_eq!(decompress(&packed, 6)?, vec![1, 2, 1, 2, 1, 1]);

    Ok(())
}

#[test]
fn corrupt_streams_are_rejected() {
    let cases: [&[u8]; 5] = [
        // reserved opcode
        &[0xC1, 0x00],
        // back reference before the start of the output
        &[0x01, 0x07, 0x62, 0x02],
        // literal longer than the input
        &[0x05, 0x01, 0x02],
        // wide count cut short
        &[0x20, 0x10],
        // runs out before the expected length
        &[0x23],
    ];

    for packed in cases {
        assert!(
            matches!(decompress(packed, 16), Err(Error::CorruptData(_))),
            "{packed:02X?} should be rejected"
        );
    }
}

#[test]
fn huge_expected_length_is_not_trusted() {
    assert!(matches!(
        decompress(&[0x23], u32::MAX as usize),
        Err(Error::CorruptData(_))
    ));
    assert!(matches!(decompress(&[], usize::MAX), Err(Error::CorruptData(_))));
}
