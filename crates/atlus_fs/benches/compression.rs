use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

fn sample() -> Vec<u8> {
    let mut state = 1u32;
    let mut data = Vec::with_capacity(0x40000);
    while data.len() < 0x40000 {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        match state >> 29 {
            0 => data.extend([0; 64]),
            1 => data.extend([(state >> 8) as u8, 0].repeat(16)),
            2 => data.extend(b"BattleUnit".repeat(4)),
            _ => data.extend(state.to_le_bytes()),
        }
    }
    data
}

pub mod lb {
    use atlus_fs::compression::{compress, decompress};
    use divan::Bencher;

    #[divan::bench]
    fn encode(bencher: Bencher) {
        bencher
            .with_inputs(super::sample)
            .bench_refs(|data| divan::black_box(compress(data)));
    }

    #[divan::bench]
    fn decode(bencher: Bencher) {
        bencher
            .with_inputs(|| {
                let data = super::sample();
                (compress(&data), data.len())
            })
            .bench_refs(|(packed, len)| divan::black_box(decompress(packed, *len).unwrap()));
    }
}
