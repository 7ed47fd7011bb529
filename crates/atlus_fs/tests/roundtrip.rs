use std::io::Cursor;

use atlus_fs::{
    dds3::SECTOR_LEN,
    lb::LbEntryOptions,
    pak::detect,
    smt1::{self, FILE_COUNT, OFFSET_COUNT, TABLE_OFFSET},
    AcxArchive, Archive, ConflictPolicy, Dds3Archive, Error, IndexedArchive, LbArchive,
    PakArchive, PakVersion, Result, Smt1Archive, Traversal,
};
use pretty_assertions::assert_eq;
use tracing::info;
use tracing_test::traced_test;

/// Deterministic filler so that payloads differ from each other
fn payload(seed: u32, len: usize) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

#[traced_test]
#[test]
fn pak_layouts_survive_saving() -> Result<()> {
    let files = [
        ("field.bf", payload(1, 64)),
        ("Event.bmd", payload(2, 128)),
        ("model.rmd", payload(3, 192)),
    ];

    for version in [
        PakVersion::V1,
        PakVersion::V2,
        PakVersion::V2Be,
        PakVersion::V3,
        PakVersion::V3Be,
    ] {
        info!(%version, "saving");
        let mut pak = PakArchive::new(version);
        for (name, data) in &files {
            pak.add_file(name, data.clone().into(), ConflictPolicy::ThrowError)?;
        }

        let saved = pak.save_to_vec()?;
        assert_eq!(detect::detect(&saved, saved.len() as u64), Some(version));

        let reloaded = PakArchive::from_reader(Cursor::new(saved))?;
        assert_eq!(reloaded.version(), version);
        assert_eq!(
            reloaded.entries(Traversal::Recursive).collect::<Vec<_>>(),
            vec!["field.bf", "Event.bmd", "model.rmd"]
        );
        for (name, data) in &files {
            assert_eq!(&reloaded.open(name)?.read_remaining()?, data);
        }
    }

    Ok(())
}

#[test]
fn pak_conversion_between_layouts() -> Result<()> {
    let mut pak = PakArchive::new(PakVersion::V1);
    pak.add_file("init.bin", payload(4, 90).into(), ConflictPolicy::ThrowError)?;
    let v1 = PakArchive::from_reader(Cursor::new(pak.save_to_vec()?))?;

    let mut converted = v1;
    converted.set_version(PakVersion::V3Be);
    let v3 = PakArchive::from_reader(Cursor::new(converted.save_to_vec()?))?;

    assert_eq!(v3.version(), PakVersion::V3Be);
    // counted layouts pad payloads to 32 bytes
    let mut expected = payload(4, 90);
    expected.resize(96, 0);
    assert_eq!(v3.open("init.bin")?.read_remaining()?, expected);

    Ok(())
}

#[test]
fn unrecognised_pak_is_rejected() {
    let garbage = vec![0xFFu8; 600];
    assert!(matches!(
        PakArchive::from_reader(Cursor::new(garbage)),
        Err(Error::InvalidArchive)
    ));
}

#[traced_test]
#[test]
fn lb_entries_keep_their_headers() -> Result<()> {
    let text = b"a message, a message, a message and one more message".to_vec();
    let zeros = vec![0u8; 5000];

    let mut lb = LbArchive::new();
    lb.add_file_with(
        0,
        text.clone().into(),
        ConflictPolicy::ThrowError,
        LbEntryOptions::builder()
            .kind(2)
            .user_id(-7)
            .extension(".msg".to_owned())
            .compress(true)
            .build(),
    )?;
    lb.push_file(payload(5, 33).into())?;
    lb.add_file_with(
        2,
        zeros.clone().into(),
        ConflictPolicy::ThrowError,
        LbEntryOptions::builder().extension("tmx".to_owned()).compress(true).build(),
    )?;

    let reloaded = LbArchive::from_reader(Cursor::new(lb.save_to_vec()?))?;
    assert_eq!(reloaded.len(), 3);

    let info = reloaded.info(&0)?;
    assert!(info.compressed);
    assert_eq!(info.kind, 2);
    assert_eq!(info.user_id, -7);
    assert_eq!(info.extension, "MSG");
    assert_eq!(info.decompressed_len, text.len() as u64);

    assert_eq!(reloaded.open(&0)?.read_remaining()?, text);
    assert_eq!(reloaded.open(&1)?.read_remaining()?, payload(5, 33));
    assert_eq!(reloaded.open(&2)?.read_remaining()?, zeros);
    assert!(reloaded.open_raw(2)?.len() < 5000);
    assert_eq!(reloaded.handle_for_extension("TMX")?, 2);

    Ok(())
}

#[test]
fn acx_entries_survive_saving() -> Result<()> {
    let mut acx = AcxArchive::new();
    for (seed, len) in [(6, 1), (7, 0), (8, 1000)] {
        acx.push_file(payload(seed, len).into())?;
    }

    let reloaded = AcxArchive::from_reader(Cursor::new(acx.save_to_vec()?))?;
    assert_eq!(reloaded.len(), 3);
    for (handle, (seed, len)) in [(6, 1), (7, 0), (8, 1000)].into_iter().enumerate() {
        let mut window = reloaded.open(&handle)?;
        assert_eq!(window.start() % 4, 0);
        assert_eq!(window.read_remaining()?, payload(seed, len));
    }

    Ok(())
}

#[traced_test]
#[test]
fn deep_dds3_tree_survives_saving() -> Result<()> {
    let files = [
        ("top.bin", payload(9, 10)),
        ("data/readme.txt", payload(10, 0x801)),
        ("data/model/pc.mb", payload(11, 300)),
        ("data/model/npc/pc01.mb", payload(12, 5)),
        ("data/model/npc/pc02.mb", payload(13, 0x800)),
    ];

    let mut dds3 = Dds3Archive::new();
    for (path, data) in &files {
        dds3.add_file(path, data.clone().into(), ConflictPolicy::ThrowError)?;
    }
    dds3.add_directory("data/empty", ConflictPolicy::ThrowError)?;

    let (mut ddt, img) = dds3.save_split(Cursor::new(Vec::new()), Cursor::new(Vec::new()))?;
    assert_eq!(img.get_ref().len() as u64 % SECTOR_LEN, 0);

    let reloaded = Dds3Archive::from_readers(&mut ddt, img)?;
    assert_eq!(
        reloaded.entries(Traversal::Recursive).collect::<Vec<_>>(),
        vec![
            "data",
            "data/empty",
            "data/model",
            "data/model/npc",
            "data/model/npc/pc01.mb",
            "data/model/npc/pc02.mb",
            "data/model/pc.mb",
            "data/readme.txt",
            "top.bin",
        ]
    );
    assert_eq!(
        reloaded.directories(Traversal::Recursive).collect::<Vec<_>>(),
        vec!["data", "data/model", "data/model/npc"]
    );

    for (path, data) in &files {
        let mut window = reloaded.open(path)?;
        assert_eq!(window.start() % SECTOR_LEN, 0);
        assert_eq!(&window.read_remaining()?, data);
    }
    assert_eq!(reloaded.info("data/empty")?.size, 0);

    Ok(())
}

#[test]
fn smt1_table_follows_saved_data() -> Result<()> {
    let mut smt1 = Smt1Archive::new();
    for handle in 0..FILE_COUNT {
        smt1.add_file(&handle, payload(handle as u32, handle % 3).into(), ConflictPolicy::Replace)?;
    }
    smt1.add_file(&7, payload(0, 5000).into(), ConflictPolicy::Replace)?;

    let mut executable = Cursor::new(vec![0u8; TABLE_OFFSET as usize + 4 * OFFSET_COUNT + 16]);
    let data = smt1.save_with_executable(Cursor::new(Vec::new()), &mut executable)?;

    let table = smt1::read_table(&mut executable)?;
    assert_eq!(table.len(), OFFSET_COUNT);
    assert_eq!(&table[..3], &[0, 0, 0x800]);
    assert_eq!(table[8] - table[7], 3 * 0x800);
    assert_eq!(*table.last().unwrap() as usize, data.get_ref().len());

    let reloaded = Smt1Archive::from_readers(Cursor::new(data.into_inner()), &mut executable)?;
    assert_eq!(reloaded.len(), FILE_COUNT);
    // entries come back padded to whole sectors
    let seventh = reloaded.open(&7)?.read_remaining()?;
    assert_eq!(seventh.len(), 0x1800);
    assert_eq!(&seventh[..5000], &payload(0, 5000)[..]);
    assert_eq!(reloaded.open(&2)?.len(), 0x800);

    Ok(())
}
