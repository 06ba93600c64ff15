//! End-to-end driver scenarios against the in-process device.

use std::io::{Cursor, Write};

use cart_core::{
    export_file, import_archive, CartConfig, CartDriver, CartError, FrameAddr, MemoryDevice,
    FRAME_SIZE,
};

fn powered(cartridges: u16, frames: u16, cache: usize) -> CartDriver<MemoryDevice> {
    let cfg = CartConfig::default()
        .with_geometry(cartridges, frames)
        .with_cache_frames(cache);
    let mut drv = CartDriver::new(cfg, MemoryDevice::new(cartridges, frames)).unwrap();
    drv.power_on().unwrap();
    drv
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

#[test]
fn test_round_trip_across_two_frames() {
    let mut drv = powered(2, 8, 4);
    let data = pattern(2000, 7);

    let h = drv.open("a").unwrap();
    assert_eq!(drv.write(h, &data).unwrap(), 2000);
    assert_eq!(drv.file_length(h).unwrap(), 2000);
    assert_eq!(drv.chain(h).unwrap().len(), 2);

    drv.seek(h, 0).unwrap();
    assert_eq!(drv.read_vec(h, 2000).unwrap(), data);
    assert_eq!(drv.file_position(h).unwrap(), 2000);
}

#[test]
fn test_eviction_with_two_frame_cache() {
    let mut drv = powered(1, 8, 2);
    let names = ["first", "second", "third"];
    let mut handles = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let h = drv.open(name).unwrap();
        drv.write(h, &pattern(100, i as u8)).unwrap();
        handles.push(h);
    }

    assert_eq!(drv.cache().occupied(), 2);
    assert!(!drv.cache().contains(FrameAddr::new(0, 0)));
    assert!(drv.cache().contains(FrameAddr::new(0, 1)));
    assert!(drv.cache().contains(FrameAddr::new(0, 2)));

    // The evicted frame comes back from the device.
    let reads = drv.transport().counters().read_frame;
    drv.seek(handles[0], 0).unwrap();
    assert_eq!(drv.read_vec(handles[0], 100).unwrap(), pattern(100, 0));
    assert_eq!(drv.transport().counters().read_frame, reads + 1);

    // The other two are served from the cache.
    for (i, &h) in handles.iter().enumerate().skip(1) {
        drv.seek(h, 0).unwrap();
        assert_eq!(drv.read_vec(h, 100).unwrap(), pattern(100, i as u8));
    }
    assert_eq!(drv.transport().counters().read_frame, reads + 1);
    assert_eq!(drv.cache().occupied(), 2);
}

#[test]
fn test_handles_are_isolated() {
    let mut drv = powered(2, 8, 4);
    let a = drv.open("a").unwrap();
    let b = drv.open("b").unwrap();
    assert_ne!(a, b);

    drv.write(a, &pattern(1500, 1)).unwrap();
    assert!(drv.chain(b).unwrap().is_empty());
    assert_eq!(drv.file_length(b).unwrap(), 0);
    assert_eq!(drv.file_position(b).unwrap(), 0);

    drv.write(b, &pattern(300, 2)).unwrap();
    assert_eq!(drv.file_length(a).unwrap(), 1500);
    assert_eq!(drv.file_position(a).unwrap(), 1500);

    let a_chain = drv.chain(a).unwrap();
    let b_chain = drv.chain(b).unwrap();
    assert!(a_chain.iter().all(|f| !b_chain.contains(f)));

    drv.seek(a, 0).unwrap();
    assert_eq!(drv.read_vec(a, 1500).unwrap(), pattern(1500, 1));
}

#[test]
fn test_power_cycle_resets_state() {
    let mut drv = powered(2, 8, 4);
    let h = drv.open("kept").unwrap();
    drv.write(h, &pattern(3000, 3)).unwrap();
    assert!(drv.cache().occupied() > 0);

    drv.power_off().unwrap();
    assert!(matches!(drv.open("kept"), Err(CartError::NotPoweredOn)));

    drv.power_on().unwrap();
    assert_eq!(drv.cache().occupied(), 0);
    assert!(drv.file_names().is_empty());
    assert_eq!(drv.free_frames(), 16);
    assert!(matches!(drv.file_length(h), Err(CartError::InvalidHandle(_))));

    let h = drv.open("kept").unwrap();
    assert_eq!(drv.file_length(h).unwrap(), 0);
    assert!(drv.read_vec(h, 10).unwrap().is_empty());
}

#[test]
fn test_length_never_shrinks() {
    let mut drv = powered(2, 8, 4);
    let h = drv.open("grow").unwrap();
    let mut last = 0;
    for (offset, len) in [(0, 10), (0, 5), (5, 2000), (100, 10), (2005, 1)] {
        drv.seek(h, offset).unwrap();
        drv.write(h, &pattern(len, 9)).unwrap();
        let length = drv.file_length(h).unwrap();
        assert!(length >= last);
        last = length;
    }
    assert_eq!(last, 2006);
}

#[test]
fn test_reads_clamp_at_end_of_file() {
    let mut drv = powered(1, 8, 4);
    let h = drv.open("short").unwrap();
    drv.write(h, b"0123456789").unwrap();

    drv.seek(h, 6).unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(drv.read(h, &mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"6789");
    assert_eq!(drv.read(h, &mut buf).unwrap(), 0);
}

#[test]
fn test_overwrite_inside_frame_keeps_neighbours() {
    let mut drv = powered(1, 8, 1);
    let a = drv.open("a").unwrap();
    let b = drv.open("b").unwrap();
    drv.write(a, &[b'x'; FRAME_SIZE]).unwrap();
    // Push a's frame out of the one-slot cache.
    drv.write(b, b"evict").unwrap();

    drv.seek(a, 10).unwrap();
    drv.write(a, b"yy").unwrap();
    drv.seek(a, 0).unwrap();
    let data = drv.read_vec(a, FRAME_SIZE).unwrap();
    assert_eq!(&data[8..14], b"xxyyxx");
}

#[test]
fn test_media_full() {
    let mut drv = powered(1, 2, 2);
    let h = drv.open("big").unwrap();
    assert_eq!(drv.write(h, &pattern(2 * FRAME_SIZE, 0)).unwrap(), 2 * FRAME_SIZE);
    assert!(matches!(drv.write(h, b"!"), Err(CartError::MediaFull)));
}

#[test]
fn test_archive_import_and_export() {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        zip.start_file::<_, ()>("one.txt", Default::default())
            .unwrap();
        zip.write_all(b"first file").unwrap();
        zip.start_file::<_, ()>("nested/two.bin", Default::default())
            .unwrap();
        zip.write_all(&pattern(2500, 5)).unwrap();
        zip.finish().unwrap();
    }

    let mut drv = powered(2, 8, 2);
    let imported = import_archive(&mut drv, Cursor::new(buf)).unwrap();
    let names: Vec<_> = imported.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["one.txt", "nested/two.bin"]);

    assert_eq!(export_file(&mut drv, "one.txt").unwrap(), b"first file");
    assert_eq!(export_file(&mut drv, "nested/two.bin").unwrap(), pattern(2500, 5));
    assert_eq!(drv.free_frames(), 16 - 4);
}
