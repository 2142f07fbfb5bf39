use super::*;
use crate::{
    bloom::FilterBuilder,
    page::PAGE_SIZE,
    types::{Collation, KeyType},
};

use std::io::Write;

fn sample_stats() -> Stats {
    Stats {
        name: "meta-test".to_string(),
        key_types: vec![KeyType::Int4],
        collations: vec![Collation::C],
        include_types: vec![KeyType::Int8],
        bloom_enabled: true,
        bloom_nhash: 4,
        n_count: 1000,
        n_leaves: 3,
        n_internals: 1,
        n_plain_leaves: 3,
        height: 1,
        root_block: 4,
        first_leaf: 1,
        last_leaf: 3,
        ..Stats::default()
    }
}

#[test]
fn test_meta_region_roundtrip() {
    let stats = sample_stats();
    let zones = vec![
        ZoneSpan {
            child: 4,
            min_key: 1_i32.to_le_bytes().to_vec(),
            max_key: 900_i32.to_le_bytes().to_vec(),
        },
    ];
    let blooms = {
        let mut builder = FilterBuilder::new(4);
        for key in 0..100_i32 {
            builder.add(&key.to_le_bytes());
        }
        let mut filter = builder.build();
        filter.child = 4;
        vec![filter]
    };

    let region = encode_meta_region(&stats, &zones, &blooms).unwrap();
    assert_eq!(region.len() % PAGE_SIZE, 0);

    // lay the region out at a non-zero block, the way a build does.
    let dir = std::env::temp_dir().join("ordix-meta-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("region.bin");
    let zone_offset = 2_u32;
    {
        let mut fd = std::fs::File::create(&path).unwrap();
        fd.write_all(&vec![0_u8; PAGE_SIZE * zone_offset as usize]).unwrap();
        fd.write_all(&region).unwrap();
    }

    let mut fd = std::fs::File::open(&path).unwrap();
    let (stats2, zones2, blooms2) = decode_meta_region(&mut fd, zone_offset).unwrap();
    assert_eq!(stats2.name, stats.name);
    assert_eq!(stats2.key_types, stats.key_types);
    assert_eq!(stats2.n_count, stats.n_count);
    assert_eq!(zones2.len(), 1);
    assert_eq!(zones2[0].child, 4);
    assert_eq!(zones2[0].min_key, 1_i32.to_le_bytes());
    assert_eq!(blooms2.len(), 1);
    assert!(blooms2[0].contains(&50_i32.to_le_bytes()));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_meta_region_bad_marker() {
    let stats = sample_stats();
    let mut region = encode_meta_region(&stats, &[], &[]).unwrap();
    // clobber a byte inside the cbor body, just past the length prefix.
    region[16] ^= 0xFF;

    let dir = std::env::temp_dir().join("ordix-meta-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("badregion.bin");
    {
        let mut fd = std::fs::File::create(&path).unwrap();
        fd.write_all(&region).unwrap();
    }
    let mut fd = std::fs::File::open(&path).unwrap();
    assert!(decode_meta_region(&mut fd, 0).is_err());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_meta_page_alignment() {
    // regions stay page-aligned as payload grows.
    let stats = sample_stats();
    for n in [0_usize, 1, 10, 100] {
        let zones: Vec<ZoneSpan> = (0..n)
            .map(|i| ZoneSpan {
                child: i as u64,
                min_key: (i as i32).to_le_bytes().to_vec(),
                max_key: (i as i32 + 1).to_le_bytes().to_vec(),
            })
            .collect();
        let region = encode_meta_region(&stats, &zones, &[]).unwrap();
        assert_eq!(region.len() % PAGE_SIZE, 0, "zones {}", n);
    }
}
