use chrono::NaiveDate;
use rand::{prelude::random, rngs::SmallRng, seq::SliceRandom, Rng, SeedableRng};

use std::{
    fs,
    sync::atomic::{AtomicBool, Ordering as AtomicOrdering},
};

use super::*;
use crate::{
    build::Builder,
    config::Config,
    tuple::TupleShape,
    types::{IndexDescr, KeyAttr, KeyType, Row},
};

fn test_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("ordix-scan-test");
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn build(name: &str, descr: IndexDescr, rows: Vec<Row>) -> Index {
    let dir = test_dir();
    let config = Config::new(dir.as_os_str(), name, descr);
    Builder::initial(config)
        .unwrap()
        .build_index(rows.into_iter().map(Ok).collect::<Vec<_>>())
        .unwrap();
    Index::open(dir.as_os_str(), name).unwrap()
}

fn build_int4(name: &str, keys: &[i32]) -> Index {
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Int4));
    let rows = keys.iter().map(|k| Row::new(vec![Datum::Int4(*k)])).collect();
    build(name, descr, rows)
}

// drain a scan, decoding attribute 1 as i32.
fn collect_i32(scan: &mut Scan, dir: ScanDir, shape: &TupleShape, descr: &IndexDescr) -> Vec<i32> {
    let mut keys = vec![];
    while let Some(tuple) = scan.gettuple(dir).unwrap() {
        assert_eq!(tuple.tid, SYNTHETIC_TID);
        match tuple.deform(shape, descr).unwrap().remove(0) {
            Datum::Int4(v) => keys.push(v),
            datum => panic!("unexpected {:?}", datum),
        }
    }
    keys
}

// Scenario: unique keys, forward range scan over a multi-level tree.
#[test]
fn test_unique_int4_range() {
    let seed: u64 = random();
    println!("test_unique_int4_range seed {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut keys: Vec<i32> = (0..100_000).collect();
    keys.shuffle(&mut rng);
    let index = build_int4("uniq-range", &keys);
    let shape = TupleShape::new(&index.descr);

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    scan.rescan(&[ScanKey::new(1, StrategyOp::Ge, Datum::Int4(50_000))])
        .unwrap();
    let got = collect_i32(&mut scan, ScanDir::Forward, &shape, &index.descr);

    assert_eq!(got.len(), 50_000);
    assert_eq!(got[0], 50_000);
    assert_eq!(*got.last().unwrap(), 99_999);
    assert!(got.windows(2).all(|w| w[0] <= w[1]));
    scan.end_scan().unwrap();

    index.purge().unwrap();
}

// Scenario: heavy duplicates with a computed INCLUDE, equality probe.
#[test]
fn test_duplicates_include_rle() {
    let seed: u64 = random();
    println!("test_duplicates_include_rle seed {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    // skewed distribution over 10 distinct keys, include = key * 7.
    let distinct: Vec<i32> = vec![7, 11, 13, 42, 99, 100, 500, 700, 900, 1000];
    let mut rows = vec![];
    let mut want_42 = 0_usize;
    for _ in 0..200_000 {
        let i: usize = rng.gen_range(0..100);
        // zipf-ish: low ranks get most of the mass.
        let key = distinct[match i {
            0..=49 => 3, // 42
            50..=69 => 0,
            70..=84 => 1,
            85..=94 => 2,
            _ => 4 + (i % 6),
        }];
        if key == 42 {
            want_42 += 1;
        }
        rows.push(Row::new(vec![Datum::Int4(key), Datum::Int4(key * 7)]));
    }
    let mut descr = IndexDescr::single(KeyAttr::new(KeyType::Int4));
    descr.set_include(KeyType::Int4);
    let index = build("dups-inc", descr, rows);
    assert!(index.to_stats().n_include_rle_leaves > 0);

    let shape = TupleShape::new(&index.descr);
    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    scan.rescan(&[ScanKey::new(1, StrategyOp::Eq, Datum::Int4(42))])
        .unwrap();

    let mut emitted = 0;
    while let Some(tuple) = scan.gettuple(ScanDir::Forward).unwrap() {
        let values = tuple.deform(&shape, &index.descr).unwrap();
        assert_eq!(values[0], Datum::Int4(42));
        assert_eq!(values[1], Datum::Int4(42 * 7));
        emitted += 1;
    }
    assert_eq!(emitted, want_42);
    scan.end_scan().unwrap();

    index.purge().unwrap();
}

// Scenario: (date, int4) with a range on the date and equality on k2.
#[test]
fn test_two_column_equality_on_k2() {
    let base = NaiveDate::from_ymd(2024, 1, 1);
    let cutoff = NaiveDate::from_ymd(2024, 6, 1);

    let mut rows = vec![];
    let mut want = 0_usize;
    for i in 0..50_000_i64 {
        let date = base + chrono::Duration::days(i % 2000);
        let k2 = (i % 1000) as i32;
        if date >= cutoff && k2 == 17 {
            want += 1;
        }
        rows.push(Row::new(vec![Datum::Date(date), Datum::Int4(k2)]));
    }
    let descr = IndexDescr::pair(KeyAttr::new(KeyType::Date), KeyAttr::new(KeyType::Int4));
    let index = build("two-col-eq", descr, rows);
    let shape = TupleShape::new(&index.descr);

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    scan.rescan(&[
        ScanKey::new(1, StrategyOp::Ge, Datum::Date(cutoff)),
        ScanKey::new(2, StrategyOp::Eq, Datum::Int4(17)),
    ])
    .unwrap();

    let mut emitted = 0;
    let mut prev: Option<NaiveDate> = None;
    while let Some(tuple) = scan.gettuple(ScanDir::Forward).unwrap() {
        let values = tuple.deform(&shape, &index.descr).unwrap();
        let date = match &values[0] {
            Datum::Date(date) => *date,
            datum => panic!("unexpected {:?}", datum),
        };
        assert!(date >= cutoff);
        assert_eq!(values[1], Datum::Int4(17));
        if let Some(prev) = prev {
            assert!(prev <= date);
        }
        prev = Some(date);
        emitted += 1;
    }
    assert_eq!(emitted, want);
    scan.end_scan().unwrap();

    index.purge().unwrap();
}

// Non-equality predicates on k2 go through the runtime recheck.
#[test]
fn test_two_column_runtime_recheck() {
    let mut rows = vec![];
    let mut want = 0_usize;
    for k1 in 0..1000_i64 {
        for k2 in 0..20_i64 {
            if k1 >= 500 && k2 > 15 {
                want += 1;
            }
            rows.push(Row::new(vec![Datum::Int8(k1), Datum::Int8(k2)]));
        }
    }
    let descr = IndexDescr::pair(KeyAttr::new(KeyType::Int8), KeyAttr::new(KeyType::Int8));
    let index = build("two-col-recheck", descr, rows);
    let shape = TupleShape::new(&index.descr);

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    scan.rescan(&[
        ScanKey::new(1, StrategyOp::Ge, Datum::Int8(500)),
        ScanKey::new(2, StrategyOp::Gt, Datum::Int8(15)),
    ])
    .unwrap();

    let mut forward = vec![];
    while let Some(tuple) = scan.gettuple(ScanDir::Forward).unwrap() {
        let values = tuple.deform(&shape, &index.descr).unwrap();
        match (&values[0], &values[1]) {
            (Datum::Int8(k1), Datum::Int8(k2)) => {
                assert!(*k1 >= 500 && *k2 > 15, "({}, {})", k1, k2);
                forward.push((*k1, *k2));
            }
            pair => panic!("unexpected {:?}", pair),
        }
    }
    assert_eq!(forward.len(), want);

    // the same predicate walked backward yields the mirror sequence.
    scan.rescan(&[
        ScanKey::new(1, StrategyOp::Ge, Datum::Int8(500)),
        ScanKey::new(2, StrategyOp::Gt, Datum::Int8(15)),
    ])
    .unwrap();
    let mut backward = vec![];
    while let Some(tuple) = scan.gettuple(ScanDir::Backward).unwrap() {
        let values = tuple.deform(&shape, &index.descr).unwrap();
        match (&values[0], &values[1]) {
            (Datum::Int8(k1), Datum::Int8(k2)) => backward.push((*k1, *k2)),
            pair => panic!("unexpected {:?}", pair),
        }
    }
    backward.reverse();
    assert_eq!(backward, forward);
    scan.end_scan().unwrap();

    index.purge().unwrap();
}

// Scenario: empty index, then a one-leaf rebuild.
#[test]
fn test_empty_and_single_leaf() {
    let index = build_int4("empty", &[]);
    let shape = TupleShape::new(&index.descr);
    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    scan.rescan(&[]).unwrap();
    assert!(scan.gettuple(ScanDir::Forward).unwrap().is_none());
    scan.rescan(&[ScanKey::new(1, StrategyOp::Ge, Datum::Int4(0))]).unwrap();
    assert!(scan.gettuple(ScanDir::Forward).unwrap().is_none());
    scan.end_scan().unwrap();
    index.purge().unwrap();

    let keys: Vec<i32> = (1..=1000).collect();
    let index = build_int4("one-leaf", &keys);
    assert_eq!(index.to_stats().n_leaves, 1);

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    scan.rescan(&[ScanKey::new(1, StrategyOp::Ge, Datum::Int4(990))])
        .unwrap();
    let got = collect_i32(&mut scan, ScanDir::Forward, &shape, &index.descr);
    assert_eq!(got, (990..=1000).collect::<Vec<i32>>());
    scan.end_scan().unwrap();

    index.purge().unwrap();
}

#[test]
fn test_backward_scan() {
    let keys: Vec<i32> = (0..30_000).collect();
    let index = build_int4("backward", &keys);
    let shape = TupleShape::new(&index.descr);

    // unbounded backward: full set, descending.
    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    scan.rescan(&[]).unwrap();
    let got = collect_i32(&mut scan, ScanDir::Backward, &shape, &index.descr);
    assert_eq!(got.len(), 30_000);
    assert_eq!(got[0], 29_999);
    assert_eq!(*got.last().unwrap(), 0);
    assert!(got.windows(2).all(|w| w[0] >= w[1]));

    // a lower bound terminates a backward scan.
    scan.rescan(&[ScanKey::new(1, StrategyOp::Gt, Datum::Int4(25_000))])
        .unwrap();
    let got = collect_i32(&mut scan, ScanDir::Backward, &shape, &index.descr);
    assert_eq!(got.len(), 4_999);
    assert_eq!(got[0], 29_999);
    assert_eq!(*got.last().unwrap(), 25_001);

    // both bounds, walked from the upper end.
    scan.rescan(&[
        ScanKey::new(1, StrategyOp::Ge, Datum::Int4(1000)),
        ScanKey::new(1, StrategyOp::Le, Datum::Int4(1100)),
    ])
    .unwrap();
    let got = collect_i32(&mut scan, ScanDir::Backward, &shape, &index.descr);
    assert_eq!(got, (1000..=1100).rev().collect::<Vec<i32>>());

    scan.end_scan().unwrap();
    index.purge().unwrap();
}

// A run of duplicates split across leaves: the backward boundary leaf
// is the one whose high-key exceeds an inclusive bound, not the first
// one reaching it. The split run also writes a v2 continuation leaf,
// read back here by a real scan.
#[test]
fn test_backward_duplicates_span_leaves() {
    let mut keys = vec![];
    keys.extend(std::iter::repeat(10).take(1000));
    keys.extend(std::iter::repeat(42).take(70_000));
    keys.extend(std::iter::repeat(99).take(1000));
    let index = build_int4("back-dup-span", &keys);
    let stats = index.to_stats();
    assert!(stats.n_leaves > 1, "leaves {}", stats.n_leaves);
    assert!(stats.n_rle_leaves > 1, "stats {:?}", stats);
    let shape = TupleShape::new(&index.descr);

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();

    // inclusive upper bound sitting on the split run.
    scan.rescan(&[ScanKey::new(1, StrategyOp::Le, Datum::Int4(42))]).unwrap();
    let got = collect_i32(&mut scan, ScanDir::Backward, &shape, &index.descr);
    assert_eq!(got.len(), 71_000);
    assert_eq!(got[0], 42);
    assert_eq!(*got.last().unwrap(), 10);
    assert_eq!(got.iter().filter(|k| **k == 42).count(), 70_000);

    // equality across the same split, both directions agree.
    scan.rescan(&[ScanKey::new(1, StrategyOp::Eq, Datum::Int4(42))]).unwrap();
    let back = collect_i32(&mut scan, ScanDir::Backward, &shape, &index.descr);
    assert_eq!(back.len(), 70_000);
    scan.rescan(&[ScanKey::new(1, StrategyOp::Eq, Datum::Int4(42))]).unwrap();
    let fwd = collect_i32(&mut scan, ScanDir::Forward, &shape, &index.descr);
    assert_eq!(fwd.len(), 70_000);

    scan.end_scan().unwrap();
    index.purge().unwrap();
}

#[test]
fn test_equality_with_bloom() {
    let seed: u64 = random();
    println!("test_equality_with_bloom seed {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    // sparse keys so absent probes are plentiful.
    let keys: Vec<i32> = (0..100_000).map(|i| i * 3).collect();
    let index = build_int4("bloom-eq", &keys);
    assert!(index.to_stats().bloom_enabled);
    let shape = TupleShape::new(&index.descr);

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    for _ in 0..50 {
        let probe: i32 = rng.gen_range(0..300_000);
        scan.rescan(&[ScanKey::new(1, StrategyOp::Eq, Datum::Int4(probe))])
            .unwrap();
        let got = collect_i32(&mut scan, ScanDir::Forward, &shape, &index.descr);
        if probe % 3 == 0 && probe < 300_000 {
            assert_eq!(got, vec![probe]);
        } else {
            assert!(got.is_empty(), "probe {} got {:?}", probe, got);
        }
    }
    scan.end_scan().unwrap();
    index.purge().unwrap();
}

// Wide text keys force a height-2 tree, so descent actually runs the
// zone-map and bloom pruning over level-1 subtrees.
#[test]
fn test_pruning_on_deep_tree() {
    let words: Vec<String> = (0..60_000).map(|i| format!("padded-key-{:017}", i * 3_u64)).collect();
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Text(32)));
    let rows = words
        .iter()
        .map(|w| Row::new(vec![Datum::Text(w.clone())]))
        .collect();
    let index = build("deep-tree", descr, rows);
    assert!(index.height() >= 2, "height {}", index.height());
    assert!(index.to_stats().bloom_enabled);
    let shape = TupleShape::new(&index.descr);

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    // present and absent equality probes; absent ones exercise the
    // bloom skip, present ones must survive it.
    for i in [0_u64, 29_999, 59_999] {
        let probe = format!("padded-key-{:017}", i * 3);
        scan.rescan(&[ScanKey::new(1, StrategyOp::Eq, Datum::Text(probe.clone()))])
            .unwrap();
        let mut hits = 0;
        while let Some(tuple) = scan.gettuple(ScanDir::Forward).unwrap() {
            let values = tuple.deform(&shape, &index.descr).unwrap();
            assert_eq!(values[0], Datum::Text(probe.clone()));
            hits += 1;
        }
        assert_eq!(hits, 1, "probe {}", probe);
    }
    for i in [1_u64, 50_000, 179_999] {
        let probe = format!("padded-key-{:017}", i);
        if i % 3 == 0 && i < 180_000 {
            continue;
        }
        scan.rescan(&[ScanKey::new(1, StrategyOp::Eq, Datum::Text(probe))])
            .unwrap();
        assert!(scan.gettuple(ScanDir::Forward).unwrap().is_none());
    }

    // a bounded range across subtree boundaries stays complete.
    let lo = format!("padded-key-{:017}", 90_000_u64);
    let hi = format!("padded-key-{:017}", 120_000_u64);
    scan.rescan(&[
        ScanKey::new(1, StrategyOp::Ge, Datum::Text(lo)),
        ScanKey::new(1, StrategyOp::Lt, Datum::Text(hi)),
    ])
    .unwrap();
    let mut count = 0;
    while scan.gettuple(ScanDir::Forward).unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 10_000);
    scan.end_scan().unwrap();

    index.purge().unwrap();
}

// Invariant: two identical rescans yield identical sequences.
#[test]
fn test_rescan_idempotence() {
    let seed: u64 = random();
    println!("test_rescan_idempotence seed {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let keys: Vec<i32> = (0..50_000).map(|_| rng.gen_range(0..5000)).collect();
    let index = build_int4("rescan-idem", &keys);
    let shape = TupleShape::new(&index.descr);

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    let keyset = [ScanKey::new(1, StrategyOp::Ge, Datum::Int4(2500))];

    scan.rescan(&keyset).unwrap();
    let first = collect_i32(&mut scan, ScanDir::Forward, &shape, &index.descr);
    scan.rescan(&keyset).unwrap();
    let second = collect_i32(&mut scan, ScanDir::Forward, &shape, &index.descr);
    assert_eq!(first, second);
    assert!(!first.is_empty());

    scan.end_scan().unwrap();
    index.purge().unwrap();
}

#[test]
fn test_scan_contract_errors() {
    let keys: Vec<i32> = (0..1000).collect();
    let index = build_int4("contract", &keys);

    // scans hold a duplicated descriptor; keep them scoped so the
    // purge below can take its exclusive lock.
    {
        // gettuple before rescan is a host bug.
        let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
        assert!(matches!(
            scan.gettuple(ScanDir::Forward),
            Err(Error::Internal(_, _))
        ));
    }
    {
        // scans that do not want index tuples cannot be served.
        let mut scan = index
            .begin_scan(ScanOpts::default().set_want_itup(false))
            .unwrap();
        scan.rescan(&[]).unwrap();
        assert!(matches!(
            scan.gettuple(ScanDir::Forward),
            Err(Error::NonIndexOnly(_, _))
        ));
    }
    {
        let mut scan = index.begin_scan(ScanOpts::default()).unwrap();

        // IS NULL probes cannot match: the index holds no nulls.
        assert!(matches!(
            scan.rescan(&[ScanKey::is_null(1)]),
            Err(Error::NullKey(_, _))
        ));

        // scan keys on a missing attribute.
        assert!(matches!(
            scan.rescan(&[ScanKey::new(2, StrategyOp::Eq, Datum::Int4(1))]),
            Err(Error::InvalidInput(_, _))
        ));

        // direction cannot flip mid-cycle.
        scan.rescan(&[]).unwrap();
        assert!(scan.gettuple(ScanDir::Forward).unwrap().is_some());
        assert!(matches!(
            scan.gettuple(ScanDir::Backward),
            Err(Error::Internal(_, _))
        ));
    }

    index.purge().unwrap();
}

struct InterruptingHost {
    raised: AtomicBool,
}

impl crate::config::HostHooks for InterruptingHost {
    fn interrupt_requested(&self) -> bool {
        self.raised.load(AtomicOrdering::SeqCst)
    }
}

// Invariant: a raised interrupt stops the scan at the next leaf advance.
#[test]
fn test_interrupt_between_leaves() {
    let keys: Vec<i32> = (0..100_000).collect();
    let index = build_int4("interrupt", &keys);
    assert!(index.to_stats().n_leaves > 1);

    let hooks = std::sync::Arc::new(InterruptingHost {
        raised: AtomicBool::new(true),
    });
    let mut scan = index
        .begin_scan(ScanOpts::default().set_hooks(hooks))
        .unwrap();
    scan.rescan(&[]).unwrap();

    let mut emitted = 0_u64;
    let err = loop {
        match scan.gettuple(ScanDir::Forward) {
            Ok(Some(_)) => emitted += 1,
            Ok(None) => panic!("scan must be interrupted before draining"),
            Err(err) => break err,
        }
    };
    assert!(matches!(err, Error::Interrupted(_, _)), "{}", err);
    // only the first leaf got out.
    assert!(emitted < 100_000);

    drop(scan);
    index.purge().unwrap();
}

// All tunable variants must agree with the default configuration.
#[test]
fn test_tunable_variants_agree() {
    let seed: u64 = random();
    println!("test_tunable_variants_agree seed {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let keys: Vec<i32> = (0..60_000).map(|_| rng.gen_range(0..3000)).collect();
    let index = build_int4("tunables", &keys);
    let shape = TupleShape::new(&index.descr);
    let keyset = [
        ScanKey::new(1, StrategyOp::Ge, Datum::Int4(500)),
        ScanKey::new(1, StrategyOp::Lt, Datum::Int4(2500)),
    ];

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    scan.rescan(&keyset).unwrap();
    let want = collect_i32(&mut scan, ScanDir::Forward, &shape, &index.descr);
    scan.end_scan().unwrap();

    let variants: Vec<Box<dyn Fn(&mut Tunables)>> = vec![
        Box::new(|t| t.use_position_scan = false),
        Box::new(|t| t.use_tuple_buffering = false),
        Box::new(|t| t.tuple_buffer_size = 2),
        Box::new(|t| t.prefetch_depth = 0),
        Box::new(|t| t.bloom_filters_enabled = false),
        Box::new(|t| t.test_force_page_bounds_check = true),
    ];
    for (i, tweak) in variants.iter().enumerate() {
        let mut tun = Tunables::default();
        tweak(&mut tun);
        let mut scan = index
            .begin_scan(ScanOpts::default().set_tunables(tun))
            .unwrap();
        scan.rescan(&keyset).unwrap();
        let got = collect_i32(&mut scan, ScanDir::Forward, &shape, &index.descr);
        assert_eq!(got, want, "variant {}", i);
        scan.end_scan().unwrap();
    }

    index.purge().unwrap();
}

// Fuzz: an RLE-built index must emit exactly what a plain reference
// (the sorted input) predicts.
#[test]
fn test_rle_matches_plain_reference() {
    let seed: u64 = random();
    println!("test_rle_matches_plain_reference seed {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    for round in 0..4 {
        let n: usize = rng.gen_range(1000..30_000);
        let spread: i32 = *[3, 17, 100, 10_000].choose(&mut rng).unwrap();
        let keys: Vec<i32> = (0..n).map(|_| rng.gen_range(0..spread)).collect();

        let name = format!("rle-fuzz-{}", round);
        let index = build_int4(&name, &keys);
        let shape = TupleShape::new(&index.descr);

        let lo = rng.gen_range(0..spread);
        let hi = rng.gen_range(lo..=spread);
        let mut want: Vec<i32> = keys.iter().cloned().filter(|k| *k >= lo && *k < hi).collect();
        want.sort();

        let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
        scan.rescan(&[
            ScanKey::new(1, StrategyOp::Ge, Datum::Int4(lo)),
            ScanKey::new(1, StrategyOp::Lt, Datum::Int4(hi)),
        ])
        .unwrap();
        let got = collect_i32(&mut scan, ScanDir::Forward, &shape, &index.descr);
        assert_eq!(got, want, "round {} lo {} hi {}", round, lo, hi);
        scan.end_scan().unwrap();

        index.purge().unwrap();
    }
}

// Round-trip: every key value planted at build answers a point query.
#[test]
fn test_point_query_roundtrip_text() {
    let words: Vec<String> = (0..5000).map(|i| format!("key-{:05}", i * 7)).collect();
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Text(16)));
    let rows = words
        .iter()
        .map(|w| Row::new(vec![Datum::Text(w.clone())]))
        .collect();
    let index = build("text-roundtrip", descr, rows);
    let shape = TupleShape::new(&index.descr);

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    for probe in ["key-00000", "key-00700", "key-34993"] {
        scan.rescan(&[ScanKey::new(1, StrategyOp::Eq, Datum::Text(probe.to_string()))])
            .unwrap();
        let mut hits = 0;
        while let Some(tuple) = scan.gettuple(ScanDir::Forward).unwrap() {
            let values = tuple.deform(&shape, &index.descr).unwrap();
            assert_eq!(values[0], Datum::Text(probe.to_string()));
            hits += 1;
        }
        assert_eq!(hits, 1, "probe {}", probe);
    }

    // text range scan keeps byte order.
    scan.rescan(&[ScanKey::new(1, StrategyOp::Ge, Datum::Text("key-34".to_string()))])
        .unwrap();
    let mut prev: Option<String> = None;
    let mut count = 0;
    while let Some(tuple) = scan.gettuple(ScanDir::Forward).unwrap() {
        let values = tuple.deform(&shape, &index.descr).unwrap();
        let word = match values.into_iter().next().unwrap() {
            Datum::Text(word) => word,
            datum => panic!("unexpected {:?}", datum),
        };
        if let Some(prev) = &prev {
            assert!(prev <= &word);
        }
        prev = Some(word);
        count += 1;
    }
    assert_eq!(count, words.iter().filter(|w| w.as_str() >= "key-34").count());
    scan.end_scan().unwrap();

    index.purge().unwrap();
}

#[test]
fn test_scan_uuid_and_timestamp() {
    // uuid point query.
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Uuid));
    let rows: Vec<Row> = (0..2000_u32)
        .map(|i| {
            let mut bytes = [0_u8; 16];
            bytes[..4].copy_from_slice(&i.to_be_bytes());
            Row::new(vec![Datum::Uuid(uuid::Uuid::from_bytes(bytes))])
        })
        .collect();
    let index = build("uuid-scan", descr, rows);
    let shape = TupleShape::new(&index.descr);

    let mut probe = [0_u8; 16];
    probe[..4].copy_from_slice(&1234_u32.to_be_bytes());
    let probe = uuid::Uuid::from_bytes(probe);

    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    scan.rescan(&[ScanKey::new(1, StrategyOp::Eq, Datum::Uuid(probe))])
        .unwrap();
    let tuple = scan.gettuple(ScanDir::Forward).unwrap().unwrap();
    assert_eq!(
        tuple.deform(&shape, &index.descr).unwrap()[0],
        Datum::Uuid(probe)
    );
    assert!(scan.gettuple(ScanDir::Forward).unwrap().is_none());
    scan.end_scan().unwrap();
    index.purge().unwrap();

    // timestamp range.
    let base = NaiveDate::from_ymd(2024, 1, 1).and_hms(0, 0, 0);
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Timestamp));
    let rows: Vec<Row> = (0..5000_i64)
        .map(|i| Row::new(vec![Datum::Timestamp(base + chrono::Duration::seconds(i))]))
        .collect();
    let index = build("ts-scan", descr, rows);
    let shape = TupleShape::new(&index.descr);

    let cutoff = base + chrono::Duration::seconds(4990);
    let mut scan = index.begin_scan(ScanOpts::default()).unwrap();
    scan.rescan(&[ScanKey::new(1, StrategyOp::Ge, Datum::Timestamp(cutoff))])
        .unwrap();
    let mut count = 0;
    while let Some(tuple) = scan.gettuple(ScanDir::Forward).unwrap() {
        let values = tuple.deform(&shape, &index.descr).unwrap();
        match &values[0] {
            Datum::Timestamp(t) => assert!(*t >= cutoff),
            datum => panic!("unexpected {:?}", datum),
        }
        count += 1;
    }
    assert_eq!(count, 10);
    scan.end_scan().unwrap();
    index.purge().unwrap();
}
