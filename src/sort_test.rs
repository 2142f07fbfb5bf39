use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;
use crate::types::{Datum, IndexDescr, KeyAttr, KeyType};

fn arena_of_i64(keys: &[i64]) -> Vec<u8> {
    let mut arena = vec![];
    for key in keys {
        arena.extend_from_slice(&key.to_le_bytes());
    }
    arena
}

#[test]
fn test_sort_kind() {
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Int2));
    assert_eq!(pick_sort_kind(&descr), SortKind::RadixI16);
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Int4));
    assert_eq!(pick_sort_kind(&descr), SortKind::RadixI32);
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Int8));
    assert_eq!(pick_sort_kind(&descr), SortKind::RadixI64);
    let descr = IndexDescr::pair(KeyAttr::new(KeyType::Int8), KeyAttr::new(KeyType::Int8));
    assert_eq!(pick_sort_kind(&descr), SortKind::RadixI64Pair);
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Uuid));
    assert_eq!(pick_sort_kind(&descr), SortKind::Comparator);
    let descr = IndexDescr::pair(KeyAttr::new(KeyType::Date), KeyAttr::new(KeyType::Int4));
    assert_eq!(pick_sort_kind(&descr), SortKind::Comparator);
}

#[test]
fn test_radix_matches_reference() {
    let seed: u64 = random();
    println!("test_radix_matches_reference seed {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    for n in [0_usize, 1, 2, 1000, 10_000] {
        let keys: Vec<i64> = (0..n).map(|_| rng.gen::<i64>() >> rng.gen_range(0..40)).collect();
        let arena = arena_of_i64(&keys);
        let descr = IndexDescr::single(KeyAttr::new(KeyType::Int8));

        let order = sort_rows(&arena, 8, n, &descr).unwrap();
        let sorted: Vec<i64> = order.iter().map(|id| keys[*id as usize]).collect();
        let mut want = keys.clone();
        want.sort();
        assert_eq!(sorted, want, "n {}", n);
    }
}

#[test]
fn test_radix_is_stable() {
    // duplicate keys must keep their arrival order.
    let keys: Vec<i64> = vec![5, 1, 5, 1, 5, 1];
    let arena = arena_of_i64(&keys);
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Int8));

    let order = sort_rows(&arena, 8, keys.len(), &descr).unwrap();
    assert_eq!(order, vec![1, 3, 5, 0, 2, 4]);
}

#[test]
fn test_radix_pair() {
    let seed: u64 = random();
    println!("test_radix_pair seed {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let n = 5000;
    let pairs: Vec<(i64, i64)> = (0..n)
        .map(|_| (rng.gen_range(-50..50), rng.gen_range(-1000..1000)))
        .collect();
    let mut arena = vec![];
    for (k1, k2) in pairs.iter() {
        arena.extend_from_slice(&k1.to_le_bytes());
        arena.extend_from_slice(&k2.to_le_bytes());
    }
    let descr = IndexDescr::pair(KeyAttr::new(KeyType::Int8), KeyAttr::new(KeyType::Int8));

    let order = sort_rows(&arena, 16, n, &descr).unwrap();
    let sorted: Vec<(i64, i64)> = order.iter().map(|id| pairs[*id as usize]).collect();
    let mut want = pairs.clone();
    want.sort();
    assert_eq!(sorted, want);
}

#[test]
fn test_comparator_sort_text() {
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Text(8)));
    let words = ["pear", "apple", "fig", "applesauce", "app"];
    let mut arena = vec![];
    for word in words.iter() {
        let mut row = vec![0_u8; 8];
        Datum::Text(word.to_string())
            .encode_into(&KeyType::Text(8), &mut row)
            .unwrap();
        arena.extend_from_slice(&row);
    }

    let order = sort_rows(&arena, 8, words.len(), &descr).unwrap();
    let sorted: Vec<&str> = order.iter().map(|id| words[*id as usize]).collect();
    assert_eq!(sorted, vec!["app", "apple", "applesauce", "fig", "pear"]);
}

#[test]
fn test_comparator_sort_matches_radix() {
    let seed: u64 = random();
    println!("test_comparator_sort_matches_radix seed {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    // int2 through the radix path and a reference sort must agree.
    let n = 3000;
    let keys: Vec<i16> = (0..n).map(|_| rng.gen()).collect();
    let mut arena = vec![];
    for key in keys.iter() {
        arena.extend_from_slice(&key.to_le_bytes());
    }
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Int2));

    let order = sort_rows(&arena, 2, n, &descr).unwrap();
    let sorted: Vec<i16> = order.iter().map(|id| keys[*id as usize]).collect();
    let mut want = keys.clone();
    want.sort();
    assert_eq!(sorted, want);
}
