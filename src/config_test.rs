use super::*;
use crate::types::{IndexDescr, KeyAttr, KeyType};

#[test]
fn test_tunables_defaults() {
    let tun = Tunables::default();
    assert!(!tun.debug_log);
    assert!(!tun.profile);
    assert_eq!(tun.prefetch_depth, 8);
    assert!(tun.bloom_filters_enabled);
    assert!(tun.use_position_scan);
    assert!(tun.use_tuple_buffering);
    assert_eq!(tun.tuple_buffer_size, 64);
    assert!(!tun.test_force_page_bounds_check);
}

#[test]
fn test_tunables_from_toml() {
    let text = r#"
        debug_log = true
        prefetch_depth = 2
        tuple_buffer_size = 16
    "#;
    let tun = Tunables::from_toml(text).unwrap();
    assert!(tun.debug_log);
    assert_eq!(tun.prefetch_depth, 2);
    assert_eq!(tun.tuple_buffer_size, 16);
    // untouched keys keep their defaults.
    assert!(tun.use_position_scan);

    assert!(Tunables::from_toml("prefetch_depth = \"lots\"").is_err());
}

#[test]
fn test_tunables_global() {
    let before = tunables();
    let mut tun = before.clone();
    tun.profile = true;
    tun.prefetch_depth = 3;
    set_tunables(tun);

    let now = tunables();
    assert!(now.profile);
    assert_eq!(now.prefetch_depth, 3);

    set_tunables(before);
}

#[test]
fn test_config_setters() {
    let dir = std::env::temp_dir();
    let descr = IndexDescr::single(KeyAttr::new(KeyType::Int4));
    let mut config = Config::new(dir.as_os_str(), "cfg-test", descr);

    assert_eq!(config.flush_queue_size, FLUSH_QUEUE_SIZE);
    assert_eq!(config.bloom_nhash, BLOOM_NHASH);

    config.set_bloom(false, 7).set_flush_queue_size(8);
    assert!(!config.bloom_enabled);
    assert_eq!(config.bloom_nhash, 7);
    assert_eq!(config.flush_queue_size, 8);

    assert_eq!(config.fanout, None);
    config.set_fanout(0);
    assert_eq!(config.fanout, Some(2));
    config.set_fanout(128);
    assert_eq!(config.fanout, Some(128));

    let loc = config.to_index_location();
    let loc = loc.to_str().unwrap();
    assert!(loc.ends_with("cfg-test-ordix.indx"), "{}", loc);
}

#[test]
fn test_index_file_naming() {
    let dir = std::ffi::OsString::from("/var/data");
    let loc = to_index_location(&dir, "users-by-email");
    assert_eq!(loc.to_str().unwrap(), "/var/data/users-by-email-ordix.indx");

    // the name round-trips through the composed location.
    assert_eq!(index_name_of(&loc).unwrap(), "users-by-email");

    // foreign and degenerate file names are not ours.
    assert_eq!(index_name_of(std::ffi::OsStr::new("users.dat")), None);
    assert_eq!(index_name_of(std::ffi::OsStr::new("users-btree.indx")), None);
    assert_eq!(index_name_of(std::ffi::OsStr::new("-ordix.indx")), None);
}
