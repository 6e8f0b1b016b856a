use std::fs;
use std::path::Path;
use tempfile::tempdir;

use chunk_courier::chunk::{self, chunk_name};
use proptest::prelude::*;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn concat_chunks(dir: &Path, name: &str, count: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for ordinal in 1..=count as u64 {
        out.extend(fs::read(dir.join(chunk_name(name, ordinal))).unwrap());
    }
    out
}

#[test]
fn test_900_with_500_chunks() {
    // Same shape as 900MB with 500MB chunks, scaled down to bytes.
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("a.tar");
    let data = pattern(900);
    fs::write(&source, &data).unwrap();

    let split = chunk::split(&source, 500).unwrap();
    assert!(!split.renamed_in_place);
    assert_eq!(split.chunks.len(), 2);
    assert_eq!(split.chunks[0].size_bytes, 500);
    assert_eq!(split.chunks[1].size_bytes, 400);
    assert_eq!(
        fs::metadata(tmp.path().join("a.tar._1")).unwrap().len(),
        500
    );
    assert_eq!(
        fs::metadata(tmp.path().join("a.tar._2")).unwrap().len(),
        400
    );
    assert_eq!(concat_chunks(tmp.path(), "a.tar", 2), data);
    assert_eq!(split.digest, Some(blake3::hash(&data)));
}

#[test]
fn test_file_equal_to_chunk_size_is_renamed() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("b.tar");
    fs::write(&source, pattern(64)).unwrap();

    let split = chunk::split(&source, 64).unwrap();
    assert!(split.renamed_in_place);
    assert!(!source.exists());
    assert_eq!(split.chunks[0].path, tmp.path().join("b.tar._1"));
}

#[test]
fn test_split_then_join_roundtrip_in_other_dir() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("c.tar");
    let data = pattern(1000);
    fs::write(&source, &data).unwrap();

    chunk::split(&source, 300).unwrap();
    fs::remove_file(&source).unwrap();

    let out_dir = tempdir().unwrap();
    let output = out_dir.path().join("c.tar");
    let joined = chunk::reassemble(tmp.path(), "c.tar", &output).unwrap();
    assert_eq!(joined.chunks, 4);
    assert_eq!(fs::read(&output).unwrap(), data);
}

#[test]
fn test_join_ignores_other_originals() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("x.tar._1"), b"xx").unwrap();
    fs::write(tmp.path().join("y.tar._1"), b"yy").unwrap();
    fs::write(tmp.path().join("x.tar._2"), b"XX").unwrap();

    let output = tmp.path().join("x.tar");
    let joined = chunk::reassemble(tmp.path(), "x.tar", &output).unwrap();
    assert_eq!(joined.chunks, 2);
    assert_eq!(fs::read(&output).unwrap(), b"xxXX");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_chunk_count_and_bytes(size in 0usize..400, chunk_size in 1u64..80) {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("p.tar");
        let data = pattern(size);
        fs::write(&source, &data).unwrap();

        let split = chunk::split(&source, chunk_size).unwrap();
        let expected = if size as u64 <= chunk_size {
            1
        } else {
            (size as u64).div_ceil(chunk_size) as usize
        };
        prop_assert_eq!(split.chunks.len(), expected);

        let ordinals: Vec<u64> = split.chunks.iter().map(|c| c.ordinal).collect();
        let contiguous: Vec<u64> = (1..=expected as u64).collect();
        prop_assert_eq!(ordinals, contiguous);
        prop_assert!(split.chunks.iter().all(|c| c.size_bytes <= chunk_size.max(size as u64)));
        prop_assert!(split.chunks[..expected - 1].iter().all(|c| c.size_bytes == chunk_size));
        prop_assert_eq!(concat_chunks(tmp.path(), "p.tar", expected), data);
    }
}

#[test]
fn test_write_failure_keeps_source_and_promotes_nothing_partial() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("a.tar");
    let data = pattern(900);
    fs::write(&source, &data).unwrap();
    // A directory where the second chunk's temp file should go makes that
    // write fail after the first chunk is already in place.
    let blocker = tmp.path().join("a.tar._2.temp");
    fs::create_dir(&blocker).unwrap();

    let result = chunk::split(&source, 500);
    assert!(matches!(result, Err(chunk_courier::Error::Io(_))));
    assert!(source.exists());
    assert_eq!(fs::read(&source).unwrap(), data);
    assert!(!tmp.path().join("a.tar._2").exists());
    assert_eq!(
        fs::metadata(tmp.path().join("a.tar._1")).unwrap().len(),
        500
    );

    // Once the obstruction is gone the same file splits cleanly.
    fs::remove_dir(&blocker).unwrap();
    let split = chunk::split(&source, 500).unwrap();
    assert_eq!(split.chunks.len(), 2);
    assert_eq!(concat_chunks(tmp.path(), "a.tar", 2), data);
}
