mod common;

use backup_archive::{read_all_entries, ArchiveFactory, WriterOptions};
use common::{all_formats, SharedSink};
use proptest::prelude::*;
use std::io::{Cursor, Read};
use tempfile::tempdir;

fn write_archive(format: &str, entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let sink = SharedSink::default();
    let mut writer = ArchiveFactory::global()
        .create_writer(format, Box::new(sink.clone()))
        .unwrap();
    for (name, data) in entries {
        let copied = writer.add_entry(name, &mut data.as_slice()).unwrap();
        assert_eq!(copied, data.len() as u64);
    }
    assert_eq!(writer.entry_count(), entries.len());
    writer.close().unwrap();
    sink.bytes()
}

fn read_archive(format: &str, bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
    let mut reader = ArchiveFactory::global()
        .create_reader(format, Box::new(Cursor::new(bytes)))
        .unwrap();
    let entries = read_all_entries(&mut *reader)
        .unwrap()
        .into_iter()
        .map(|(name, data)| (name.into_string(), data))
        .collect();
    reader.close().unwrap();
    entries
}

#[test]
fn concrete_entries_read_back_in_order() {
    let entries = vec![
        ("a.txt".to_string(), b"hello".to_vec()),
        ("dir/b.txt".to_string(), b"world".to_vec()),
    ];
    for format in all_formats() {
        let bytes = write_archive(format, &entries);
        assert_eq!(read_archive(format, bytes), entries, "{format}");
    }
}

#[test]
fn empty_archive_reads_back_empty() {
    for format in all_formats() {
        let bytes = write_archive(format, &[]);
        assert!(!bytes.is_empty(), "{format}: container trailer missing");
        assert!(read_archive(format, bytes).is_empty(), "{format}");
    }
}

#[test]
fn same_entries_give_same_archive() {
    let entries = vec![
        ("config/app.toml".to_string(), b"[server]\nport = 8080\n".to_vec()),
        ("data/blob.bin".to_string(), (0..=255u8).cycle().take(200_000).collect()),
        ("empty".to_string(), Vec::new()),
    ];
    for format in all_formats() {
        let first = write_archive(format, &entries);
        let second = write_archive(format, &entries);
        assert_eq!(first, second, "{format}: output is not deterministic");
        assert_eq!(read_archive(format, first), read_archive(format, second));
    }
}

#[test]
fn large_entry_streams_through() {
    // larger than one copy chunk and than the deflate flush threshold
    let data: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let entries = vec![("big.bin".to_string(), data)];
    for format in all_formats() {
        let bytes = write_archive(format, &entries);
        assert_eq!(read_archive(format, bytes), entries, "{format}");
    }
}

#[test]
fn entries_can_be_streamed_partially() {
    let entries = vec![
        ("one".to_string(), vec![1u8; 10_000]),
        ("two".to_string(), vec![2u8; 10_000]),
        ("three".to_string(), vec![3u8; 10]),
    ];
    for format in all_formats() {
        let bytes = write_archive(format, &entries);
        let mut reader = ArchiveFactory::global()
            .create_reader(format, Box::new(Cursor::new(bytes)))
            .unwrap();

        let mut first = reader.next_entry().unwrap().unwrap();
        let mut head = [0u8; 4];
        first.read_exact(&mut head).unwrap();
        assert_eq!(head, [1u8; 4]);
        drop(first);

        // skip "two" without touching it
        assert_eq!(reader.next_entry().unwrap().unwrap().name(), &"two");

        let mut third = reader.next_entry().unwrap().unwrap();
        assert_eq!(third.size(), Some(10));
        assert_eq!(third.read_to_vec().unwrap(), vec![3u8; 10]);
        drop(third);

        assert!(reader.next_entry().unwrap().is_none(), "{format}");
    }
}

#[test]
fn for_each_entry_visits_in_order() {
    let entries: Vec<_> = (0..20)
        .map(|i| (format!("dir{}/file{}.txt", i % 3, i), format!("content {i}").into_bytes()))
        .collect();
    for format in all_formats() {
        let bytes = write_archive(format, &entries);
        let mut reader = ArchiveFactory::global()
            .create_reader(format, Box::new(Cursor::new(bytes)))
            .unwrap();

        let mut seen = Vec::new();
        reader
            .for_each_entry(&mut |entry| {
                seen.push(entry.name().to_string());
                Ok(())
            })
            .unwrap();
        let expected: Vec<_> = entries.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(seen, expected, "{format}");
    }
}

#[test]
fn file_round_trip_by_extension() {
    let dir = tempdir().unwrap();
    let factory = ArchiveFactory::global();
    for format in all_formats() {
        let path = dir.path().join(format!("backup.{format}"));
        {
            let mut writer = factory
                .create_file_writer(&path, &WriterOptions::default())
                .unwrap();
            writer.add_entry("a.txt", &mut &b"hello"[..]).unwrap();
            writer.add_entry("dir/b.txt", &mut &b"world"[..]).unwrap();
            writer.close().unwrap();
        }

        let mut reader = factory.open_file_reader(&path).unwrap();
        let entries = read_all_entries(&mut *reader).unwrap();
        assert_eq!(entries.len(), 2, "{format}");
        assert_eq!(entries[1].0, "dir/b.txt");
        assert_eq!(entries[1].1, b"world");
    }
}

fn entry_set() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    let name = "[a-zA-Z0-9_-]{1,12}(/[a-zA-Z0-9_.-]{1,12}){0,3}"
        .prop_filter("'.' and '..' are not valid components", |n| {
            n.split('/').all(|c| c != "." && c != "..")
        });
    let content = prop::collection::vec(any::<u8>(), 0..4096);
    prop::collection::hash_map(name, content, 0..8).prop_map(|m| m.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_valid_entry_set_round_trips(entries in entry_set()) {
        for format in all_formats() {
            let bytes = write_archive(format, &entries);
            prop_assert_eq!(read_archive(format, bytes), entries.clone());
        }
    }
}

#[test]
fn zip_directory_members_are_skipped_through_factory() {
    use backup_archive::ZipEncoder;

    // layout written by `zip -r`: explicit directory members before their files
    let mut zip = ZipEncoder::new(Vec::new());
    zip.start_entry("dir/", None).unwrap();
    zip.start_entry("dir/file.txt", None).unwrap();
    zip.write_data(b"restored").unwrap();
    let bytes = zip.finish().unwrap();

    assert_eq!(
        read_archive("zip", bytes),
        [("dir/file.txt".to_string(), b"restored".to_vec())]
    );
}
