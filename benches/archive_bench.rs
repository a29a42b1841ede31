use backup_archive::{read_all_entries, ArchiveFactory, CompressionMethod, Sink, WriterOptions};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::{self, Cursor, Write};
use std::sync::{Arc, Mutex};

fn generate_compressible_data(size: usize) -> Vec<u8> {
    // Pattern that compresses well
    let pattern = b"The quick brown fox jumps over the lazy dog. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}

fn generate_random_data(size: usize) -> Vec<u8> {
    // Pseudo-random data that doesn't compress well
    let mut data = Vec::with_capacity(size);
    let mut state = 0x12345678u32;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

fn format_size(size: usize) -> String {
    if size >= 1024 * 1024 {
        format!("{}MB", size / (1024 * 1024))
    } else {
        format!("{}KB", size / 1024)
    }
}

#[derive(Clone, Default)]
struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn write_one(format: &str, options: &WriterOptions, data: &[u8]) -> Vec<u8> {
    let sink = MemorySink::default();
    let boxed: Sink = Box::new(sink.clone());
    let mut writer = ArchiveFactory::global()
        .create_writer_with(format, boxed, options)
        .unwrap();
    writer.add_entry("test.bin", &mut black_box(data)).unwrap();
    writer.close().unwrap();
    let bytes = sink.0.lock().unwrap().clone();
    bytes
}

fn bench_write_formats(c: &mut Criterion) {
    let sizes = vec![
        10 * 1024,       // 10KB
        1024 * 1024,     // 1MB
        8 * 1024 * 1024, // 8MB
    ];

    for size in sizes {
        for (kind, data) in [
            ("compressible", generate_compressible_data(size)),
            ("random", generate_random_data(size)),
        ] {
            let mut group = c.benchmark_group(format!("write_{}_{}", kind, format_size(size)));
            group.throughput(Throughput::Bytes(size as u64));

            let mut cases = vec![
                ("zip_deflate", "zip", WriterOptions::default()),
                (
                    "zip_stored",
                    "zip",
                    WriterOptions::new().compression(CompressionMethod::Stored),
                ),
                ("tar", "tar", WriterOptions::default()),
                ("tar_gz", "tar.gz", WriterOptions::default()),
            ];
            #[cfg(feature = "zstd-support")]
            {
                cases.push((
                    "zip_zstd_3",
                    "zip",
                    WriterOptions::new()
                        .compression(CompressionMethod::Zstd)
                        .level(3),
                ));
                cases.push(("tar_zst_3", "tar.zst", WriterOptions::new().level(3)));
            }

            for (label, format, options) in &cases {
                group.bench_with_input(BenchmarkId::new(*label, size), &data, |b, data| {
                    b.iter(|| write_one(format, options, data));
                });
            }

            group.finish();
        }
    }
}

fn bench_many_small_entries(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_1000_small_entries");
    let data = generate_compressible_data(512);
    group.throughput(Throughput::Elements(1000));

    for format in ["zip", "tar", "tar.gz"] {
        group.bench_function(format, |b| {
            b.iter(|| {
                let mut writer = ArchiveFactory::global()
                    .create_writer(format, Box::new(io::sink()))
                    .unwrap();
                for i in 0..1000 {
                    writer
                        .add_entry(&format!("dir{}/file{}.txt", i % 10, i), &mut data.as_slice())
                        .unwrap();
                }
                writer.close().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_read_formats(c: &mut Criterion) {
    let size = 1024 * 1024;
    let data = generate_compressible_data(size);
    let mut group = c.benchmark_group("read_1MB");
    group.throughput(Throughput::Bytes(size as u64));

    for format in ["zip", "tar", "tar.gz"] {
        let archive = write_one(format, &WriterOptions::default(), &data);
        group.bench_with_input(BenchmarkId::new(format, size), &archive, |b, archive| {
            b.iter(|| {
                let mut reader = ArchiveFactory::global()
                    .create_reader(format, Box::new(Cursor::new(archive.clone())))
                    .unwrap();
                black_box(read_all_entries(&mut *reader).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_write_formats,
    bench_many_small_entries,
    bench_read_formats
);
criterion_main!(benches);
