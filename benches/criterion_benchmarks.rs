use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use oxipack::archive::sha256_hex;
use oxipack::diff::rolling::{BlockIndex, RollingHash, WINDOW};
use oxipack::diff::{decode, encode};
use std::fs;
use std::path::Path;

fn gen_data(size: usize, seed: u64) -> Vec<u8> {
    let mut s = seed;
    let mut out = Vec::with_capacity(size);
    for _ in 0..size {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        out.push((s >> 33) as u8);
    }
    out
}

fn mutate(base: &[u8], stride: usize) -> Vec<u8> {
    let mut out = base.to_vec();
    for i in (0..out.len()).step_by(stride.max(1)) {
        out[i] = out[i].wrapping_add(1);
    }
    out
}

fn write_ratio_snapshot() {
    let source = gen_data(2 * 1024 * 1024, 123);
    let mut csv = String::from("stride,delta_bytes,target_bytes,ratio\n");
    for stride in [256usize, 1024, 4096, 16384, 65536] {
        let target = mutate(&source, stride);
        let delta = encode(&source, &target);
        let ratio = delta.len() as f64 / target.len() as f64;
        csv.push_str(&format!(
            "{stride},{},{},{}\n",
            delta.len(),
            target.len(),
            ratio
        ));
    }
    let out_dir = Path::new("target/criterion/custom_reports");
    let _ = fs::create_dir_all(out_dir);
    let _ = fs::write(out_dir.join("ratio_snapshot.csv"), csv);
}

fn bench_diff_speed(c: &mut Criterion) {
    let mut g = c.benchmark_group("diff_speed_mb_s");
    for size in [64 * 1024usize, 1024 * 1024, 8 * 1024 * 1024] {
        let source = gen_data(size, 1);
        let target = mutate(&source, 1024);
        g.throughput(Throughput::Bytes(size as u64));
        g.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let delta = encode(black_box(&source), black_box(&target));
                black_box(delta);
            });
        });
    }
    g.finish();
}

fn bench_patch_speed(c: &mut Criterion) {
    let mut g = c.benchmark_group("patch_speed_vs_delta");
    for size in [64 * 1024usize, 1024 * 1024, 8 * 1024 * 1024] {
        let source = gen_data(size, 2);
        let target = mutate(&source, 2048);
        let delta = encode(&source, &target);
        g.throughput(Throughput::Bytes(delta.len() as u64));
        g.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let out = decode(black_box(&source), black_box(&delta)).unwrap();
                black_box(out);
            });
        });
    }
    g.finish();
}

fn bench_ratio_vs_stride(c: &mut Criterion) {
    write_ratio_snapshot();
    let mut g = c.benchmark_group("delta_ratio_vs_stride");
    let source = gen_data(2 * 1024 * 1024, 3);
    for stride in [256usize, 4096, 65536] {
        let target = mutate(&source, stride);
        g.bench_with_input(BenchmarkId::from_parameter(stride), &stride, |b, _| {
            b.iter(|| {
                let delta = encode(&source, &target);
                let ratio = delta.len() as f64 / target.len() as f64;
                black_box(ratio);
            });
        });
    }
    g.finish();
}

fn bench_block_index(c: &mut Criterion) {
    let mut g = c.benchmark_group("block_index_build");
    for size in [256 * 1024usize, 4 * 1024 * 1024] {
        let source = gen_data(size, 4);
        let probe = RollingHash::new(&source[size / 2..size / 2 + WINDOW]).digest();
        g.throughput(Throughput::Bytes(size as u64));
        g.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let index = BlockIndex::build(black_box(&source));
                black_box(index.lookup(probe));
            });
        });
    }
    g.finish();
}

fn bench_content_hash(c: &mut Criterion) {
    let mut g = c.benchmark_group("payload_sha256");
    for size in [64 * 1024usize, 8 * 1024 * 1024] {
        let data = gen_data(size, 5);
        g.throughput(Throughput::Bytes(size as u64));
        g.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(sha256_hex(black_box(&data))));
        });
    }
    g.finish();
}

fn bench_release_scenarios(c: &mut Criterion) {
    let mut g = c.benchmark_group("release_scenarios");
    let scenarios = [
        ("patch_release", 4 * 1024 * 1024usize, 65536usize),
        ("minor_release", 4 * 1024 * 1024usize, 4096usize),
        ("resource_bundle", 16 * 1024 * 1024usize, 8192usize),
        ("config_file", 16 * 1024usize, 512usize),
    ];

    for (name, size, stride) in scenarios {
        let source = gen_data(size, size as u64);
        let target = mutate(&source, stride);
        g.throughput(Throughput::Bytes(size as u64));
        g.bench_function(name, |b| {
            b.iter(|| {
                let delta = encode(&source, &target);
                let out = decode(&source, &delta).unwrap();
                black_box(out);
            });
        });
    }
    g.finish();
}

criterion_group!(
    benches,
    bench_diff_speed,
    bench_patch_speed,
    bench_ratio_vs_stride,
    bench_block_index,
    bench_content_hash,
    bench_release_scenarios
);
criterion_main!(benches);
