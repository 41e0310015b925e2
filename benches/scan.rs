use std::fmt::Write as _;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use yarrow::{Rules, ScanFlags};

/// `n` rules, each with a text, a hex and a regex string.
fn build_rules(n: usize) -> Rules {
    let mut source = String::new();
    for i in 0..n {
        writeln!(
            source,
            r#"rule r{i} : bench {{
                strings:
                    $t = "needle{i}" nocase
                    $h = {{ 4D 5A ?? {:02X} }}
                    $r = /id=[0-9]{{3}}-{i}/
                condition:
                    $t or $h at 0 or #r > 1
            }}"#,
            i % 256
        )
        .unwrap();
    }
    Rules::compile(&source).unwrap()
}

/// Pseudo-random haystack with a few planted needles.
fn haystack(len: usize) -> Vec<u8> {
    let mut state = 0x2545_F491_u32;
    let mut data: Vec<u8> = (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            b'a' + (state % 26) as u8
        })
        .collect();
    for (i, at) in (0..len).step_by(4096).enumerate() {
        let needle = format!("NEEDLE{i} id=123-{i}");
        let end = (at + needle.len()).min(len);
        data[at..end].copy_from_slice(&needle.as_bytes()[..end - at]);
    }
    data
}

fn bench_scan(c: &mut Criterion) {
    let data = haystack(1 << 20);
    let mut group = c.benchmark_group("scan_mem");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for &n in &[10, 100, 500] {
        let rules = build_rules(n);
        group.bench_function(format!("{n}_rules"), |b| {
            b.iter(|| rules.scan_mem(black_box(&data), ScanFlags::empty(), None));
        });
        group.bench_function(format!("{n}_rules_fast"), |b| {
            b.iter(|| rules.scan_mem(black_box(&data), ScanFlags::FAST_MODE, None));
        });
    }

    group.finish();
}

fn bench_rule_view(c: &mut Criterion) {
    let rules = build_rules(500);
    c.bench_function("enumerate_500_rules", |b| {
        b.iter(|| {
            for rule in rules.rules() {
                black_box(rule.tags().unwrap());
                black_box(rule.metadata().unwrap());
                black_box(rule.strings().unwrap());
            }
        });
    });
}

fn bench_throughput(c: &mut Criterion) {
    let rules = Arc::new(build_rules(100));
    let data = Arc::new(haystack(64 * 1024));

    let mut group = c.benchmark_group("throughput");
    group.measurement_time(Duration::from_secs(5));

    for &threads in &[1_u64, 2, 4, 8] {
        group.bench_function(format!("{threads}_threads"), |b| {
            b.iter_custom(|iters| {
                let per_thread = iters / threads;
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let rs = Arc::clone(&rules);
                        let input = Arc::clone(&data);
                        thread::spawn(move || {
                            let start = Instant::now();
                            for _ in 0..per_thread {
                                let _ = rs.scan_mem(&input, ScanFlags::empty(), None);
                            }
                            start.elapsed()
                        })
                    })
                    .collect();

                let mut max_elapsed = Duration::ZERO;
                for h in handles {
                    let elapsed = h.join().unwrap();
                    if elapsed > max_elapsed {
                        max_elapsed = elapsed;
                    }
                }
                max_elapsed
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_scan, bench_rule_view, bench_throughput);
criterion_main!(benches);
