//! Condition variable costs per backend:
//! - create/delete cycle
//! - signal with no waiters
//! - ping-pong round trip between two threads

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use osgeneric_bench::{BenchStats, print_env_metadata_once};
use osgeneric_core::sys::portable::Portable;
use osgeneric_core::{Backend, Condvar, Mutex};

const TAG: &str = "CONDVAR_BENCH";

struct PingPong<B: Backend> {
    lock: Mutex<B>,
    cv: Condvar<B>,
    /// Odd: the responder's turn. Even: the driver's turn.
    turn: AtomicU64,
    stop: AtomicBool,
}

fn run_responder<B: Backend>(pp: &PingPong<B>) {
    pp.lock.lock().expect("lock");
    loop {
        pp.cv
            .wait_while(&pp.lock, || {
                pp.turn.load(Ordering::Acquire) % 2 == 0 && !pp.stop.load(Ordering::Acquire)
            })
            .expect("wait");
        if pp.stop.load(Ordering::Acquire) {
            break;
        }
        pp.turn.fetch_add(1, Ordering::AcqRel);
        pp.cv.broadcast().expect("broadcast");
    }
    pp.lock.unlock().expect("unlock");
}

fn bench_backend<B: Backend>(c: &mut Criterion) {
    print_env_metadata_once(TAG);
    let mut group = c.benchmark_group("condvar_hotpath");
    group.throughput(Throughput::Elements(1));

    let stats = RefCell::new(BenchStats::default());
    group.bench_function(BenchmarkId::new("create_delete", B::NAME), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let cv = Condvar::<B>::with_backend().expect("create");
                black_box(&cv);
                cv.delete().expect("delete");
            }
            let dur = start.elapsed().max(Duration::from_nanos(1));
            stats.borrow_mut().record(iters, dur);
            dur
        });
    });
    stats.borrow().report(TAG, B::NAME, "create_delete");

    let cv = Condvar::<B>::with_backend().expect("create");
    let stats = RefCell::new(BenchStats::default());
    group.bench_function(BenchmarkId::new("signal_no_waiters", B::NAME), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                cv.signal().expect("signal");
            }
            let dur = start.elapsed().max(Duration::from_nanos(1));
            stats.borrow_mut().record(iters, dur);
            dur
        });
    });
    stats.borrow().report(TAG, B::NAME, "signal_no_waiters");

    let pp = Arc::new(PingPong {
        lock: Mutex::<B>::with_backend().expect("mutex"),
        cv: Condvar::<B>::with_backend().expect("condvar"),
        turn: AtomicU64::new(0),
        stop: AtomicBool::new(false),
    });
    let responder = {
        let pp = Arc::clone(&pp);
        std::thread::spawn(move || run_responder(&pp))
    };
    let stats = RefCell::new(BenchStats::default());
    group.bench_function(BenchmarkId::new("roundtrip", B::NAME), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            pp.lock.lock().expect("lock");
            for _ in 0..iters {
                pp.turn.fetch_add(1, Ordering::AcqRel);
                pp.cv.broadcast().expect("broadcast");
                pp.cv
                    .wait_while(&pp.lock, || pp.turn.load(Ordering::Acquire) % 2 == 1)
                    .expect("wait");
            }
            pp.lock.unlock().expect("unlock");
            let dur = start.elapsed().max(Duration::from_nanos(1));
            stats.borrow_mut().record(iters, dur);
            dur
        });
    });
    stats.borrow().report(TAG, B::NAME, "roundtrip");

    pp.lock.lock().expect("lock");
    pp.stop.store(true, Ordering::Release);
    pp.cv.broadcast().expect("broadcast");
    pp.lock.unlock().expect("unlock");
    responder.join().expect("responder");
    group.finish();
}

fn bench_portable(c: &mut Criterion) {
    bench_backend::<Portable>(c);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn bench_posix(c: &mut Criterion) {
    bench_backend::<osgeneric_core::sys::posix::Posix>(c);
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn bench_posix(_c: &mut Criterion) {}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(1))
        .measurement_time(Duration::from_secs(2))
        .sample_size(80);
    targets = bench_posix, bench_portable
);
criterion_main!(benches);
