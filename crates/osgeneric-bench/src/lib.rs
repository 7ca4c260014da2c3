//! Shared reporting for the osgeneric criterion benches.
//!
//! Every bench prints one summary line per backend with percentile
//! ns/op figures, tagged with the `OSGENERIC_MODE` seen by the process.

use std::time::Duration;

use osgeneric_abi::runtime_policy::{self, Mode};

#[derive(Debug, Default)]
pub struct BenchStats {
    samples_ns_per_op: Vec<f64>,
    total_iters: u64,
    total_ns: u128,
}

impl BenchStats {
    pub fn record(&mut self, iters: u64, dur: Duration) {
        let ns = dur.as_nanos();
        self.total_iters = self.total_iters.saturating_add(iters);
        self.total_ns = self.total_ns.saturating_add(ns);
        if iters > 0 {
            self.samples_ns_per_op.push(ns as f64 / iters as f64);
        }
    }

    /// Prints `<tag> backend=.. bench=.. p50_ns_op=..` and friends.
    pub fn report(&self, tag: &str, backend: &str, bench_label: &str) {
        let mut samples = self.samples_ns_per_op.clone();
        if samples.is_empty() {
            return;
        }
        samples.sort_by(f64::total_cmp);

        let p50 = percentile_sorted(&samples, 0.50);
        let p95 = percentile_sorted(&samples, 0.95);
        let p99 = percentile_sorted(&samples, 0.99);
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let throughput_ops_s = if self.total_ns == 0 {
            0.0
        } else {
            self.total_iters as f64 / (self.total_ns as f64 / 1e9)
        };

        println!(
            "{tag} mode={} backend={backend} bench={bench_label} samples={} p50_ns_op={p50:.3} p95_ns_op={p95:.3} p99_ns_op={p99:.3} mean_ns_op={mean:.3} throughput_ops_s={throughput_ops_s:.3}",
            mode_label(),
            samples.len(),
        );
    }
}

/// Nearest-rank percentile of an ascending slice; 0 for an empty one.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!((0.0..=1.0).contains(&p));
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// The mode the ABI layer would resolve from this process's environment.
pub fn mode_label() -> &'static str {
    mode_label_for(std::env::var("OSGENERIC_MODE").ok().as_deref())
}

fn mode_label_for(raw: Option<&str>) -> &'static str {
    raw.map_or(Mode::Strict, runtime_policy::parse_mode_value).as_str()
}

pub fn print_env_metadata_once(tag: &str) {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let mode_raw = std::env::var("OSGENERIC_MODE").unwrap_or_else(|_| "<unset>".to_string());
        println!(
            "{tag}_META osgeneric_mode_env={mode_raw} default_backend={}",
            <osgeneric_core::DefaultBackend as osgeneric_core::Backend>::NAME
        );
    });
}
