//! Autosave simulator
//!
//! Replays a seeded stream of keystrokes across several keys against a
//! memory store with injected latency and failures, then checks that every
//! key ended on its last keystroke:
//! - a successful final outcome means the store holds the last payload
//! - a failed final outcome is tolerated (the failure was reported)
//! - a key with no outcome, or still busy after `save_all`, is a violation

use parking_lot::Mutex;
use quill_autosave::{
    Autosave, AutosaveConfig, PersistenceSink, SaveKey, SchedulerStats, SinkError, SubmitOptions,
};
use quill_store::MemoryStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Simulator configuration
#[derive(Debug, Clone)]
pub(crate) struct SimulatorConfig {
    /// Random seed for reproducibility
    pub(crate) seed: u64,
    /// Number of distinct keys typed into
    pub(crate) keys: usize,
    /// Total submissions across all keys
    pub(crate) keystrokes: u64,
    /// Pause between submissions
    pub(crate) typing_interval: Duration,
    /// Base sink latency
    pub(crate) latency: Duration,
    /// Extra random latency, uniform in `0..=jitter`
    pub(crate) jitter: Duration,
    /// Probability that a sink call fails
    pub(crate) failure_rate: f64,
    /// Scheduler configuration
    pub(crate) autosave: AutosaveConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            keys: 3,
            keystrokes: 200,
            typing_interval: Duration::from_millis(5),
            latency: Duration::from_millis(20),
            jitter: Duration::from_millis(10),
            failure_rate: 0.0,
            autosave: AutosaveConfig::new().with_default_delay(Duration::from_millis(50)),
        }
    }
}

/// Per-key verification result
#[derive(Debug, Clone, Serialize)]
pub(crate) struct KeyReport {
    pub(crate) key: String,
    pub(crate) keystrokes: u64,
    pub(crate) last_submitted: String,
    pub(crate) stored: Option<String>,
    pub(crate) final_success: Option<bool>,
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimulatorReport {
    pub(crate) seed: u64,
    pub(crate) elapsed_ms: u64,
    pub(crate) sink_writes: u64,
    pub(crate) stats: SchedulerStats,
    pub(crate) keys: Vec<KeyReport>,
    pub(crate) violations: Vec<String>,
    pub(crate) save_all_error: Option<String>,
}

impl SimulatorReport {
    /// True if no key violated the newest-wins check
    pub(crate) fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub(crate) fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Autosave Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.seed));
        report.push_str(&format!("Elapsed: {}ms\n", self.elapsed_ms));
        report.push_str(&format!("Submissions: {}\n", self.stats.submissions));
        report.push_str(&format!("Debounce Collapses: {}\n", self.stats.debounce_collapses));
        report.push_str(&format!("Enqueued: {}\n", self.stats.enqueued));
        report.push_str(&format!("Superseded: {}\n", self.stats.superseded));
        report.push_str(&format!("Executions: {}\n", self.stats.executions));
        report.push_str(&format!("Stale Settlements: {}\n", self.stats.stale));
        report.push_str(&format!("Failures: {}\n", self.stats.failures));
        report.push_str(&format!("Successful Writes: {}\n", self.sink_writes));

        report.push_str("\n=== Keys ===\n");
        for key in &self.keys {
            let outcome = match key.final_success {
                Some(true) => "saved",
                Some(false) => "failed",
                None => "none",
            };
            report.push_str(&format!(
                "{}: {} keystrokes, last {}, outcome {}\n",
                key.key, key.keystrokes, key.last_submitted, outcome
            ));
        }

        if let Some(err) = &self.save_all_error {
            report.push_str(&format!("\nsave_all reported: {err}\n"));
        }
        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, violation) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {violation}\n", i + 1));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

/// Memory store behind injected latency and failures
struct FaultySink {
    store: MemoryStore<String>,
    rng: Mutex<StdRng>,
    latency: Duration,
    jitter: Duration,
    failure_rate: f64,
}

impl FaultySink {
    fn draw(&self) -> (Duration, bool) {
        let mut rng = self.rng.lock();
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rng.random_range(0..=jitter_ms)
        };
        let fails = self.failure_rate > 0.0 && rng.random_bool(self.failure_rate);
        (self.latency + Duration::from_millis(extra), fails)
    }
}

#[async_trait::async_trait]
impl PersistenceSink<String> for FaultySink {
    async fn persist(&self, key: &SaveKey, payload: String) -> Result<(), SinkError> {
        let (latency, fails) = self.draw();
        tokio::time::sleep(latency).await;
        if fails {
            return Err(SinkError::Unavailable("injected failure".to_string()));
        }
        self.store.persist(key, payload).await
    }
}

/// Run the simulator
pub(crate) async fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let store = MemoryStore::new();
    let sink = FaultySink {
        store: store.clone(),
        rng: Mutex::new(StdRng::seed_from_u64(config.seed.wrapping_add(1))),
        latency: config.latency,
        jitter: config.jitter,
        failure_rate: config.failure_rate.clamp(0.0, 1.0),
    };
    let autosave = Autosave::new(config.autosave.clone(), sink);
    let names: Vec<String> = (0..config.keys.max(1)).map(|i| format!("doc-{i}")).collect();

    tracing::info!(
        seed = config.seed,
        keys = names.len(),
        keystrokes = config.keystrokes,
        "simulation started"
    );
    let started = Instant::now();

    let mut last: BTreeMap<String, (u64, String)> = BTreeMap::new();
    let mut violations = Vec::new();
    for i in 0..config.keystrokes {
        let name = &names[rng.random_range(0..names.len())];
        let payload = format!("{name}#{i}");
        if let Err(err) = autosave.submit(name, payload.clone(), SubmitOptions::default()) {
            violations.push(format!("submit {name} rejected: {err}"));
            continue;
        }
        let entry = last.entry(name.clone()).or_insert((0, String::new()));
        entry.0 += 1;
        entry.1 = payload;
        if !config.typing_interval.is_zero() {
            tokio::time::sleep(config.typing_interval).await;
        }
    }

    let save_all_error = autosave.save_all().await.err().map(|err| err.to_string());
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut keys = Vec::new();
    for (name, (keystrokes, last_submitted)) in last {
        let status = autosave.status(&name);
        let stored = store.get(&name);
        let final_success = status.last_outcome.as_ref().map(|outcome| outcome.success);

        if !status.is_idle() || status.debounce_pending {
            violations.push(format!("{name} still busy after save_all"));
        }
        match final_success {
            None => violations.push(format!("{name} has no recorded outcome")),
            Some(true) if stored.as_deref() != Some(last_submitted.as_str()) => {
                violations.push(format!(
                    "{name} stored {stored:?} but last submitted {last_submitted}"
                ));
            }
            _ => {}
        }

        keys.push(KeyReport {
            key: name,
            keystrokes,
            last_submitted,
            stored,
            final_success,
        });
    }

    autosave.shutdown();
    let report = SimulatorReport {
        seed: config.seed,
        elapsed_ms,
        sink_writes: store.write_count(),
        stats: autosave.stats(),
        keys,
        violations,
        save_all_error,
    };
    tracing::info!(passed = report.passed(), elapsed_ms, "simulation finished");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(seed: u64) -> SimulatorConfig {
        SimulatorConfig {
            seed,
            keys: 3,
            keystrokes: 60,
            typing_interval: Duration::from_millis(3),
            latency: Duration::from_millis(10),
            jitter: Duration::from_millis(15),
            failure_rate: 0.0,
            autosave: AutosaveConfig::new()
                .with_default_delay(Duration::from_millis(8))
                .with_drain_gap(Duration::ZERO),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_run_passes() {
        let report = run_simulator(quick(7)).await;
        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.stats.submissions, 60);
        assert!(report.keys.iter().all(|k| k.final_success == Some(true)));
        assert!(report.generate_text().contains("Result: PASS"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_failures_are_tolerated() {
        let mut config = quick(11);
        config.failure_rate = 0.5;
        let report = run_simulator(config).await;

        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.stats.failures > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_shape() {
        let a = run_simulator(quick(3)).await;
        let b = run_simulator(quick(3)).await;
        let shape = |r: &SimulatorReport| {
            r.keys
                .iter()
                .map(|k| (k.key.clone(), k.keystrokes, k.last_submitted.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&a), shape(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_serializes() {
        let report = run_simulator(quick(5)).await;
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["seed"], 5);
        assert!(json["keys"].as_array().is_some_and(|keys| !keys.is_empty()));
    }
}
