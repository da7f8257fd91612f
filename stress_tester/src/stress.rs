use std::{
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, anyhow, bail};
use hdrhistogram::Histogram;
use num_format::{SystemLocale, ToFormattedString};
use pqueue::{Entry, PriorityQueue};
use rand::{Rng, rngs::ThreadRng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cfg::{Cfg, Workload};

/// Every entry carries the instant it was pushed, so the time it spent queued can be measured.
type Queue = PriorityQueue<Instant>;

const LATENCY_PERCENTILES: [f64; 4] = [50.0, 90.0, 99.0, 99.9];

impl Cfg {
    /// Creates a randomized [`Entry`] within the pre-configured ranges using the passed randomizer `rng`.
    fn randomized_entry(&self, rng: &mut ThreadRng) -> Entry<Instant> {
        let group = rng.random_range(0..self.group_num);
        let priority = rng.random_range(self.min_priority..=self.max_priority);

        Entry::new(
            &Uuid::new_v4().to_string(),
            &group_key(group),
            Instant::now(),
            priority,
        )
    }

    fn validate(&self) -> anyhow::Result<usize> {
        if self.min_priority > self.max_priority {
            bail!(
                "Priority range is empty: {} > {}",
                self.min_priority,
                self.max_priority
            );
        }
        if self.group_num == 0 {
            bail!("At least one group is required");
        }
        self.entry_num
            .checked_mul(self.producer_num)
            .ok_or_else(|| anyhow!("Overflow while calculating queue capacity"))
    }
}

fn group_key(group: usize) -> String {
    format!("group-{group}")
}

struct TestStats {
    pushed: AtomicUsize,
    drained: AtomicUsize,
    updated: AtomicUsize,
    deleted: AtomicUsize,
    /// Push-to-drain latency of single entries, in microseconds.
    queued_hist: Mutex<Histogram<u64>>,
    /// Duration of a whole drain call, in microseconds.
    drain_hist: Mutex<Histogram<u64>>,
}

impl TestStats {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            pushed: AtomicUsize::new(0),
            drained: AtomicUsize::new(0),
            updated: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
            queued_hist: Mutex::new(
                Histogram::new_with_max(600_000_000, 3).context("creating latency histogram")?,
            ),
            drain_hist: Mutex::new(
                Histogram::new_with_max(60_000_000, 3).context("creating drain histogram")?,
            ),
        })
    }

    fn record_drain(&self, drained: &[Entry<Instant>], duration: Duration) {
        self.drained.fetch_add(drained.len(), Ordering::Relaxed);

        if let Ok(mut hist) = self.drain_hist.lock() {
            hist.saturating_record(duration.as_micros() as u64);
        }
        if let Ok(mut hist) = self.queued_hist.lock() {
            for entry in drained {
                hist.saturating_record(entry.payload.elapsed().as_micros() as u64);
            }
        }
    }
}

pub fn run_stress_test(cfg: Cfg) -> anyhow::Result<TestResults> {
    let capacity = cfg.validate()?;
    info!(
        workload = %cfg.workload,
        producers = cfg.producer_num,
        entries_per_producer = cfg.entry_num,
        consumers = cfg.consumer_num,
        "starting stress test"
    );

    let queue = Arc::new(Queue::with_capacity(capacity));
    let stats = Arc::new(TestStats::new()?);

    let mutator_num = match cfg.workload {
        Workload::PushPop => 0,
        Workload::Mixed => cfg.mutator_num,
    };

    // Start barrier ensures all workers and the main thread start simultaneously
    let start_barrier = Arc::new(Barrier::new(
        cfg.producer_num + cfg.consumer_num + mutator_num + 1,
    ));
    let producers_stopped = Arc::new(AtomicUsize::new(0));
    let stop_signal = Arc::new(AtomicBool::new(false));

    let workers = Workers {
        cfg: cfg.clone(),
        queue: Arc::clone(&queue),
        stats: Arc::clone(&stats),
        start_barrier: Arc::clone(&start_barrier),
        producers_stopped,
        stop_signal: Arc::clone(&stop_signal),
    };

    let producer_handles: Vec<_> = (1..=cfg.producer_num)
        .map(|id| workers.spawn(move |w| w.run_producer(id)))
        .collect();
    let consumer_handles: Vec<_> = (1..=cfg.consumer_num)
        .map(|id| workers.spawn(move |w| w.run_consumer(id)))
        .collect();
    let mutator_handles: Vec<_> = (1..=mutator_num)
        .map(|id| workers.spawn(move |w| w.run_mutator(id)))
        .collect();

    start_barrier.wait();
    let start_time = Instant::now();
    info!("test started");

    // -- Cap the run time: the watchdog raises the stop signal once the duration is exceeded.
    let watchdog = {
        let stop_signal = Arc::clone(&stop_signal);
        let run_duration = Duration::from_secs(cfg.run_duration_seconds);
        thread::spawn(move || {
            let deadline = start_time + run_duration;
            while !stop_signal.load(Ordering::Relaxed) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            stop_signal.store(true, Ordering::SeqCst);
        })
    };

    join_all(producer_handles, "Producer")?;
    info!("producers done, waiting for consumers");
    join_all(consumer_handles, "Consumer")?;
    join_all(mutator_handles, "Mutator")?;
    let test_duration = start_time.elapsed();

    stop_signal.store(true, Ordering::SeqCst);
    watchdog
        .join()
        .map_err(|_| anyhow!("Watchdog thread panicked"))?;
    drop(workers);

    // -- Whatever is left must still come out in priority order
    let queue = Arc::try_unwrap(queue).map_err(|_| anyhow!("Queue is still shared"))?;
    let remaining = queue.drain(queue.len());
    if let Some(window) = remaining
        .windows(2)
        .find(|w| w[0].priority < w[1].priority)
    {
        bail!(
            "Queue returned priority {} before {}",
            window[0].priority,
            window[1].priority
        );
    }
    let leftover = queue.destroy();
    debug!(remaining = remaining.len(), leftover, "queue torn down");

    let stats = Arc::try_unwrap(stats).map_err(|_| anyhow!("Stats are still shared"))?;
    Ok(TestResults {
        test_duration,
        total_pushed: stats.pushed.into_inner(),
        total_drained: stats.drained.into_inner(),
        total_updated: stats.updated.into_inner(),
        total_deleted: stats.deleted.into_inner(),
        total_remaining: remaining.len(),
        queued_hist: stats
            .queued_hist
            .into_inner()
            .map_err(|_| anyhow!("Latency histogram is poisoned"))?,
        drain_hist: stats
            .drain_hist
            .into_inner()
            .map_err(|_| anyhow!("Drain histogram is poisoned"))?,
    })
}

fn join_all(handles: Vec<JoinHandle<()>>, role: &str) -> anyhow::Result<()> {
    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("{role} thread panicked"))?;
    }
    Ok(())
}

/// Shared state handed to every worker thread.
#[derive(Clone)]
struct Workers {
    cfg: Cfg,
    queue: Arc<Queue>,
    stats: Arc<TestStats>,
    start_barrier: Arc<Barrier>,
    producers_stopped: Arc<AtomicUsize>,
    stop_signal: Arc<AtomicBool>,
}

impl Workers {
    fn spawn(&self, work: impl FnOnce(Workers) + Send + 'static) -> JoinHandle<()> {
        let workers = self.clone();
        thread::spawn(move || {
            workers.start_barrier.wait();
            work(workers)
        })
    }

    fn stopped(&self) -> bool {
        self.stop_signal.load(Ordering::Relaxed)
    }

    fn producers_running(&self) -> bool {
        self.producers_stopped.load(Ordering::Relaxed) < self.cfg.producer_num
    }

    fn run_producer(self, producer_id: usize) {
        let mut rng = rand::rng();
        let mut local_pushed = 0;

        while !self.stopped() && local_pushed < self.cfg.entry_num {
            let entry = self.cfg.randomized_entry(&mut rng);

            // --> Push
            self.queue.push(entry);
            local_pushed += 1;
            self.stats.pushed.fetch_add(1, Ordering::Relaxed);

            // Small delay
            thread::sleep(Duration::from_micros(rng.random_range(1..100)));
        }

        self.producers_stopped.fetch_add(1, Ordering::SeqCst);
        info!(producer_id, local_pushed, "producer completed");
    }

    fn run_consumer(self, consumer_id: usize) {
        let mut total_drained = 0;

        while !self.stopped() && self.producers_running() {
            let drain_start = Instant::now();
            let drained = self.queue.drain(self.cfg.drain_batch_size);
            let drain_duration = drain_start.elapsed();

            total_drained += drained.len();
            if !drained.is_empty() {
                self.stats.record_drain(&drained, drain_duration);
            }

            thread::sleep(Duration::from_millis(self.cfg.drain_interval_ms));
        }
        info!(consumer_id, total_drained, "consumer completed");
    }

    /// Randomly re-prioritizes or deletes whole groups while producers are running.
    fn run_mutator(self, mutator_id: usize) {
        let mut rng = rand::rng();
        let mut updates = 0;
        let mut deletions = 0;

        while !self.stopped() && self.producers_running() {
            let group = group_key(rng.random_range(0..self.cfg.group_num));

            // Deletes are rarer than updates, otherwise the queue hardly ever fills up.
            if rng.random_bool(0.2) {
                match self.queue.delete_by_group_key(&group) {
                    Ok(removed) => {
                        deletions += 1;
                        self.stats.deleted.fetch_add(removed, Ordering::Relaxed);
                    }
                    Err(e) => warn!(mutator_id, %group, "group delete failed: {e}"),
                }
            } else {
                let priority = rng.random_range(self.cfg.min_priority..=self.cfg.max_priority);
                let updated = self.queue.update_priority_by_group_key(&group, priority);
                updates += 1;
                self.stats.updated.fetch_add(updated, Ordering::Relaxed);
            }

            thread::sleep(Duration::from_millis(self.cfg.drain_interval_ms));
        }
        info!(mutator_id, updates, deletions, "mutator completed");
    }
}

pub struct TestResults {
    test_duration: Duration,
    total_pushed: usize,
    total_drained: usize,
    total_updated: usize,
    total_deleted: usize,
    total_remaining: usize,
    queued_hist: Histogram<u64>,
    drain_hist: Histogram<u64>,
}

impl TestResults {
    /// Every pushed entry is either drained, deleted, or still queued at the end.
    pub fn is_balanced(&self) -> bool {
        self.total_pushed == self.total_drained + self.total_deleted + self.total_remaining
    }

    pub fn print_summary(&self) -> anyhow::Result<()> {
        let locale = SystemLocale::default().context("could not determine system locale")?;
        let seconds = self.test_duration.as_secs_f64().max(f64::EPSILON);

        println!("\n{:=^75}", " Stress Test Results ");
        println!("Test duration: {:?}", self.test_duration);
        println!(
            "Entries pushed: {} ({:.2} entries/sec)",
            self.total_pushed.to_formatted_string(&locale),
            self.total_pushed as f64 / seconds
        );
        println!(
            "Entries drained: {} ({:.2} entries/sec)",
            self.total_drained.to_formatted_string(&locale),
            self.total_drained as f64 / seconds
        );
        println!(
            "Entries re-prioritized: {}",
            self.total_updated.to_formatted_string(&locale)
        );
        println!(
            "Entries deleted: {}",
            self.total_deleted.to_formatted_string(&locale)
        );
        println!(
            "Entries left at shutdown: {}",
            self.total_remaining.to_formatted_string(&locale)
        );

        if !self.drain_hist.is_empty() {
            println!(
                "\nDrain call: avg {:.2} µs, max {} µs",
                self.drain_hist.mean(),
                self.drain_hist.max().to_formatted_string(&locale)
            );
        }
        if !self.queued_hist.is_empty() {
            print!("Time queued: ");
            for p in LATENCY_PERCENTILES {
                let latency = self.queued_hist.value_at_quantile(p / 100.0);
                print!("P{:.1}: {} µs, ", p, latency.to_formatted_string(&locale));
            }
            println!();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::run_stress_test;
    use crate::cfg::Cfg;

    #[test]
    fn mixed_workload_accounts_for_every_entry() {
        let cfg = Cfg::parse_from([
            "stress_tester",
            "mixed",
            "-p",
            "2",
            "-e",
            "200",
            "-g",
            "4",
            "--drain-interval-ms",
            "1",
            "--run-duration-seconds",
            "5",
        ]);

        let results = run_stress_test(cfg).unwrap();
        assert!(results.is_balanced());
        assert_eq!(results.total_pushed, 400);
    }

    #[test]
    fn rejects_empty_priority_range() {
        let cfg = Cfg::parse_from(["stress_tester", "--min-priority", "10", "--max-priority", "-10"]);

        assert!(run_stress_test(cfg).is_err());
    }
}
