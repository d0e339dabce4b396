//! The job pool implementation.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use swc_util::FxHashMap;

use crate::{Job, JobClientId, JobPriority, JobResult};

/// Pool configuration decided by the driver
#[derive(Clone, Copy, Debug)]
pub struct JobSetup {
    /// Worker count; 0 means hardware concurrency
    pub num_cores: usize,
    /// Randomize pick order (development mode); forces one worker so a run
    /// is reproducible from the seed
    pub randomize: bool,
    /// Seed for randomized picking; 0 derives one from the clock
    pub rand_seed: u32,
}

impl Default for JobSetup {
    fn default() -> Self {
        Self {
            num_cores: 0,
            randomize: false,
            rand_seed: 0,
        }
    }
}

struct JobEntry {
    job: Box<dyn Job>,
    priority: JobPriority,
    client: JobClientId,
}

struct PoolState {
    ready: [VecDeque<JobEntry>; 3],
    waiting: Vec<JobEntry>,
    /// ready + running + waiting, per client
    pending: FxHashMap<JobClientId, usize>,
    /// waiting only, per client
    asleep: FxHashMap<JobClientId, usize>,
    shutdown: bool,
    randomize: bool,
    rng: u32,
}

impl PoolState {
    fn new(randomize: bool, seed: u32) -> Self {
        Self {
            ready: Default::default(),
            waiting: Vec::new(),
            pending: FxHashMap::default(),
            asleep: FxHashMap::default(),
            shutdown: false,
            randomize,
            rng: seed.max(1),
        }
    }

    fn next_rand(&mut self) -> u32 {
        // xorshift32; reproducible from the recorded seed
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }

    fn pop_ready(&mut self) -> Option<JobEntry> {
        for p in 0..3 {
            if self.ready[p].is_empty() {
                continue;
            }
            let idx = if self.randomize {
                (self.next_rand() as usize) % self.ready[p].len()
            } else {
                0
            };
            return self.ready[p].remove(idx);
        }
        None
    }

    fn pop_ready_for_client(&mut self, client: JobClientId) -> Option<JobEntry> {
        for p in 0..3 {
            let candidates: Vec<usize> = self.ready[p]
                .iter()
                .enumerate()
                .filter(|(_, e)| e.client == client)
                .map(|(i, _)| i)
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let idx = if self.randomize {
                candidates[(self.next_rand() as usize) % candidates.len()]
            } else {
                candidates[0]
            };
            return self.ready[p].remove(idx);
        }
        None
    }

    fn pending_for(&self, client: JobClientId) -> usize {
        self.pending.get(&client).copied().unwrap_or(0)
    }

    fn asleep_for(&self, client: JobClientId) -> usize {
        self.asleep.get(&client).copied().unwrap_or(0)
    }
}

struct Inner {
    state: Mutex<PoolState>,
    work_cv: Condvar,
    done_cv: Condvar,
    panics: Mutex<Vec<String>>,
    rand_seed: u32,
}

impl Inner {
    fn run_guarded(&self, mut entry: JobEntry) -> (JobEntry, JobResult) {
        let outcome = catch_unwind(AssertUnwindSafe(|| entry.job.run()));
        match outcome {
            Ok(result) => (entry, result),
            Err(_) => {
                // The job dies with no output; shared state stays intact.
                self.panics.lock().push(format!(
                    "job `{}` aborted by a hardware exception (seed {})",
                    entry.job.name(),
                    self.rand_seed
                ));
                (entry, JobResult::Done)
            }
        }
    }

    fn complete(&self, state: &mut PoolState, entry: JobEntry, result: JobResult) {
        match result {
            JobResult::Done => {
                let count = state.pending.entry(entry.client).or_insert(1);
                *count = count.saturating_sub(1);
                self.done_cv.notify_all();
            }
            JobResult::Sleep => {
                *state.asleep.entry(entry.client).or_insert(0) += 1;
                state.waiting.push(entry);
                self.done_cv.notify_all();
            }
        }
    }
}

/// Work-stealing job pool with per-job priorities and client ids
pub struct JobManager {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    single_threaded: bool,
    next_client: AtomicU64,
}

impl JobManager {
    pub fn new(setup: JobSetup) -> Self {
        let mut count = setup.num_cores;
        if count == 0 {
            count = num_cpus::get();
        }

        let mut seed = setup.rand_seed;
        if setup.randomize {
            if seed == 0 {
                let millis = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as u32)
                    .unwrap_or(1);
                seed = millis.max(1);
            }
            // Reproducibility requires one worker.
            count = 1;
        }

        let single_threaded = count <= 1;
        let inner = Arc::new(Inner {
            state: Mutex::new(PoolState::new(setup.randomize, seed)),
            work_cv: Condvar::new(),
            done_cv: Condvar::new(),
            panics: Mutex::new(Vec::new()),
            rand_seed: seed,
        });

        let mut workers = Vec::new();
        if !single_threaded {
            for _ in 0..count {
                let inner = Arc::clone(&inner);
                workers.push(std::thread::spawn(move || worker_loop(inner)));
            }
        }

        Self {
            inner,
            workers: Mutex::new(workers),
            single_threaded,
            next_client: AtomicU64::new(1),
        }
    }

    pub fn new_client_id(&self) -> JobClientId {
        self.next_client.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_single_threaded(&self) -> bool {
        self.single_threaded
    }

    pub fn rand_seed(&self) -> u32 {
        self.inner.rand_seed
    }

    /// Schedule a job
    pub fn enqueue(&self, job: Box<dyn Job>, priority: JobPriority, client: JobClientId) {
        let mut state = self.inner.state.lock();
        assert!(!state.shutdown, "enqueue after shutdown");
        *state.pending.entry(client).or_insert(0) += 1;
        state.ready[priority as usize].push_back(JobEntry {
            job,
            priority,
            client,
        });
        self.inner.work_cv.notify_one();
    }

    /// Move every sleeping job of `client` back to its ready queue
    ///
    /// This is the only way a sleeper resumes.
    pub fn wake_all(&self, client: JobClientId) {
        let mut state = self.inner.state.lock();
        let mut moved = 0usize;
        let mut i = 0;
        while i < state.waiting.len() {
            if state.waiting[i].client == client {
                let entry = state.waiting.swap_remove(i);
                state.ready[entry.priority as usize].push_back(entry);
                moved += 1;
            } else {
                i += 1;
            }
        }
        if moved > 0 {
            let count = state.asleep.entry(client).or_insert(moved);
            *count = count.saturating_sub(moved);
            self.inner.work_cv.notify_all();
        }
    }

    /// Wait until `client` has no runnable jobs left
    ///
    /// Returns the number of jobs still parked in `Waiting`; those can only
    /// be finished by a later `wake_all` + `wait_all` round.
    pub fn wait_all(&self, client: JobClientId) -> usize {
        if self.single_threaded {
            self.drain_on_caller(client)
        } else {
            let mut state = self.inner.state.lock();
            loop {
                let pending = state.pending_for(client);
                let asleep = state.asleep_for(client);
                if pending <= asleep {
                    return asleep;
                }
                self.inner.done_cv.wait(&mut state);
            }
        }
    }

    fn drain_on_caller(&self, client: JobClientId) -> usize {
        let mut state = self.inner.state.lock();
        loop {
            let Some(entry) = state.pop_ready_for_client(client) else {
                break;
            };
            drop(state);
            let (entry, result) = self.inner.run_guarded(entry);
            state = self.inner.state.lock();
            self.inner.complete(&mut state, entry, result);
        }
        state.asleep_for(client)
    }

    /// Messages recorded for jobs that died on a caught exception
    pub fn take_panics(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.panics.lock())
    }

    /// Stop accepting work and join the workers
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.inner.work_cv.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: Arc<Inner>) {
    let mut state = inner.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        if let Some(entry) = state.pop_ready() {
            drop(state);
            let (entry, result) = inner.run_guarded(entry);
            state = inner.state.lock();
            inner.complete(&mut state, entry, result);
        } else {
            inner.work_cv.wait(&mut state);
        }
    }
}
