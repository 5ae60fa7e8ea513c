pub mod monitor;
pub mod process;

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::common::config::FrontendSettings;
use crate::common::error::FrontendError;
use crate::common::timeutils::now_monotonic;
use crate::supervisor::monitor::{Cleaner, MonitorAggregator};
use crate::supervisor::process::{GroupProcess, OutputLine, WorkerSpawner};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub groups: Vec<String>,
    /// Number of starts remembered per group, also the number of restarts tolerated within
    /// `restart_interval`
    pub restart_attempts: usize,
    pub restart_interval: Duration,
    pub loop_delay: Duration,
}

impl From<&FrontendSettings> for SupervisorConfig {
    fn from(settings: &FrontendSettings) -> Self {
        Self {
            groups: settings.groups.clone(),
            restart_attempts: settings.restart_attempts,
            restart_interval: settings.restart_interval,
            loop_delay: settings.loop_delay,
        }
    }
}

/// Start times of a group worker, the oldest is dropped once `capacity` is reached.
#[derive(Debug)]
pub struct StartupHistory {
    starts: VecDeque<Instant>,
    capacity: usize,
}

impl StartupHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            starts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, now: Instant) {
        if self.starts.len() >= self.capacity.max(1) {
            self.starts.pop_front();
        }
        self.starts.push_back(now);
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// A worker is crashing too often once all its remembered starts happened within
    /// `interval`. With a single allowed attempt, any exit is final.
    pub fn is_crashing_often(&self, now: Instant, interval: Duration) -> bool {
        if self.starts.len() < self.capacity {
            return false;
        }
        if self.capacity == 1 {
            return true;
        }
        match self.starts.front() {
            Some(oldest) => now.saturating_duration_since(*oldest) < interval,
            None => false,
        }
    }
}

struct GroupWorker {
    name: String,
    process: Box<dyn GroupProcess>,
    history: StartupHistory,
}

impl GroupWorker {
    /// Logs pending worker output and returns it.
    fn forward_output(&mut self) -> Vec<OutputLine> {
        let lines = self.process.drain_output();
        for line in &lines {
            match line {
                OutputLine::Stdout(line) => log::info!("[{}] {line}", self.name),
                OutputLine::Stderr(line) => log::warn!("[{}] {line}", self.name),
            }
        }
        lines
    }
}

fn format_output(lines: &[OutputLine]) -> String {
    let mut stdout = String::new();
    let mut stderr = String::new();
    for line in lines {
        let (target, line) = match line {
            OutputLine::Stdout(line) => (&mut stdout, line),
            OutputLine::Stderr(line) => (&mut stderr, line),
        };
        target.push_str(line);
        target.push('\n');
    }
    format!("Stdout:\n{stdout}Stderr:\n{stderr}")
}

/// Keeps one worker process alive per group.
pub struct GroupSupervisor {
    config: SupervisorConfig,
    spawner: Box<dyn WorkerSpawner>,
    aggregator: Option<Box<dyn MonitorAggregator>>,
    cleaner: Option<Box<dyn Cleaner>>,
    workers: Vec<GroupWorker>,
}

impl GroupSupervisor {
    pub fn new(config: SupervisorConfig, spawner: Box<dyn WorkerSpawner>) -> Self {
        Self {
            config,
            spawner,
            aggregator: None,
            cleaner: None,
            workers: Vec::new(),
        }
    }

    pub fn with_aggregator(mut self, aggregator: Box<dyn MonitorAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn with_cleaner(mut self, cleaner: Box<dyn Cleaner>) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Spawns a worker for every configured group that does not have one yet.
    pub fn start_groups(&mut self) -> crate::Result<()> {
        let mut groups = self.config.groups.clone();
        groups.sort();
        groups.dedup();
        for group in groups {
            if self.workers.iter().any(|worker| worker.name == group) {
                continue;
            }
            let process = self.spawner.spawn(&group)?;
            let mut history = StartupHistory::new(self.config.restart_attempts);
            history.record(now_monotonic());
            self.workers.push(GroupWorker {
                name: group,
                process,
                history,
            });
        }
        Ok(())
    }

    /// One pass of the main loop: forwards worker output, restarts exited workers and
    /// triggers aggregation and cleanup.
    pub fn run_iteration(&mut self) -> crate::Result<()> {
        let mut crashed = None;
        for (index, worker) in self.workers.iter_mut().enumerate() {
            let mut output = worker.forward_output();
            let exit = match worker.process.try_wait() {
                Ok(Some(exit)) => exit,
                Ok(None) => continue,
                Err(error) => {
                    log::warn!("Cannot check worker of group {}: {error}", worker.name);
                    continue;
                }
            };
            output.extend(worker.forward_output());
            let now = now_monotonic();
            if worker
                .history
                .is_crashing_often(now, self.config.restart_interval)
            {
                log::error!(
                    "Worker of group {} exited with {exit}, it has been restarting too often",
                    worker.name
                );
                crashed = Some((index, output));
                break;
            }
            log::warn!(
                "Worker of group {} exited with {exit}, restarting it",
                worker.name
            );
            worker.process = self.spawner.spawn(&worker.name)?;
            worker.history.record(now);
        }

        if let Some((index, output)) = crashed {
            let worker = self.workers.remove(index);
            return Err(FrontendError::GroupCrashLoop {
                group: worker.name,
                output: format_output(&output),
            });
        }

        let groups: Vec<String> = self.workers.iter().map(|w| w.name.clone()).collect();
        if let Some(aggregator) = &mut self.aggregator {
            if let Err(error) = aggregator.aggregate(&groups) {
                log::warn!("Monitoring aggregation failed: {error}");
            }
        }
        if let Some(cleaner) = &mut self.cleaner {
            if let Err(error) = cleaner.cleanup() {
                log::warn!("Cleanup failed: {error}");
            }
        }
        Ok(())
    }

    /// Runs the main loop until `stop` resolves or a group keeps crashing.
    /// Workers are terminated on every exit path.
    pub async fn run<F: Future<Output = ()>>(&mut self, stop: F) -> crate::Result<()> {
        let result = self.run_loop(stop).await;
        self.terminate_all();
        result
    }

    async fn run_loop<F: Future<Output = ()>>(&mut self, stop: F) -> crate::Result<()> {
        self.start_groups()?;
        tokio::pin!(stop);
        loop {
            self.run_iteration()?;
            tokio::select! {
                _ = tokio::time::sleep(self.config.loop_delay) => {}
                _ = &mut stop => {
                    log::info!("Stopping the frontend");
                    return Ok(());
                }
            }
        }
    }

    pub fn terminate_all(&mut self) {
        for mut worker in self.workers.drain(..) {
            log::debug!("Terminating worker of group {}", worker.name);
            worker.process.terminate();
            worker.forward_output();
        }
    }
}

impl Drop for GroupSupervisor {
    fn drop(&mut self) {
        self.terminate_all();
    }
}
