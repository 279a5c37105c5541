// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler: a long-lived polling loop that promotes
//! dependency-satisfied work, claims ready work, launches agents with
//! bounded concurrency, and sweeps for timed-out launches.
//!
//! The poll driver is single-threaded; each launch runs as an independent
//! task tracked through the `active_launches` set and writes its outcome
//! back to the store itself. The driver re-reads the store every tick, so
//! eventual consistency between tasks and driver is sufficient.

use crate::health::HealthMonitor;
use crate::memory::{memory_derived_concurrency, MemoryProbe};
use crate::prompt::PromptGenerator;
use crate::reconciler::Reconciler;
use crate::recovery::RecoveryPolicy;
use crate::settings::RunnerSettings;
use crate::EngineError;
use parking_lot::Mutex;
use ralph_adapters::{GitAdapter, LaunchSpec, Launcher};
use ralph_core::{
    Clock, ExecutionPatch, ExecutionRecord, ExecutionStatus, RunnerEvent, SystemClock,
};
use ralph_storage::{StateStore, UpdateOpts};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Adapter dependencies for the runner.
pub struct RunnerDeps<C: Clock = SystemClock> {
    pub store: Arc<StateStore<C>>,
    pub git: Arc<dyn GitAdapter>,
    pub launcher: Arc<dyn Launcher>,
    pub prompts: Arc<dyn PromptGenerator>,
    pub memory: Arc<dyn MemoryProbe>,
}

/// Cooperative stop handle for the runner loop.
#[derive(Clone)]
pub struct RunnerHandle {
    stop: Arc<Notify>,
    stop_requested: Arc<AtomicBool>,
}

impl RunnerHandle {
    /// Request a graceful stop: the next tick is cancelled and in-flight
    /// launches drain for the grace window.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
    }
}

/// The autonomous execution supervisor's scheduler.
pub struct Runner<C: Clock = SystemClock> {
    store: Arc<StateStore<C>>,
    launcher: Arc<dyn Launcher>,
    prompts: Arc<dyn PromptGenerator>,
    memory: Arc<dyn MemoryProbe>,
    settings: RunnerSettings,
    clock: C,
    events: mpsc::Sender<RunnerEvent>,
    reconciler: Reconciler<C>,
    /// Branches with a launch task in flight
    active_launches: Arc<Mutex<HashSet<String>>>,
    launch_tasks: Vec<JoinHandle<()>>,
    over_limit_warned: bool,
    low_memory_warned: bool,
    stop: Arc<Notify>,
    stop_requested: Arc<AtomicBool>,
}

impl<C: Clock + 'static> Runner<C> {
    pub fn new(
        deps: RunnerDeps<C>,
        settings: RunnerSettings,
        clock: C,
        events: mpsc::Sender<RunnerEvent>,
    ) -> Self {
        let recovery = RecoveryPolicy {
            auto_recovery: settings.auto_recovery,
            max_recovery_attempts: settings.max_recovery_attempts,
        };
        let reconciler = Reconciler::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.git),
            HealthMonitor::new(settings.health.clone()),
            recovery,
            settings.startup_timeout,
            clock.clone(),
            events.clone(),
        );

        Self {
            store: deps.store,
            launcher: deps.launcher,
            prompts: deps.prompts,
            memory: deps.memory,
            settings,
            clock,
            events,
            reconciler,
            active_launches: Arc::new(Mutex::new(HashSet::new())),
            launch_tasks: Vec::new(),
            over_limit_warned: false,
            low_memory_warned: false,
            stop: Arc::new(Notify::new()),
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            stop: Arc::clone(&self.stop),
            stop_requested: Arc::clone(&self.stop_requested),
        }
    }

    /// Branches currently being launched.
    pub fn active_launches(&self) -> HashSet<String> {
        self.active_launches.lock().clone()
    }

    /// Drive poll ticks until stopped, then drain in-flight launches.
    pub async fn run(&mut self) {
        info!(
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            "runner started"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.stop_requested.load(Ordering::SeqCst) {
                        break;
                    }
                    self.tick().await;
                }
                _ = self.stop.notified() => break,
            }
        }

        info!("runner stopping, draining in-flight launches");
        self.drain_launches(self.settings.drain_grace).await;
        info!("runner stopped");
    }

    /// One poll tick. Sub-step faults are caught here so a bad record
    /// cannot stall the loop.
    pub async fn tick(&mut self) {
        self.prune_finished_tasks();

        let skip = self.active_launches();
        self.reconciler.run_pass(&skip).await;

        if let Err(e) = self.recover_timed_out_starting(&skip) {
            error!(error = %e, "launch-timeout sweep failed");
        }
        if let Err(e) = self.auto_recover_interrupted() {
            error!(error = %e, "auto-recovery sweep failed");
        }
        if let Err(e) = self.promote_pending() {
            error!(error = %e, "dependency promotion failed");
        }
        if let Err(e) = self.launch_ready().await {
            error!(error = %e, "launch pass failed");
        }
    }

    /// Wait for in-flight launch tasks, up to the grace window. They write
    /// back to the store either way; children stay detached and alive.
    pub async fn drain_launches(&mut self, grace: Duration) {
        let tasks: Vec<JoinHandle<()>> = self.launch_tasks.drain(..).collect();
        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("launch drain grace elapsed with launches still in flight");
        }
    }

    fn prune_finished_tasks(&mut self) {
        self.launch_tasks.retain(|t| !t.is_finished());
    }

    fn emit(&self, event: RunnerEvent) {
        let _ = self.events.try_send(event);
    }

    /// Revert `starting` records whose launch window expired. The
    /// scheduler's own in-flight claims are excluded so it cannot
    /// self-time-out.
    fn recover_timed_out_starting(&self, skip: &HashSet<String>) -> Result<(), EngineError> {
        let now = self.clock.now_utc();
        for record in self
            .store
            .list_executions()?
            .iter()
            .filter(|r| r.status == ExecutionStatus::Starting && !skip.contains(&r.branch))
        {
            let Some(attempt_at) = record.launch_attempt_at else {
                continue;
            };
            let age = (now - attempt_at).to_std().unwrap_or(Duration::ZERO);
            if age <= self.settings.launch_timeout {
                continue;
            }

            if record.launch_attempts < self.settings.max_retries {
                warn!(
                    id = %record.id,
                    branch = %record.branch,
                    attempts = record.launch_attempts,
                    "launch timed out, reverting to ready"
                );
                self.store.update_execution(
                    record.id.as_str(),
                    ExecutionPatch::new()
                        .status(ExecutionStatus::Ready)
                        .last_error(format!(
                            "Launch timeout after {}s",
                            self.settings.launch_timeout.as_secs()
                        ))
                        .clear_agent(),
                    UpdateOpts::default(),
                )?;
            } else {
                let message = format!("Launch failed after {} attempts", record.launch_attempts);
                warn!(id = %record.id, branch = %record.branch, "{message}");
                self.store.update_execution(
                    record.id.as_str(),
                    ExecutionPatch::new()
                        .status(ExecutionStatus::Failed)
                        .last_error(message.clone())
                        .clear_agent(),
                    UpdateOpts::default(),
                )?;
                self.emit(RunnerEvent::PrdFailed {
                    id: record.id.clone(),
                    branch: record.branch.clone(),
                    error: message,
                });
            }
        }
        Ok(())
    }

    /// Retry interrupted executions: reset stagnation and attempts, then
    /// hand them back to the ready queue.
    fn auto_recover_interrupted(&self) -> Result<(), EngineError> {
        for record in self
            .store
            .list_executions()?
            .iter()
            .filter(|r| r.status == ExecutionStatus::Interrupted)
        {
            info!(id = %record.id, branch = %record.branch, "auto-recovering interrupted execution");
            self.store.update_execution(
                record.id.as_str(),
                ExecutionPatch::new()
                    .status(ExecutionStatus::Ready)
                    .launch_attempts(0)
                    .reset_stagnation(),
                UpdateOpts::default(),
            )?;
        }
        Ok(())
    }

    /// Promote pending records whose dependencies have all cleared.
    fn promote_pending(&self) -> Result<(), EngineError> {
        for record in self
            .store
            .list_executions()?
            .iter()
            .filter(|r| r.status == ExecutionStatus::Pending)
        {
            let report = self.store.are_dependencies_satisfied(
                &record.dependencies,
                &record.project_root,
                &record.prd_path,
            )?;
            if report.satisfied {
                info!(id = %record.id, branch = %record.branch, "dependencies satisfied, promoting");
                self.store.update_execution(
                    record.id.as_str(),
                    ExecutionPatch::new().status(ExecutionStatus::Ready),
                    UpdateOpts::default(),
                )?;
            } else {
                debug!(
                    id = %record.id,
                    pending = ?report.pending,
                    "dependencies still pending"
                );
            }
        }
        Ok(())
    }

    /// Launch ready executions up to the effective concurrency budget.
    async fn launch_ready(&mut self) -> Result<(), EngineError> {
        let mem_cap = memory_derived_concurrency(
            self.memory.free_memory_gb(),
            &self.settings.memory_budget,
        );
        if mem_cap == 0 {
            if !self.low_memory_warned {
                warn!("paused due to low memory");
                self.emit(RunnerEvent::Log {
                    message: "paused due to low memory".to_string(),
                });
                self.low_memory_warned = true;
            }
            return Ok(());
        }
        self.low_memory_warned = false;

        let mut effective = self.store.get_runner_config()?.max_concurrency;
        if let Some(configured) = self.settings.configured_concurrency {
            if configured > 0 {
                effective = effective.min(configured);
            }
        }
        effective = effective.min(mem_cap);

        let records = self.store.list_executions()?;
        let global_active = records.iter().filter(|r| r.status.is_active()).count() as u32;

        // Claims dispatched but not yet visible as starting/running
        let in_flight = {
            let active = self.active_launches.lock();
            active
                .iter()
                .filter(|branch| {
                    !records
                        .iter()
                        .any(|r| &r.branch == *branch && r.status.is_active())
                })
                .count() as u32
        };

        let mut ready: Vec<&ExecutionRecord> = {
            let active = self.active_launches.lock();
            records
                .iter()
                .filter(|r| r.status == ExecutionStatus::Ready && !active.contains(&r.branch))
                .collect()
        };
        ready.sort_by_key(|r| r.schedule_key());

        let slots = effective.saturating_sub(global_active + in_flight);
        if global_active > effective || (slots == 0 && !ready.is_empty()) {
            // One warning per continuous over-budget period
            if !self.over_limit_warned {
                warn!(
                    global_active,
                    effective, "concurrency budget saturated, pausing launches"
                );
                self.emit(RunnerEvent::Log {
                    message: format!(
                        "pausing launches: {global_active} active against budget {effective}"
                    ),
                });
                self.over_limit_warned = true;
            }
            return Ok(());
        }
        if slots > 0 {
            self.over_limit_warned = false;
        }

        for record in ready.into_iter().take(slots as usize) {
            self.spawn_launch(record.branch.clone());
        }
        Ok(())
    }

    fn spawn_launch(&mut self, branch: String) {
        self.active_launches.lock().insert(branch.clone());

        let store = Arc::clone(&self.store);
        let launcher = Arc::clone(&self.launcher);
        let prompts = Arc::clone(&self.prompts);
        let events = self.events.clone();
        let settings = self.settings.clone();
        let active = Arc::clone(&self.active_launches);

        let task = tokio::spawn(async move {
            launch_one(store, launcher, prompts, events, settings, &branch).await;
            active.lock().remove(&branch);
        });
        self.launch_tasks.push(task);
    }
}

/// Claim, build the prompt, invoke the launcher, and record the outcome.
async fn launch_one<C: Clock>(
    store: Arc<StateStore<C>>,
    launcher: Arc<dyn Launcher>,
    prompts: Arc<dyn PromptGenerator>,
    events: mpsc::Sender<RunnerEvent>,
    settings: RunnerSettings,
    branch: &str,
) {
    let outcome = match store.claim_ready_execution(branch) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(branch, error = %e, "claim failed");
            return;
        }
    };
    if !outcome.success {
        debug!(branch, error = ?outcome.error, "claim rejected");
        return;
    }
    let Some(record) = outcome.execution else {
        return;
    };

    let stories = store.list_stories(record.id.as_str()).unwrap_or_default();
    let prompt = prompts.generate(&record, &stories);
    let cwd = record
        .worktree_path
        .clone()
        .unwrap_or_else(|| record.project_root.clone());
    let spec = LaunchSpec {
        execution_id: record.id.to_string(),
        prompt,
        cwd,
        log_path: record.log_path.clone(),
    };

    // The launcher has its own startup deadline; this is the caller-side
    // backstop so a wedged launcher cannot pin the slot forever.
    let launched = tokio::time::timeout(settings.launch_timeout, launcher.launch(spec)).await;

    match launched {
        Ok(launch) if launch.success => {
            let Some(task_id) = launch.agent_task_id else {
                record_launch_failure(&store, &events, &settings, &record, "launcher returned no task id");
                return;
            };
            let patch = ExecutionPatch::new()
                .status(ExecutionStatus::Running)
                .agent(task_id, launch.agent_pid)
                .log_path(launch.log_path.or_else(|| record.log_path.clone()))
                .clear_last_error();
            match store.update_execution(record.id.as_str(), patch, UpdateOpts::default()) {
                Ok(_) => {
                    info!(branch, pid = ?launch.agent_pid, "agent running");
                    let _ = events.try_send(RunnerEvent::PrdStarted {
                        id: record.id.clone(),
                        branch: record.branch.clone(),
                    });
                }
                Err(e) => error!(branch, error = %e, "failed to record running state"),
            }
        }
        Ok(launch) => {
            let error = launch
                .error
                .unwrap_or_else(|| "launcher reported failure".to_string());
            record_launch_failure(&store, &events, &settings, &record, &error);
        }
        Err(_elapsed) => {
            record_launch_failure(
                &store,
                &events,
                &settings,
                &record,
                &format!(
                    "Launch timeout after {}s",
                    settings.launch_timeout.as_secs()
                ),
            );
        }
    }
}

/// Launch-time failure branch: retry while the attempt budget lasts.
fn record_launch_failure<C: Clock>(
    store: &StateStore<C>,
    events: &mpsc::Sender<RunnerEvent>,
    settings: &RunnerSettings,
    record: &ExecutionRecord,
    error: &str,
) {
    if record.launch_attempts >= settings.max_retries {
        let message = format!(
            "Launch failed after {} attempts: {error}",
            record.launch_attempts
        );
        warn!(branch = %record.branch, "{message}");
        if let Err(e) = store.update_execution(
            record.id.as_str(),
            ExecutionPatch::new()
                .status(ExecutionStatus::Failed)
                .last_error(message.clone())
                .clear_agent(),
            UpdateOpts::default(),
        ) {
            error!(branch = %record.branch, error = %e, "failed to record launch failure");
        }
        let _ = events.try_send(RunnerEvent::PrdFailed {
            id: record.id.clone(),
            branch: record.branch.clone(),
            error: message,
        });
    } else {
        warn!(
            branch = %record.branch,
            attempts = record.launch_attempts,
            error,
            "launch failed, will retry"
        );
        if let Err(e) = store.update_execution(
            record.id.as_str(),
            ExecutionPatch::new()
                .status(ExecutionStatus::Ready)
                .last_error(error)
                .clear_agent(),
            UpdateOpts::default(),
        ) {
            error!(branch = %record.branch, error = %e, "failed to revert failed launch");
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
