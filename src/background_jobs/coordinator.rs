use super::context::{JobContext, PipelineComponents};
use super::handle::{CoordinatorCommand, CoordinatorHandle, JobRunInfo, SharedJobState};
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use super::jobs::system_status;
use crate::clock::Clock;
use crate::events::{EventDispatcher, LifecycleEvent, SystemState};
use crate::server::metrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_WAIT: Duration = Duration::from_secs(30);

/// Drives the pipeline jobs on their schedules.
///
/// A job never has two executions in flight; different jobs run
/// concurrently. Schedule state lives in memory and is measured with the
/// injected clock, so a restart runs every interval job once right away.
pub struct LifecycleCoordinator {
    shared_state: Arc<RwLock<SharedJobState>>,
    running_handles: HashMap<String, JoinHandle<()>>,
    job_cancel_tokens: HashMap<String, CancellationToken>,
    hook_receiver: mpsc::Receiver<HookEvent>,
    command_receiver: mpsc::Receiver<CoordinatorCommand>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
    clock: Arc<dyn Clock>,
    event_dispatcher: Option<EventDispatcher>,
}

impl LifecycleCoordinator {
    /// Register a job. Interval jobs are due immediately.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        if job.schedule().interval().is_some() {
            state.next_runs.insert(job_id.clone(), self.clock.now());
        }
        state.jobs.insert(job_id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Delivers lifecycle events for as long as the coordinator runs, and
    /// flushes them after the last job has stopped.
    pub fn set_event_dispatcher(&mut self, dispatcher: EventDispatcher) {
        self.event_dispatcher = Some(dispatcher);
    }

    /// Main coordinator loop.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!(
            "Starting lifecycle coordinator with {} registered jobs",
            job_count
        );

        let dispatcher_token = CancellationToken::new();
        let dispatcher_task = self
            .event_dispatcher
            .take()
            .map(|dispatcher| tokio::spawn(dispatcher.run(dispatcher_token.clone())));

        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            self.cleanup_completed_jobs();

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Coordinator sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(event) = self.hook_receiver.recv() => {
                    debug!("Received hook event: {}", event);
                    self.trigger_jobs_for_hook(event).await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Coordinator received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        let status = system_status(
            &self.job_context.components,
            SystemState::Offline,
            false,
            Some("shutdown requested".to_string()),
        )
        .await;
        self.job_context
            .components
            .events
            .emit(LifecycleEvent::SystemStatus(status));

        if let Some(task) = dispatcher_task {
            dispatcher_token.cancel();
            if tokio::time::timeout(SHUTDOWN_WAIT, task).await.is_err() {
                warn!("Event dispatcher did not flush in time");
            }
        }

        info!("Lifecycle coordinator stopped");
    }

    /// Spawns every job due at the clock's current time and returns their
    /// ids. `run` does this on its own; tests drive it with a manual clock.
    pub async fn tick(&mut self) -> Vec<String> {
        self.cleanup_completed_jobs();
        self.run_due_jobs().await
    }

    /// Waits for every job execution currently in flight.
    pub async fn wait_for_running_jobs(&mut self) {
        for (_, handle) in self.running_handles.drain() {
            let _ = handle.await;
        }
        self.job_cancel_tokens.clear();
    }

    async fn handle_command(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    /// Manually trigger a job by ID.
    pub async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        if !self.shared_state.read().await.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }
        if self.spawn_job(job_id, "manual").await {
            Ok(())
        } else {
            Err(JobError::AlreadyRunning)
        }
    }

    async fn time_until_next_scheduled_job(&self) -> Duration {
        let now = self.clock.now();
        let state = self.shared_state.read().await;
        let mut min_duration = DEFAULT_CHECK_INTERVAL;

        for (job_id, next_run) in &state.next_runs {
            let wait = Duration::from_secs((next_run - now).max(0) as u64);
            // An overrunning job cannot start again, don't spin on it.
            let wait = if state.running_jobs.contains(job_id) {
                wait.max(Duration::from_secs(1))
            } else {
                wait
            };
            min_duration = min_duration.min(wait);
        }

        min_duration
    }

    async fn run_due_jobs(&mut self) -> Vec<String> {
        let now = self.clock.now();
        let due: Vec<String> = {
            let state = self.shared_state.read().await;
            state
                .next_runs
                .iter()
                .filter(|(job_id, next_run)| {
                    **next_run <= now && !state.running_jobs.contains(*job_id)
                })
                .map(|(job_id, _)| job_id.clone())
                .collect()
        };

        let mut spawned = Vec::new();
        for job_id in due {
            if self.spawn_job(&job_id, "schedule").await {
                spawned.push(job_id);
            }
        }
        spawned
    }

    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let listeners: Vec<String> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .iter()
                .filter(|(_, job)| job.schedule().listens_to(event))
                .map(|(job_id, _)| job_id.clone())
                .collect()
        };

        let trigger = format!("hook:{}", event);
        for job_id in listeners {
            if !self.spawn_job(&job_id, &trigger).await {
                debug!("Skipping hook trigger for already running job: {}", job_id);
            }
        }
    }

    /// Starts one execution of `job_id`. Returns false if the job is
    /// unknown or already running.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) -> bool {
        let now = self.clock.now();
        let job = {
            let mut state = self.shared_state.write().await;
            let Some(job) = state.jobs.get(job_id).cloned() else {
                error!("Attempted to spawn unknown job: {}", job_id);
                return false;
            };
            if !state.running_jobs.insert(job_id.to_string()) {
                return false;
            }
            // Push the next run out now so a slow job is not re-selected
            // on every loop iteration.
            if let Some(interval) = job.schedule().interval() {
                state
                    .next_runs
                    .insert(job_id.to_string(), now + interval.as_secs() as i64);
            }
            state.last_runs.insert(
                job_id.to_string(),
                JobRunInfo {
                    started_at: now,
                    finished_at: None,
                    status: "running".to_string(),
                    error_message: None,
                    triggered_by: triggered_by.to_string(),
                },
            );
            job
        };

        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);
        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token);

        let job_id_owned = job_id.to_string();
        let triggered_by = triggered_by.to_string();
        let shared_state = Arc::clone(&self.shared_state);
        let clock = Arc::clone(&self.clock);

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let interval = job.schedule().interval();
            let result = tokio::spawn(async move { job.execute(&ctx).await }).await;
            let elapsed = start_time.elapsed();

            let (error_message, status_label) = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (None, "success")
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (Some("Cancelled".to_string()), "cancelled")
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (Some(e.to_string()), "failed")
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    (Some(format!("Task panic: {}", e)), "panic")
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            let finished_at = clock.now();
            let mut state = shared_state.write().await;
            state.last_runs.insert(
                job_id_owned.clone(),
                JobRunInfo {
                    started_at: now,
                    finished_at: Some(finished_at),
                    status: status_label.to_string(),
                    error_message,
                    triggered_by,
                },
            );
            if let Some(interval) = interval {
                state
                    .next_runs
                    .insert(job_id_owned.clone(), finished_at + interval.as_secs() as i64);
            }
            state.running_jobs.remove(&job_id_owned);
        });

        self.running_handles.insert(job_id.to_string(), handle);
        true
    }

    fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            self.running_handles.remove(&job_id);
            self.job_cancel_tokens.remove(&job_id);
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down lifecycle coordinator...");

        let mut wait_jobs = Vec::new();
        {
            let state = self.shared_state.read().await;
            for (job_id, handle) in self.running_handles.drain() {
                let behavior = state
                    .jobs
                    .get(&job_id)
                    .map(|j| j.shutdown_behavior())
                    .unwrap_or_default();
                if behavior == ShutdownBehavior::Cancellable {
                    if let Some(token) = self.job_cancel_tokens.get(&job_id) {
                        debug!("Cancelling job: {}", job_id);
                        token.cancel();
                    }
                } else {
                    info!("Waiting for job {} to complete...", job_id);
                }
                wait_jobs.push((job_id, handle));
            }
        }

        for (job_id, handle) in wait_jobs {
            if tokio::time::timeout(SHUTDOWN_WAIT, handle).await.is_err() {
                warn!("Job {} did not stop within {:?}", job_id, SHUTDOWN_WAIT);
            }
        }

        self.job_cancel_tokens.clear();
        info!("Lifecycle coordinator shutdown complete");
    }
}

/// Create a coordinator and its handle.
///
/// Job executions get children of `shutdown_token`.
pub fn create_coordinator(
    components: PipelineComponents,
    shutdown_token: CancellationToken,
) -> (LifecycleCoordinator, CoordinatorHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let (hook_tx, hook_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));

    let clock = Arc::clone(&components.clock);
    let job_context = JobContext::new(shutdown_token.child_token(), components, hook_tx.clone());

    let coordinator = LifecycleCoordinator {
        shared_state: Arc::clone(&shared_state),
        running_handles: HashMap::new(),
        job_cancel_tokens: HashMap::new(),
        hook_receiver: hook_rx,
        command_receiver: command_rx,
        shutdown_token,
        job_context,
        clock,
        event_dispatcher: None,
    };
    let handle = CoordinatorHandle::new(command_tx, hook_tx, shared_state);

    (coordinator, handle)
}
