//! Resumable batch orchestration.
//!
//! Wires the proxy pool, the prober and the persistence collaborators into a
//! chunked sweep over the identifier list: one concurrency wave per chunk,
//! one checkpoint per chunk, paced between chunks.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;

use crate::config::SweepConfig;
use crate::external_deps::notifier::{DisabledNotifier, Notifier, TelegramNotifier};
use crate::modules::checkpoint::{
	Checkpoint, CheckpointError, CheckpointStore, JsonCheckpointStore, RunCounts, RunStatus,
};
use crate::modules::health::{HealthProbe, SystemHealth};
use crate::modules::identifiers::{FileIdentifierSource, IdentifierSource, is_well_formed, next_chunk};
use crate::modules::proxy::{PoolHealth, ProxyPool, ProxyPoolConfig};
use crate::modules::report::ReportGenerator;
use crate::modules::storage::{RedbResultStore, ResultSink, StoreError};
use crate::probe::{Outcome, ProbeError, ProbeTransport, Prober, ReqwestTransport};

/// Errors raised while assembling a [`Sweep`]. A run itself never fails;
/// its outcome is the [`RunSummary`].
#[derive(Debug, Error)]
pub enum SweepError {
	#[error("failed to open result store: {0}")]
	Store(#[from] StoreError),
	#[error("invalid sweep configuration: {0}")]
	InvalidConfig(String),
}

/// Progress of a single identifier within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
	Pending,
	Available,
	Taken,
	Unknown,
	Errored,
}

impl From<Outcome> for JobState {
	fn from(outcome: Outcome) -> Self {
		match outcome {
			Outcome::Available => JobState::Available,
			Outcome::Taken => JobState::Taken,
			Outcome::Unknown => JobState::Unknown,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckJob {
	pub identifier: String,
	pub state: JobState,
}

impl CheckJob {
	pub fn new(identifier: impl Into<String>) -> Self {
		Self {
			identifier: identifier.into(),
			state: JobState::Pending,
		}
	}

	fn resolve(&mut self, outcome: Outcome) {
		self.state = outcome.into();
	}

	fn fail(&mut self) {
		self.state = JobState::Errored;
	}
}

/// Final state of a run, as persisted and reported.
#[derive(Debug, Clone)]
pub struct RunSummary {
	pub status: RunStatus,
	pub counts: RunCounts,
	pub offset: u64,
	pub total: usize,
	pub failure_reason: Option<String>,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	pub next_run_estimate: Option<DateTime<Utc>>,
	pub pool: PoolHealth,
}

impl RunSummary {
	/// Whether the process should exit cleanly.
	pub fn is_success(&self) -> bool {
		matches!(
			self.status,
			RunStatus::Completed | RunStatus::HaltedEmptyInput
		)
	}

	pub fn notification_text(&self) -> String {
		match self.status {
			RunStatus::Completed => format!(
				"✅ Sweep completed: {} checked ({} available, {} taken, {} unknown), {} errored, {} skipped.",
				self.counts.resolved(),
				self.counts.available,
				self.counts.taken,
				self.counts.unknown,
				self.counts.errored,
				self.counts.skipped
			),
			RunStatus::HaltedProxies => format!(
				"‼️ Sweep halted: all {} proxies are blacklisted. Progress saved at {}/{}.",
				self.pool.total, self.offset, self.total
			),
			RunStatus::HaltedEmptyInput => {
				"⚠️ Sweep halted: the identifier list is empty.".to_string()
			}
			RunStatus::Failed => format!(
				"‼️ Sweep failed at {}/{}: {}",
				self.offset,
				self.total,
				self.failure_reason.as_deref().unwrap_or("unknown error")
			),
			RunStatus::Initializing | RunStatus::Running => {
				format!("‼️ Sweep stopped in state {:?}.", self.status)
			}
		}
	}
}

impl fmt::Display for RunSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{:?} at {}/{}: available={} taken={} unknown={} errored={} skipped={}",
			self.status,
			self.offset,
			self.total,
			self.counts.available,
			self.counts.taken,
			self.counts.unknown,
			self.counts.errored,
			self.counts.skipped
		)
	}
}

/// Fluent builder for [`Sweep`]. Collaborators not supplied explicitly are
/// derived from the [`SweepConfig`].
pub struct SweepBuilder {
	config: SweepConfig,
	pool: Option<ProxyPool>,
	transport: Option<Arc<dyn ProbeTransport>>,
	source: Option<Arc<dyn IdentifierSource>>,
	sink: Option<Arc<dyn ResultSink>>,
	checkpoints: Option<Arc<dyn CheckpointStore>>,
	notifier: Option<Arc<dyn Notifier>>,
	health: Option<Option<Arc<dyn HealthProbe>>>,
	reports: Option<Option<ReportGenerator>>,
}

impl SweepBuilder {
	pub fn new(config: SweepConfig) -> Self {
		Self {
			config,
			pool: None,
			transport: None,
			source: None,
			sink: None,
			checkpoints: None,
			notifier: None,
			health: None,
			reports: None,
		}
	}

	pub fn with_pool(mut self, pool: ProxyPool) -> Self {
		self.pool = Some(pool);
		self
	}

	pub fn with_transport(mut self, transport: Arc<dyn ProbeTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_source(mut self, source: Arc<dyn IdentifierSource>) -> Self {
		self.source = Some(source);
		self
	}

	pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
		self.sink = Some(sink);
		self
	}

	pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
		self.checkpoints = Some(store);
		self
	}

	pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
		self.notifier = Some(notifier);
		self
	}

	pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
		self.health = Some(Some(probe));
		self
	}

	pub fn without_health_check(mut self) -> Self {
		self.health = Some(None);
		self
	}

	pub fn with_report_generator(mut self, generator: ReportGenerator) -> Self {
		self.reports = Some(Some(generator));
		self
	}

	pub fn without_reports(mut self) -> Self {
		self.reports = Some(None);
		self
	}

	pub fn build(self) -> Result<Sweep, SweepError> {
		let config = self.config;
		if config.chunk_size == 0 {
			return Err(SweepError::InvalidConfig(
				"chunk size must be at least 1".into(),
			));
		}

		let pool = self.pool.unwrap_or_else(|| {
			let pool_config = ProxyPoolConfig::default()
				.with_cooldown(config.proxy_cooldown)
				.with_blacklist_path(&config.blacklist_path);
			ProxyPool::from_files(&config.proxy_list_path, pool_config)
		});

		let transport: Arc<dyn ProbeTransport> = match self.transport {
			Some(transport) => transport,
			None => Arc::new(ReqwestTransport::new()),
		};
		let prober = Arc::new(Prober::new(transport, config.prober.clone()));

		let sink: Arc<dyn ResultSink> = match self.sink {
			Some(sink) => sink,
			None => Arc::new(RedbResultStore::open(&config.results_db_path)?),
		};

		let source: Arc<dyn IdentifierSource> = match self.source {
			Some(source) => source,
			None => Arc::new(FileIdentifierSource::new(&config.identifier_list_path)),
		};

		let checkpoints: Arc<dyn CheckpointStore> = match self.checkpoints {
			Some(store) => store,
			None => Arc::new(JsonCheckpointStore::new(&config.checkpoint_path)),
		};

		let notifier: Arc<dyn Notifier> = match self.notifier {
			Some(notifier) => notifier,
			None => {
				let telegram = TelegramNotifier::new(
					config.telegram_bot_token.clone(),
					config.telegram_chat_id.clone(),
				);
				if telegram.is_configured() {
					Arc::new(telegram)
				} else {
					Arc::new(DisabledNotifier)
				}
			}
		};

		let health: Option<Arc<dyn HealthProbe>> = match self.health {
			Some(health) => health,
			None => Some(Arc::new(SystemHealth::new(config.health))),
		};

		let reports = match self.reports {
			Some(reports) => reports,
			None => Some(ReportGenerator::new(&config.report_dir)),
		};

		Ok(Sweep {
			config,
			pool,
			prober,
			source,
			sink,
			checkpoints,
			notifier,
			health,
			reports,
		})
	}
}

/// The batch orchestrator. Owns the proxy pool exclusively; the prober is
/// shared with the per-identifier tasks.
pub struct Sweep {
	config: SweepConfig,
	pool: ProxyPool,
	prober: Arc<Prober>,
	source: Arc<dyn IdentifierSource>,
	sink: Arc<dyn ResultSink>,
	checkpoints: Arc<dyn CheckpointStore>,
	notifier: Arc<dyn Notifier>,
	health: Option<Arc<dyn HealthProbe>>,
	reports: Option<ReportGenerator>,
}

impl Sweep {
	pub fn builder(config: SweepConfig) -> SweepBuilder {
		SweepBuilder::new(config)
	}

	pub fn config(&self) -> &SweepConfig {
		&self.config
	}

	pub fn pool(&self) -> &ProxyPool {
		&self.pool
	}

	/// Run one sweep from the persisted position to the end of the list, or
	/// until a halt condition. Finalization happens for every terminal state.
	pub async fn run(&mut self) -> RunSummary {
		self.report_host_health().await;

		let started_at = Utc::now();
		let mut checkpoint = self.load_checkpoint();
		checkpoint.status = RunStatus::Initializing;
		checkpoint.failure_reason = None;
		checkpoint.started_at = Some(started_at);

		let pool = self.pool.health_report();
		log::info!(
			"starting sweep with {} usable proxies ({} blacklisted), resuming at offset {}",
			pool.usable,
			pool.blacklisted,
			checkpoint.offset
		);

		let mut total = 0;
		let (status, failure_reason) = match self.process(&mut checkpoint, &mut total).await {
			Ok(status) => (status, None),
			Err(err) => {
				log::error!("sweep failed reading identifiers: {err}");
				(RunStatus::Failed, Some(err.to_string()))
			}
		};

		self.finalize(checkpoint, status, failure_reason, started_at, total)
			.await
	}

	async fn process(&mut self, checkpoint: &mut Checkpoint, total: &mut usize) -> io::Result<RunStatus> {
		*total = self.source.total()?;
		if *total == 0 {
			log::warn!("identifier list is empty");
			return Ok(RunStatus::HaltedEmptyInput);
		}

		if self.pool.is_exhausted() {
			log::error!("every proxy is blacklisted; halting at offset {}", checkpoint.offset);
			return Ok(RunStatus::HaltedProxies);
		}

		if checkpoint.offset >= *total as u64 {
			log::info!(
				"previous pass finished ({} of {}); starting a new pass",
				checkpoint.offset,
				total
			);
			checkpoint.reset_pass();
		}

		checkpoint.status = RunStatus::Running;
		self.persist(checkpoint);

		let mut stream = self.source.stream_from(checkpoint.offset as usize)?;
		let mut chunk = next_chunk(&mut stream, self.config.chunk_size)?;

		while !chunk.is_empty() {
			if self.pool.is_exhausted() {
				log::error!("every proxy is blacklisted; halting at offset {}", checkpoint.offset);
				return Ok(RunStatus::HaltedProxies);
			}

			let jobs = self.process_chunk(chunk, checkpoint).await;
			log::info!(
				"chunk done: {} checked, {} errored; progress {}/{}",
				jobs.iter().filter(|job| job.state != JobState::Errored).count(),
				jobs.iter().filter(|job| job.state == JobState::Errored).count(),
				checkpoint.offset,
				total
			);

			chunk = next_chunk(&mut stream, self.config.chunk_size)?;
			if !chunk.is_empty() {
				self.pace().await;
			}
		}

		Ok(RunStatus::Completed)
	}

	/// Resolve one chunk concurrently, fold the results into the checkpoint
	/// and persist it.
	async fn process_chunk(&mut self, chunk: Vec<String>, checkpoint: &mut Checkpoint) -> Vec<CheckJob> {
		let consumed = chunk.len() as u64;
		let mut in_flight = Vec::with_capacity(chunk.len());

		for identifier in chunk {
			if !is_well_formed(&identifier) {
				log::debug!("dropping malformed identifier {identifier:?}");
				continue;
			}

			let Some(proxy) = self.pool.acquire() else {
				log::warn!("no proxy available; skipping {identifier}");
				checkpoint.counts.skipped += 1;
				continue;
			};

			let prober = Arc::clone(&self.prober);
			let task_identifier = identifier.clone();
			let task_proxy = proxy.clone();
			let handle = tokio::spawn(async move {
				prober.classify(&task_identifier, &task_proxy).await
			});
			in_flight.push((CheckJob::new(identifier), proxy, handle));
		}

		let mut jobs = Vec::with_capacity(in_flight.len());
		let mut last_resolved = None;

		for (mut job, proxy, handle) in in_flight {
			let result = match handle.await {
				Ok(result) => result,
				Err(err) => Err(ProbeError::Unexpected(format!("probe task aborted: {err}"))),
			};

			match result {
				Ok(outcome) => {
					job.resolve(outcome);
					self.store(&job.identifier, outcome);
					checkpoint.counts.record(outcome);
					last_resolved = Some(job.identifier.clone());
				}
				Err(err) => {
					job.fail();
					log::error!("check of {} via {proxy} failed: {err}", job.identifier);
					if self.pool.release_as_bad(&proxy) {
						log::warn!("proxy {proxy} quarantined");
					}
					checkpoint.counts.errored += 1;
				}
			}
			jobs.push(job);
		}

		checkpoint.offset += consumed;
		if last_resolved.is_some() {
			checkpoint.last_identifier = last_resolved;
		}
		self.persist(checkpoint);
		jobs
	}

	fn store(&self, identifier: &str, outcome: Outcome) {
		match self.sink.save(identifier, outcome) {
			Ok(()) => log::debug!("{identifier}: {outcome}"),
			Err(StoreError::Duplicate(id)) => log::warn!("result for {id} already stored"),
			Err(err) => log::error!("failed to store result for {identifier}: {err}"),
		}
	}

	async fn finalize(
		&self,
		mut checkpoint: Checkpoint,
		status: RunStatus,
		failure_reason: Option<String>,
		started_at: DateTime<Utc>,
		total: usize,
	) -> RunSummary {
		let finished_at = Utc::now();
		checkpoint.status = status;
		checkpoint.failure_reason = failure_reason.clone();
		checkpoint.last_run_time = Some(finished_at);
		checkpoint.next_run_estimate = chrono::Duration::from_std(self.config.rerun_interval)
			.ok()
			.map(|interval| finished_at + interval);
		self.persist(&mut checkpoint);

		if let Some(reports) = &self.reports
			&& let Err(err) = reports.generate(self.sink.as_ref())
		{
			log::error!("failed to generate report: {err}");
		}

		let summary = RunSummary {
			status,
			counts: checkpoint.counts,
			offset: checkpoint.offset,
			total,
			failure_reason,
			started_at,
			finished_at,
			next_run_estimate: checkpoint.next_run_estimate,
			pool: self.pool.health_report(),
		};

		if !self.notifier.send(&summary.notification_text()).await {
			log::debug!("run notification not delivered via {}", self.notifier.name());
		}

		match status {
			RunStatus::Completed | RunStatus::HaltedEmptyInput => log::info!("sweep finished: {summary}"),
			_ => log::error!("sweep stopped: {summary}"),
		}
		summary
	}

	async fn report_host_health(&self) {
		let Some(probe) = self.health.clone() else {
			return;
		};

		match tokio::task::spawn_blocking(move || probe.check()).await {
			Ok(alerts) if alerts.is_empty() => log::info!("host health check passed"),
			Ok(alerts) => {
				let text = format!("🚨 Host health alerts:\n{}", alerts.join("\n"));
				if !self.notifier.send(&text).await {
					log::debug!("health alert not delivered via {}", self.notifier.name());
				}
			}
			Err(err) => log::warn!("host health check did not complete: {err}"),
		}
	}

	fn load_checkpoint(&self) -> Checkpoint {
		match self.checkpoints.load() {
			Ok(checkpoint) => {
				if !checkpoint.status.is_terminal() {
					log::warn!(
						"previous run stopped while {:?}; resuming at offset {}",
						checkpoint.status,
						checkpoint.offset
					);
				}
				checkpoint
			}
			Err(CheckpointError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
				log::info!("no checkpoint found; starting from the beginning");
				Checkpoint::default()
			}
			Err(err) => {
				log::error!("failed to load checkpoint: {err}; starting from the beginning");
				Checkpoint::default()
			}
		}
	}

	fn persist(&self, checkpoint: &mut Checkpoint) {
		checkpoint.updated_at = Utc::now();
		if let Err(err) = self.checkpoints.save(checkpoint) {
			log::error!("failed to save checkpoint: {err}");
		}
	}

	async fn pace(&self) {
		let delay = pace_delay(self.config.pacing);
		if !delay.is_zero() {
			log::debug!("pausing {:.2}s before next chunk", delay.as_secs_f64());
			sleep(delay).await;
		}
	}
}

/// Random pause in `[min, max)`, or `min` when the range is empty.
fn pace_delay((min, max): (Duration, Duration)) -> Duration {
	if max <= min {
		return min;
	}
	let secs = rand::thread_rng().gen_range(min.as_secs_f64()..max.as_secs_f64());
	Duration::from_secs_f64(secs)
}
