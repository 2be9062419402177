//! Service group runner and the run lifecycle around it.

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{AppError, Result};
use crate::output::ReachabilityReport;
use crate::preflight::{self, PreflightOutcome};
use crate::probe::{self, GroupIdentity, ProbeResult, ProbeTarget, ServiceGroup, TargetKind, Verdict};
use crate::proxy::{ProxyRouter, TransportSettings};

/// One line of the report: which group, which target, what happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeRecord {
    pub group: GroupIdentity,
    pub target: ProbeTarget,
    pub result: ProbeResult,
}

/// Dispatch a target to the prober for its kind.
pub async fn probe_target(target: &ProbeTarget, router: &ProxyRouter) -> ProbeResult {
    match target.kind {
        TargetKind::TcpDial => probe::tcp::probe(target, router).await,
        TargetKind::HttpGet | TargetKind::HttpPostJson | TargetKind::HttpGetAuthenticated => {
            probe::http::probe(target, router).await
        }
    }
}

/// Records in declared order, and whether the run was cut short
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub records: Vec<ProbeRecord>,
    pub interrupted: bool,
}

pub struct Runner {
    router: Arc<ProxyRouter>,
    concurrency: usize,
    cancel: CancellationToken,
    show_progress: bool,
}

impl Runner {
    pub fn new(router: Arc<ProxyRouter>) -> Self {
        Self {
            router,
            concurrency: 1,
            cancel: CancellationToken::new(),
            show_progress: false,
        }
    }

    /// Maximum probes in flight. 1 (the default) means strictly sequential.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Probe every target of every group, in order.
    ///
    /// A failing target never stops the run. Each probe runs in its own task,
    /// so a panic inside one probe becomes an `Unreachable` record. On
    /// cancellation no new probes start, in-flight probes are dropped, and
    /// only completed records are returned.
    pub async fn run_all(&self, groups: &[ServiceGroup]) -> RunOutcome {
        let jobs: Vec<(usize, usize, GroupIdentity, ProbeTarget)> = groups
            .iter()
            .enumerate()
            .flat_map(|(group_index, group)| {
                let identity = group.identity();
                group
                    .targets
                    .iter()
                    .enumerate()
                    .map(move |(target_index, target)| {
                        (group_index, target_index, identity.clone(), target.clone())
                    })
            })
            .collect();

        let total = jobs.len();
        let progress = self.progress_bar(total);

        let records: Vec<Option<ProbeRecord>> = stream::iter(jobs)
            .map(|(group_index, target_index, group, target)| {
                let router = Arc::clone(&self.router);
                let cancel = self.cancel.clone();
                let progress = progress.clone();
                let span = tracing::info_span!("probe", group = group_index, target = target_index);

                async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    if let Some(pb) = &progress {
                        pb.set_message(format!("{} {}", group, target.address));
                    }

                    let task_target = target.clone();
                    let start = Instant::now();
                    let mut handle = tokio::spawn(
                        async move { probe_target(&task_target, &router).await }.in_current_span(),
                    );

                    let result = tokio::select! {
                        _ = cancel.cancelled() => {
                            handle.abort();
                            return None;
                        }
                        joined = &mut handle => match joined {
                            Ok(result) => result,
                            Err(err) => {
                                tracing::error!(endpoint = %target.address, error = %err, "Probe task failed");
                                ProbeResult::transport_failure(
                                    format!("probe aborted: {}", err),
                                    start.elapsed(),
                                )
                            }
                        },
                    };

                    log_result(&group, &target, &result);
                    if let Some(pb) = &progress {
                        pb.inc(1);
                    }

                    Some(ProbeRecord {
                        group,
                        target,
                        result,
                    })
                }
                .instrument(span)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let records: Vec<ProbeRecord> = records.into_iter().flatten().collect();
        let interrupted = self.cancel.is_cancelled() && records.len() < total;
        if interrupted {
            tracing::warn!(completed = records.len(), total, "Run interrupted");
        }

        RunOutcome {
            records,
            interrupted,
        }
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        pb.set_style(style);
        Some(pb)
    }
}

fn log_result(group: &GroupIdentity, target: &ProbeTarget, result: &ProbeResult) {
    let local = result.local_addr.as_deref().unwrap_or("-");
    let remote = result.remote_addr.as_deref().unwrap_or("-");
    match result.verdict {
        Verdict::Reachable | Verdict::ReachableUnauthenticated => tracing::info!(
            cloud = %group.cloud,
            datacenter = %group.datacenter,
            kind = %target.kind,
            endpoint = %target.address,
            status = ?result.status,
            local_addr = local,
            remote_addr = remote,
            duration_ms = result.duration_ms,
            "{} is reachable",
            target.address
        ),
        Verdict::UnexpectedStatus => tracing::warn!(
            cloud = %group.cloud,
            datacenter = %group.datacenter,
            kind = %target.kind,
            endpoint = %target.address,
            status = ?result.status,
            duration_ms = result.duration_ms,
            "{} returned {}",
            target.address,
            result.detail
        ),
        Verdict::Unreachable => tracing::warn!(
            cloud = %group.cloud,
            datacenter = %group.datacenter,
            kind = %target.kind,
            endpoint = %target.address,
            attempted = result.attempted,
            error = %result.detail,
            "{} is not reachable",
            target.address
        ),
    }
}

/// Where a diagnostic run is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Resolving,
    Preflighting,
    Running { total: usize },
    /// Every group processed
    Done,
    /// Cancelled before every group was processed; the report holds the
    /// completed records only
    Interrupted,
    Fatal,
}

/// Everything a diagnostic run needs besides the groups themselves
#[derive(Debug, Clone)]
pub struct DiagnosticOptions {
    /// Raw proxy string; empty means direct
    pub proxy: String,
    pub settings: TransportSettings,
    /// Known-good URL for the preflight check; `None` skips it
    pub preflight_url: Option<String>,
    pub concurrency: usize,
    pub show_progress: bool,
}

impl Default for DiagnosticOptions {
    fn default() -> Self {
        Self {
            proxy: String::new(),
            settings: TransportSettings::default(),
            preflight_url: Some(crate::config::DEFAULT_PREFLIGHT_URL.to_string()),
            concurrency: 1,
            show_progress: false,
        }
    }
}

/// Drives one run: resolve the path, preflight it, probe every group.
pub struct Diagnostic {
    options: DiagnosticOptions,
    cancel: CancellationToken,
    phase: RunPhase,
}

impl Diagnostic {
    pub fn new(options: DiagnosticOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
            phase: RunPhase::Idle,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "Run phase change");
        self.phase = phase;
    }

    pub async fn run(&mut self, groups: &[ServiceGroup]) -> Result<ReachabilityReport> {
        self.enter(RunPhase::Resolving);
        let router = match ProxyRouter::resolve(&self.options.proxy, &self.options.settings) {
            Ok(router) => router,
            Err(err) => {
                self.enter(RunPhase::Fatal);
                return Err(err);
            }
        };
        self.run_with_router(router, groups).await
    }

    /// Run against an already resolved router.
    pub async fn run_with_router(
        &mut self,
        router: ProxyRouter,
        groups: &[ServiceGroup],
    ) -> Result<ReachabilityReport> {
        let start = Instant::now();
        let router = Arc::new(router);

        let preflight = match self.options.preflight_url.clone() {
            Some(url) => {
                self.enter(RunPhase::Preflighting);
                let outcome = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.enter(RunPhase::Interrupted);
                        return Err(AppError::Interrupted);
                    }
                    outcome = preflight::verify(&router, &url) => outcome,
                };
                if let PreflightOutcome::Fatal { reason } = &outcome {
                    self.enter(RunPhase::Fatal);
                    return Err(AppError::Preflight {
                        url,
                        proxy: router.spec().sanitized(),
                        reason: reason.clone(),
                    });
                }
                Some(outcome)
            }
            None => {
                tracing::debug!("Preflight check disabled");
                None
            }
        };

        let total = groups.iter().map(|g| g.targets.len()).sum();
        self.enter(RunPhase::Running { total });

        let outcome = Runner::new(Arc::clone(&router))
            .with_concurrency(self.options.concurrency)
            .with_cancellation(self.cancel.clone())
            .with_progress(self.options.show_progress)
            .run_all(groups)
            .await;

        self.enter(if outcome.interrupted {
            RunPhase::Interrupted
        } else {
            RunPhase::Done
        });

        Ok(ReachabilityReport::new(
            router.spec(),
            preflight,
            outcome,
            duration_ms(start.elapsed()),
        ))
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis() as u64
}
