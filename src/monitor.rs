//! Poll Scheduler / Failure Escalator - drives the change-detection loop
//!
//! A single scheduler wakes on a fixed interval, checks every tracked item
//! with bounded concurrency, and escalates items that persistently resolve
//! to not-found. One item's failure never aborts the pass for the others,
//! and no error in here is allowed to kill the loop: the outer loop backs
//! off and continues.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{parse_duration, MonitorConfig};
use crate::detector::{self, LatestDiff};
use crate::dispatch::{Dispatcher, Messenger};
use crate::error::FetchError;
use crate::github::ResourceClient;
use crate::render;
use crate::resolver::CredentialResolver;
use crate::store::{ItemKey, TrackedItem, TrackerDb};
use crate::tokens::CredentialStore;

/// Backoff after an unexpected error in the outer loop
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Results from one complete poll pass
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub items_checked: usize,
    pub notifications_sent: usize,
    pub skipped_no_credential: usize,
    pub items_removed: usize,
    pub failed_checks: usize,
}

/// Outcome of checking a single tracked item
enum CheckOutcome {
    /// Check completed; carries the number of notifications sent
    Checked(usize),
    /// No subscriber credential was usable this tick (expected, frequent)
    SkippedNoCredential,
    /// Transient fetch failure, retried implicitly next tick
    FetchFailed,
    /// Item hit the not-found threshold and was removed
    Removed,
}

pub struct Monitor {
    store: Arc<TrackerDb>,
    client: Arc<dyn ResourceClient>,
    resolver: CredentialResolver,
    dispatcher: Dispatcher,
    settings: MonitorConfig,
    shutdown_sender: broadcast::Sender<()>,
    shutdown_requested: AtomicBool,
    passes: AtomicU32,
}

impl Monitor {
    pub fn new(
        store: Arc<TrackerDb>,
        client: Arc<dyn ResourceClient>,
        credentials: Arc<dyn CredentialStore>,
        messenger: Arc<dyn Messenger>,
        settings: MonitorConfig,
    ) -> Self {
        let resolver = CredentialResolver::new(credentials, Arc::clone(&client));
        let dispatcher = Dispatcher::new(messenger);
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            store,
            client,
            resolver,
            dispatcher,
            settings,
            shutdown_sender,
            shutdown_requested: AtomicBool::new(false),
            passes: AtomicU32::new(0),
        }
    }

    /// Request a clean stop: an in-flight pass finishes, then the loop exits
    pub fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        let _ = self.shutdown_sender.send(());
    }

    /// Run the polling loop until shutdown
    pub async fn run(&self) -> Result<()> {
        let poll_interval =
            parse_duration(&self.settings.interval).context("Failed to parse poll interval")?;
        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        let mut interval_timer = interval(poll_interval);
        // A tick arriving while a pass is still running is dropped, not
        // queued: passes never overlap and never pile up.
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Monitor loop started with interval: {:?}", poll_interval);

        // Skip the first immediate tick
        interval_timer.tick().await;

        loop {
            if self.shutdown_requested.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received in monitor loop");
                    break;
                }

                _ = interval_timer.tick() => {
                    if self.shutdown_requested.load(Ordering::SeqCst) {
                        break;
                    }

                    debug!("Starting scheduled poll pass");
                    let pass_start = Instant::now();

                    match self.run_pass().await {
                        Ok(summary) => {
                            self.log_pass(&summary, pass_start.elapsed());
                        }
                        Err(e) => {
                            error!("Poll pass failed: {:?}, backing off {:?}", e, ERROR_BACKOFF);
                            tokio::time::sleep(ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        info!("Monitor loop exiting");
        Ok(())
    }

    /// Run exactly one poll pass over all tracked items.
    ///
    /// Items are checked with bounded concurrency; each check is isolated so
    /// a failure in one never affects the others. Public so the CLI `check`
    /// command can trigger a single pass on demand.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let items = self.store.list_all().context("Failed to list tracked items")?;

        let checked = AtomicUsize::new(0);
        let notified = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let removed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        futures::stream::iter(items)
            .for_each_concurrent(self.settings.max_parallel_checks.max(1), |item| {
                let checked = &checked;
                let notified = &notified;
                let skipped = &skipped;
                let removed = &removed;
                let failed = &failed;
                async move {
                    let label = item.key.label();
                    match self.check_item(item).await {
                        Ok(CheckOutcome::Checked(count)) => {
                            checked.fetch_add(1, Ordering::Relaxed);
                            notified.fetch_add(count, Ordering::Relaxed);
                        }
                        Ok(CheckOutcome::SkippedNoCredential) => {
                            skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(CheckOutcome::FetchFailed) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(CheckOutcome::Removed) => {
                            removed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            error!("Error checking {}: {:#}", label, e);
                        }
                    }
                }
            })
            .await;

        self.maybe_purge();

        Ok(PassSummary {
            items_checked: checked.into_inner(),
            notifications_sent: notified.into_inner(),
            skipped_no_credential: skipped.into_inner(),
            items_removed: removed.into_inner(),
            failed_checks: failed.into_inner(),
        })
    }

    /// Orphan cleanup runs once every N passes, not on every mutation
    fn maybe_purge(&self) {
        let every = self.settings.purge_every_passes.max(1);
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        if pass % every == 0 {
            if let Err(e) = self.store.purge_orphans() {
                warn!("Orphan purge failed: {:#}", e);
            }
        }
    }

    /// Check a single tracked item for changes
    async fn check_item(&self, item: TrackedItem) -> Result<CheckOutcome> {
        // Credential resolution can hit the network itself (star watches
        // validate the token's login), so it runs under the fetch timeout
        // like every other call; a hung lookup must not stall the pass.
        let token = match timeout(self.fetch_timeout(), self.resolver.resolve(&item)).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No usable credential for {}, skipping", item.key.label());
                return Ok(CheckOutcome::SkippedNoCredential);
            }
            Err(_) => {
                debug!(
                    "Credential resolution timed out for {}, skipping",
                    item.key.label()
                );
                return Ok(CheckOutcome::SkippedNoCredential);
            }
        };

        match item.key.clone() {
            ItemKey::Releases { owner, repo } => {
                let fetched = self
                    .with_timeout(self.client.latest_release(&owner, &repo, &token))
                    .await;
                match fetched {
                    Ok(release) => {
                        let text = release
                            .as_ref()
                            .map(|r| render::release_notification(&owner, &repo, r));
                        let id = release.as_ref().map(|r| r.id.clone());
                        self.apply_latest(&item, id.as_deref(), text).await
                    }
                    Err(e) => self.handle_fetch_error(&item, e).await,
                }
            }
            ItemKey::Issues { owner, repo } => {
                let fetched = self
                    .with_timeout(self.client.latest_open_issue(&owner, &repo, &token))
                    .await;
                match fetched {
                    Ok(issue) => {
                        let text = issue.as_ref().map(|i| render::issue_notification(&repo, i));
                        let id = issue.as_ref().map(|i| i.id.clone());
                        self.apply_latest(&item, id.as_deref(), text).await
                    }
                    Err(e) => self.handle_fetch_error(&item, e).await,
                }
            }
            ItemKey::Stars { account } => {
                let fetched = self
                    .with_timeout(
                        self.client
                            .starred_page(&token, self.settings.star_page_size),
                    )
                    .await;
                match fetched {
                    Ok(page) => self.apply_stars(&item, &account, &page).await,
                    Err(e) => self.handle_fetch_error(&item, e).await,
                }
            }
        }
    }

    /// Apply a latest-id diff (release or issue watch) and notify on change
    async fn apply_latest(
        &self,
        item: &TrackedItem,
        fetched_id: Option<&str>,
        text: Option<String>,
    ) -> Result<CheckOutcome> {
        self.store.reset_not_found(item.id)?;

        match detector::diff_latest(item.marker.as_ref(), fetched_id) {
            LatestDiff::Unchanged => Ok(CheckOutcome::Checked(0)),
            LatestDiff::Baseline(marker) => {
                debug!("Baseline established for {}", item.key.label());
                self.store.update_marker(item.id, &marker)?;
                Ok(CheckOutcome::Checked(0))
            }
            LatestDiff::Changed(marker) => {
                self.store.update_marker(item.id, &marker)?;

                let mut sent = 0;
                if let Some(text) = text {
                    info!("New item detected for {}", item.key.label());
                    sent = self.dispatcher.dispatch(&item.destinations, &text).await;
                }
                Ok(CheckOutcome::Checked(sent))
            }
        }
    }

    /// Apply a star-set diff and notify per newly starred repository
    async fn apply_stars(
        &self,
        item: &TrackedItem,
        account: &str,
        page: &[crate::github::StarredRepo],
    ) -> Result<CheckOutcome> {
        self.store.reset_not_found(item.id)?;

        let diff = detector::diff_stars(item.marker.as_ref(), page);

        let mut sent = 0;
        for starred in &diff.newly_starred {
            info!("New star by @{}: {}", account, starred.full_name);
            let text = render::starred_notification(account, starred);
            sent += self.dispatcher.dispatch(&item.destinations, &text).await;
        }

        self.store.update_marker(item.id, &diff.new_marker)?;
        Ok(CheckOutcome::Checked(sent))
    }

    /// Classify a fetch failure: transient errors are logged and retried on
    /// the next tick; not-found results accumulate toward removal.
    async fn handle_fetch_error(
        &self,
        item: &TrackedItem,
        err: FetchError,
    ) -> Result<CheckOutcome> {
        match err {
            FetchError::NotFound => {
                let count = self.store.increment_not_found(item.id)?;
                warn!(
                    "{} not found ({}/{} consecutive)",
                    item.key.label(),
                    count,
                    self.settings.not_found_threshold
                );

                if count >= self.settings.not_found_threshold {
                    let notice = render::tracking_stopped_notice(&item.key);
                    self.dispatcher.dispatch(&item.destinations, &notice).await;
                    self.store.remove_item(item.id)?;
                    info!(
                        "Removed {} after {} consecutive not-found results",
                        item.key.label(),
                        count
                    );
                    return Ok(CheckOutcome::Removed);
                }

                Ok(CheckOutcome::FetchFailed)
            }
            FetchError::Unauthorized => {
                warn!("Credential rejected while checking {}", item.key.label());
                Ok(CheckOutcome::FetchFailed)
            }
            FetchError::Timeout | FetchError::Transport(_) => {
                debug!("Transient failure checking {}: {}", item.key.label(), err);
                Ok(CheckOutcome::FetchFailed)
            }
        }
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.fetch_timeout)
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, FetchError> {
        match timeout(self.fetch_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    fn log_pass(&self, summary: &PassSummary, duration: Duration) {
        info!(
            "Pass completed in {:.2}s: {} checked, {} notifications, {} skipped (no credential), {} removed, {} failed",
            duration.as_secs_f64(),
            summary.items_checked,
            summary.notifications_sent,
            summary.skipped_no_credential,
            summary.items_removed,
            summary.failed_checks
        );
    }
}
