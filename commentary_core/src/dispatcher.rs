//! Concurrent per-sentence speech synthesis.
//!
//! Every dispatched sentence becomes its own task in a [`JoinSet`]. A task
//! submits the text, waits for the take to become ready up to the policy
//! timeout, and on expiry still asks for whatever reference the service can
//! give. Faults are caught inside the task and turned into an absent result,
//! so one sentence never affects another.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tts_core::{AudioReference, SynthesisError, SynthesisService, TakeHandle, TakeStatus};

use crate::Sentence;

/// Per-sentence wait bounds.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisPolicy {
    /// Shared by submit and the readiness wait.
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Bound on the current-reference fetch made after `timeout` expires.
    pub reference_timeout: Duration,
    /// How long cancelled tasks get to wind down before being aborted.
    pub shutdown_grace: Duration,
}

impl Default for SynthesisPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(250),
            reference_timeout: Duration::from_millis(500),
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

/// Outcome of synthesizing one sentence. Produced exactly once per
/// dispatched sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisResult {
    pub index: usize,
    pub audio: Option<AudioReference>,
    pub error: Option<String>,
}

impl SynthesisResult {
    fn ready(index: usize, audio: AudioReference) -> Self {
        Self { index, audio: Some(audio), error: None }
    }

    /// Synthesis disabled; not an error.
    fn disabled(index: usize) -> Self {
        Self { index, audio: None, error: None }
    }

    fn failed(index: usize, error: impl ToString) -> Self {
        Self { index, audio: None, error: Some(error.to_string()) }
    }
}

pub struct SynthesisDispatcher {
    service: Option<Arc<dyn SynthesisService>>,
    policy: SynthesisPolicy,
    tasks: JoinSet<SynthesisResult>,
    /// Results that never needed a task.
    ready: VecDeque<SynthesisResult>,
    cancel: CancellationToken,
}

impl SynthesisDispatcher {
    pub fn new(service: Option<Arc<dyn SynthesisService>>, policy: SynthesisPolicy) -> Self {
        Self {
            service,
            policy,
            tasks: JoinSet::new(),
            ready: VecDeque::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.service.is_some()
    }

    /// Start synthesizing a sentence. Never waits on the synthesis itself.
    pub fn dispatch(&mut self, sentence: &Sentence) {
        let index = sentence.index;
        let Some(service) = self.service.clone() else {
            self.ready.push_back(SynthesisResult::disabled(index));
            return;
        };

        let text = sentence.text.clone();
        let policy = self.policy;
        let cancel = self.cancel.child_token();
        self.tasks.spawn(async move {
            let work = AssertUnwindSafe(synthesize(service, index, text, policy)).catch_unwind();
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(index, "synthesis cancelled");
                    SynthesisResult::failed(index, "cancelled")
                }
                outcome = work => outcome.unwrap_or_else(|_| {
                    warn!(index, "synthesis task panicked");
                    SynthesisResult::failed(index, "synthesis task panicked")
                }),
            }
        });
    }

    /// Results not yet handed out by [`next_result`](Self::next_result).
    pub fn outstanding(&self) -> usize {
        self.ready.len() + self.tasks.len()
    }

    /// Next finished result in completion order, or `None` once everything
    /// dispatched so far has been handed out.
    pub async fn next_result(&mut self) -> Option<SynthesisResult> {
        if let Some(result) = self.ready.pop_front() {
            return Some(result);
        }
        loop {
            match self.tasks.join_next().await? {
                Ok(result) => return Some(result),
                // panics are caught inside the task, so only aborts land here
                Err(e) => debug!(error = %e, "synthesis task ended without a result"),
            }
        }
    }

    /// Cancel everything still in flight and wait for it to stop. Tasks
    /// that ignore cancellation past the grace period are aborted.
    pub async fn shutdown(&mut self) {
        self.ready.clear();
        if self.tasks.is_empty() {
            return;
        }
        debug!(in_flight = self.tasks.len(), "cancelling synthesis tasks");
        self.cancel.cancel();

        let drain = async {
            while self.tasks.join_next().await.is_some() {}
        };
        if timeout(self.policy.shutdown_grace, drain).await.is_err() {
            warn!(remaining = self.tasks.len(), "synthesis tasks ignored cancellation, aborting");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
    }
}

impl Drop for SynthesisDispatcher {
    fn drop(&mut self) {
        // JoinSet aborts its tasks on drop; cancel first so they see it
        self.cancel.cancel();
    }
}

async fn synthesize(
    service: Arc<dyn SynthesisService>,
    index: usize,
    text: String,
    policy: SynthesisPolicy,
) -> SynthesisResult {
    let deadline = Instant::now() + policy.timeout;

    let handle = match timeout_at(deadline, service.submit(&text)).await {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            warn!(index, error = %e, "synthesis submit failed");
            return SynthesisResult::failed(index, e);
        }
        Err(_) => {
            warn!(index, "synthesis submit timed out");
            return SynthesisResult::failed(index, "submit timed out");
        }
    };

    match timeout_at(deadline, wait_ready(service.as_ref(), &handle, policy.poll_interval)).await {
        Ok(Ok(audio)) => SynthesisResult::ready(index, audio),
        Ok(Err(e)) => {
            warn!(index, error = %e, "synthesis failed");
            SynthesisResult::failed(index, e)
        }
        Err(_) => {
            // the take may still be playable even if not finished
            debug!(index, "synthesis not ready in time, fetching current reference");
            match timeout(policy.reference_timeout, service.current_reference(&handle)).await {
                Ok(Ok(audio)) => SynthesisResult::ready(index, audio),
                Ok(Err(e)) => {
                    warn!(index, error = %e, "no audio reference after timeout");
                    SynthesisResult::failed(index, e)
                }
                Err(_) => SynthesisResult::failed(index, "reference fetch timed out"),
            }
        }
    }
}

async fn wait_ready(
    service: &dyn SynthesisService,
    handle: &TakeHandle,
    poll_interval: Duration,
) -> Result<AudioReference, SynthesisError> {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let TakeStatus::Ready(audio) = service.poll(handle).await? {
            return Ok(audio);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sentence(index: usize, text: &str) -> Sentence {
        Sentence { index, text: text.to_string() }
    }

    fn fast_policy() -> SynthesisPolicy {
        SynthesisPolicy {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            reference_timeout: Duration::from_millis(100),
            shutdown_grace: Duration::from_millis(100),
        }
    }

    /// Becomes ready after `polls_until_ready` polls; `None` never does.
    struct CountingService {
        polls_until_ready: Option<usize>,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl SynthesisService for CountingService {
        async fn submit(&self, text: &str) -> Result<TakeHandle, SynthesisError> {
            if text.contains("boom") {
                return Err(SynthesisError::Rejected { status: 500, body: "boom".into() });
            }
            Ok(TakeHandle(text.to_string()))
        }

        async fn poll(&self, handle: &TakeHandle) -> Result<TakeStatus, SynthesisError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.polls_until_ready {
                Some(limit) if n >= limit => {
                    Ok(TakeStatus::Ready(AudioReference(format!("ready://{}", handle.0))))
                }
                _ => Ok(TakeStatus::Pending),
            }
        }

        async fn current_reference(&self, handle: &TakeHandle) -> Result<AudioReference, SynthesisError> {
            Ok(AudioReference(format!("partial://{}", handle.0)))
        }
    }

    fn service(polls_until_ready: Option<usize>) -> Arc<dyn SynthesisService> {
        Arc::new(CountingService { polls_until_ready, polls: AtomicUsize::new(0) })
    }

    /// Submit takes `submit_delay`, the take never becomes ready and the
    /// reference fetch takes `reference_delay`. Records when the fetch starts.
    struct SlowService {
        started: Instant,
        submit_delay: Duration,
        reference_delay: Duration,
        fetch_at: std::sync::Mutex<Option<Duration>>,
    }

    impl SlowService {
        fn new(submit_delay: Duration, reference_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                started: Instant::now(),
                submit_delay,
                reference_delay,
                fetch_at: std::sync::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl SynthesisService for SlowService {
        async fn submit(&self, text: &str) -> Result<TakeHandle, SynthesisError> {
            tokio::time::sleep(self.submit_delay).await;
            Ok(TakeHandle(text.to_string()))
        }

        async fn poll(&self, _handle: &TakeHandle) -> Result<TakeStatus, SynthesisError> {
            Ok(TakeStatus::Pending)
        }

        async fn current_reference(&self, handle: &TakeHandle) -> Result<AudioReference, SynthesisError> {
            *self.fetch_at.lock().unwrap() = Some(self.started.elapsed());
            tokio::time::sleep(self.reference_delay).await;
            Ok(AudioReference(format!("partial://{}", handle.0)))
        }
    }

    fn default_policy() -> SynthesisPolicy {
        SynthesisPolicy::default()
    }

    #[tokio::test]
    async fn test_unconfigured_yields_absent_immediately() {
        let mut dispatcher = SynthesisDispatcher::new(None, fast_policy());
        assert!(!dispatcher.is_enabled());
        dispatcher.dispatch(&sentence(0, "One."));
        dispatcher.dispatch(&sentence(1, "Two."));

        assert_eq!(dispatcher.next_result().await, Some(SynthesisResult::disabled(0)));
        assert_eq!(dispatcher.next_result().await, Some(SynthesisResult::disabled(1)));
        assert_eq!(dispatcher.next_result().await, None);
    }

    #[tokio::test]
    async fn test_ready_reference_returned() {
        let mut dispatcher = SynthesisDispatcher::new(Some(service(Some(2))), fast_policy());
        dispatcher.dispatch(&sentence(0, "Nice move."));

        let result = dispatcher.next_result().await.unwrap();
        assert_eq!(result.index, 0);
        assert_eq!(result.audio, Some(AudioReference("ready://Nice move.".into())));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_current_reference() {
        let mut dispatcher = SynthesisDispatcher::new(Some(service(None)), fast_policy());
        dispatcher.dispatch(&sentence(3, "Slow."));

        let result = dispatcher.next_result().await.unwrap();
        assert_eq!(result.index, 3);
        assert_eq!(result.audio, Some(AudioReference("partial://Slow.".into())));
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let mut dispatcher = SynthesisDispatcher::new(Some(service(Some(1))), fast_policy());
        dispatcher.dispatch(&sentence(0, "Fine."));
        dispatcher.dispatch(&sentence(1, "boom."));
        dispatcher.dispatch(&sentence(2, "Also fine."));

        let mut results = Vec::new();
        while let Some(result) = dispatcher.next_result().await {
            results.push(result);
        }
        results.sort_by_key(|r| r.index);

        assert_eq!(results.len(), 3);
        assert!(results[0].audio.is_some());
        assert!(results[1].audio.is_none());
        assert!(results[1].error.as_deref().unwrap().contains("boom"));
        assert!(results[2].audio.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_joins_in_flight_tasks() {
        let policy = SynthesisPolicy { timeout: Duration::from_secs(30), ..fast_policy() };
        let mut dispatcher = SynthesisDispatcher::new(Some(service(None)), policy);
        dispatcher.dispatch(&sentence(0, "Stuck."));
        dispatcher.dispatch(&sentence(1, "Also stuck."));
        assert_eq!(dispatcher.outstanding(), 2);

        tokio::time::timeout(Duration::from_secs(1), dispatcher.shutdown())
            .await
            .expect("shutdown should finish within the grace period");
        assert_eq!(dispatcher.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_and_wait_share_one_deadline() {
        let service = SlowService::new(Duration::from_millis(1900), Duration::ZERO);
        let mut dispatcher = SynthesisDispatcher::new(Some(service.clone()), default_policy());
        dispatcher.dispatch(&sentence(0, "Nice move."));

        let result = dispatcher.next_result().await.unwrap();
        assert_eq!(result.audio, Some(AudioReference("partial://Nice move.".into())));

        let fetch_at = service.fetch_at.lock().unwrap().expect("reference fetched");
        assert!(fetch_at >= Duration::from_secs(2), "fetched at {fetch_at:?}");
        assert!(fetch_at < Duration::from_millis(2100), "fetched at {fetch_at:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_fetch_has_its_own_short_bound() {
        let service = SlowService::new(Duration::from_millis(1900), Duration::from_millis(1900));
        let mut dispatcher = SynthesisDispatcher::new(Some(service.clone()), default_policy());
        let started = Instant::now();
        dispatcher.dispatch(&sentence(0, "Nice move."));

        let result = dispatcher.next_result().await.unwrap();
        assert!(result.audio.is_none());
        assert_eq!(result.error.as_deref(), Some("reference fetch timed out"));

        let elapsed = started.elapsed();
        let budget = default_policy().timeout + default_policy().reference_timeout;
        assert!(elapsed <= budget + Duration::from_millis(50), "took {elapsed:?}");
    }
}
