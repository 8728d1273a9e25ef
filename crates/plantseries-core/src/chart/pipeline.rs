//! Cancelable chart jobs.
//!
//! Each job is one spawned tokio task walking the stage machine
//! `Queued → Loading → Transforming → Sampling → Done`, with `Cancelled`
//! absorbing from any non-terminal stage. The caller holds a
//! [`JobHandle`]: an event stream plus a cancellation trigger.
//!
//! Event-stream contract, enforced here rather than in each stage:
//! progress percentages are clamped monotonically non-decreasing within
//! 0–100, a final `Progress` at 100 precedes `Done`, and every job
//! delivers exactly one terminal event (`Done`, `Cancelled`, or
//! `Failed`). Ordering holds only within one job's stream; concurrent
//! jobs are independent.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chart::transform::SeriesMap;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Non-terminal stages a job moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    /// Accepted, not yet running a stage.
    Queued,
    /// Reading rows from the partition store.
    Loading,
    /// Converting rows to series points.
    Transforming,
    /// Downsampling the series.
    Sampling,
}

/// One event on a job's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// Stage and overall percentage, 0–100 and non-decreasing.
    Progress {
        /// Current stage.
        stage: JobStage,
        /// Overall completion percentage.
        percent: u8,
    },
    /// Terminal: the job finished with this result.
    Done {
        /// The prepared chart series.
        series: SeriesMap,
    },
    /// Terminal: cancellation was observed; no result follows.
    Cancelled,
    /// Terminal: the job failed.
    Failed {
        /// Human-readable failure description.
        message: String,
    },
}

impl JobEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress { .. })
    }
}

/// Caller-side handle to one running job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    events: mpsc::Receiver<JobEvent>,
    token: CancellationToken,
}

impl JobHandle {
    /// The job's identifier.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Request cooperative cancellation. The job stops at its next
    /// chunk boundary and delivers `Cancelled` as its terminal event.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Next event, `None` once the stream is exhausted after the
    /// terminal event.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Drain the stream and return the terminal event.
    pub async fn wait(mut self) -> Option<JobEvent> {
        let mut terminal = None;
        while let Some(event) = self.next_event().await {
            if event.is_terminal() {
                terminal = Some(event);
            }
        }
        terminal
    }
}

/// Progress reporter handed to job stages.
///
/// Clamps percentages into 0–100 and never lets them go backwards, so
/// stages can report their own band arithmetic without coordinating.
#[derive(Debug)]
pub struct ProgressSink {
    tx: mpsc::Sender<JobEvent>,
    last: u8,
    sent_any: bool,
}

impl ProgressSink {
    /// Report progress. Repeats of the current percentage are dropped.
    pub async fn report(&mut self, stage: JobStage, percent: u8) {
        let percent = percent.min(100).max(self.last);
        if self.sent_any && percent == self.last {
            return;
        }
        self.last = percent;
        self.sent_any = true;
        // A dropped receiver means the caller stopped listening; the
        // job still runs to completion.
        let _ = self.tx.send(JobEvent::Progress { stage, percent }).await;
    }

    /// Non-blocking variant for synchronous hot loops. A full channel
    /// drops the update; the next one carries the newer percentage.
    pub fn report_sync(&mut self, stage: JobStage, percent: u8) {
        let percent = percent.min(100).max(self.last);
        if self.sent_any && percent == self.last {
            return;
        }
        self.last = percent;
        self.sent_any = true;
        let _ = self.tx.try_send(JobEvent::Progress { stage, percent });
    }
}

/// How the job body ended; the runner turns this into the terminal
/// event.
#[derive(Debug)]
pub(crate) enum JobOutcome {
    Done(SeriesMap),
    Cancelled,
    Failed(String),
}

/// Spawn a job task and return its handle.
///
/// The body receives a [`ProgressSink`] and the job's cancellation
/// token; the runner emits the initial `Queued` progress, the final
/// 100, and the single terminal event.
pub(crate) fn spawn<F, Fut>(work: F) -> JobHandle
where
    F: FnOnce(ProgressSink, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    let (tx, events) = mpsc::channel(64);
    let token = CancellationToken::new();
    let id = JobId::next();

    let job_token = token.clone();
    tokio::spawn(async move {
        let mut sink = ProgressSink {
            tx: tx.clone(),
            last: 0,
            sent_any: false,
        };
        sink.report(JobStage::Queued, 0).await;

        let outcome = work(sink, job_token).await;
        let terminal = match outcome {
            JobOutcome::Done(series) => {
                let _ = tx
                    .send(JobEvent::Progress {
                        stage: JobStage::Sampling,
                        percent: 100,
                    })
                    .await;
                log::debug!("{id} done");
                JobEvent::Done { series }
            }
            JobOutcome::Cancelled => {
                log::debug!("{id} cancelled");
                JobEvent::Cancelled
            }
            JobOutcome::Failed(message) => {
                log::warn!("{id} failed: {message}");
                JobEvent::Failed { message }
            }
        };
        let _ = tx.send(terminal).await;
    });

    JobHandle { id, events, token }
}
