use crate::{index::PodIndex, Config, Error, LogEntry, LogSource};
use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

const FRESH: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;
const STOPPED: u8 = 3;

/// Capacity of the errors channel. Errors are dropped when it is full.
const ERRORS_CAPACITY: usize = 100;

/// A multiplexed log stream.
///
/// The stream moves from fresh to running to stopping to stopped, never
/// backwards. Only the first call to [`LogStream::start`] succeeds. Only the
/// first call to [`LogStream::stop`] does any work; once it returns, both
/// output channels are closed and drain to their end.
pub struct LogStream<S> {
    state: AtomicU8,
    config: Arc<Config>,
    source: Arc<S>,
    index: Arc<RwLock<PodIndex<S>>>,
    token: CancellationToken,
    tracker: TaskTracker,
}

/// The consumer's side of a [`LogStream`].
#[derive(Debug)]
pub struct Output {
    /// Closed once the stream has stopped and every buffered entry is read.
    pub entries: mpsc::Receiver<LogEntry>,

    /// Per-container failures. These never end the stream.
    pub errors: mpsc::Receiver<Error>,
}

// === impl LogStream ===

impl<S: LogSource> LogStream<S> {
    pub fn new(config: Config, source: S) -> Result<(Self, Output), Error> {
        config.validate()?;
        let config = Arc::new(config);
        let source = Arc::new(source);

        let (entries_tx, entries) = mpsc::channel(config.buffer);
        let (errors_tx, errors) = mpsc::channel(ERRORS_CAPACITY);
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let index = PodIndex::new(
            config.clone(),
            source.clone(),
            entries_tx,
            errors_tx,
            token.clone(),
            tracker.clone(),
        );

        let stream = Self {
            state: AtomicU8::new(FRESH),
            config,
            source,
            index: Arc::new(RwLock::new(index)),
            token,
            tracker,
        };
        Ok((stream, Output { entries, errors }))
    }

    /// Starts discovering pods. The stream stops following containers when
    /// `parent` is cancelled.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), Error> {
        if self
            .state
            .compare_exchange(FRESH, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        let parent = parent.clone();
        let token = self.token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => token.cancel(),
                _ = token.cancelled() => {}
            }
        });

        let events = self.source.watch_pods(
            self.config.namespace.as_deref(),
            self.config.selector.as_deref(),
        );
        let index = self.index.clone();
        let token = self.token.clone();
        self.tracker.spawn(
            async move {
                tokio::select! {
                    _ = kubert::index::namespaced(index.clone(), events) => {
                        tracing::debug!("Pod watch ended");
                    }
                    _ = token.cancelled() => {}
                }
                index.write().close();
            }
            .instrument(tracing::info_span!(
                "pods",
                selector = self.config.selector.as_deref().unwrap_or_default(),
            )),
        );

        Ok(())
    }

    /// Stops every task and closes the output channels.
    pub async fn stop(&self) {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state != FRESH && state != RUNNING {
                return;
            }
            match self.state.compare_exchange(
                state,
                STOPPING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(s) => state = s,
            }
        }

        self.token.cancel();
        self.index.write().close();
        self.tracker.close();
        self.tracker.wait().await;
        self.state.store(STOPPED, Ordering::Release);
        tracing::debug!("Log stream stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPED
    }

    #[cfg(test)]
    pub(crate) fn index(&self) -> &Arc<RwLock<PodIndex<S>>> {
        &self.index
    }
}

impl<S> Drop for LogStream<S> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
