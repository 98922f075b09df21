use crate::{
    index::{self, Slots},
    Config, ContainerRef, Error, LogEntry, LogSource,
};
use chrono::Utc;
use futures::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Forwards one container's log lines into the shared entries channel.
pub(crate) struct Follow<S> {
    pub(crate) id: u64,
    pub(crate) target: ContainerRef,
    pub(crate) config: Arc<Config>,
    pub(crate) source: Arc<S>,
    pub(crate) entries: mpsc::Sender<LogEntry>,
    pub(crate) errors: mpsc::Sender<Error>,
    pub(crate) slots: Slots,
    pub(crate) token: CancellationToken,
}

impl<S: LogSource> Follow<S> {
    pub(crate) async fn run(self) {
        tokio::select! {
            biased;

            _ = self.token.cancelled() => {
                tracing::debug!("Cancelled");
            }

            error = self.forward() => match error {
                Some(error) => {
                    tracing::debug!(%error, "Log stream finished");
                    // Errors are dropped when the channel is full.
                    let _ = self.errors.try_send(error);
                }
                None => tracing::debug!("Consumer went away"),
            },
        }

        index::release(&self.slots, &self.target, self.id);
    }

    /// Returns the error that ended the stream, or `None` if the entries
    /// channel closed.
    async fn forward(&self) -> Option<Error> {
        let params = self.config.log_params(&self.target.container, Utc::now());
        let mut lines = match self.source.follow(&self.target, &params).await {
            Ok(lines) => lines,
            Err(source) => {
                return Some(Error::Open {
                    target: self.target.clone(),
                    source,
                })
            }
        };

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(source) => {
                    return Some(Error::Read {
                        target: self.target.clone(),
                        source,
                    })
                }
            };

            let entry = LogEntry::parse(&self.target, &line, self.config.timestamps, Utc::now());
            let Some(entry) = self.config.process(entry) else {
                continue;
            };
            if self.entries.send(entry).await.is_err() {
                return None;
            }
        }

        Some(Error::Ended {
            target: self.target.clone(),
        })
    }
}
