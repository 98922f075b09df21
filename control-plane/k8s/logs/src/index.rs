use crate::{follow::Follow, Config, ContainerRef, Error, LogEntry, LogSource};
use ahash::AHashMap as HashMap;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use parking_lot::Mutex;
use std::{collections::hash_map::Entry, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

/// Follow tasks keyed by the container they read from.
pub(crate) type Slots = Arc<Mutex<HashMap<ContainerRef, Slot>>>;

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) id: u64,
    token: CancellationToken,
}

/// Starts and stops follow tasks as pods come and go.
pub(crate) struct PodIndex<S> {
    config: Arc<Config>,
    source: Arc<S>,
    slots: Slots,
    next_id: u64,
    outputs: Option<Outputs>,
    token: CancellationToken,
    tracker: TaskTracker,
}

struct Outputs {
    entries: mpsc::Sender<LogEntry>,
    errors: mpsc::Sender<Error>,
}

// === impl PodIndex ===

impl<S: LogSource> PodIndex<S> {
    pub(crate) fn new(
        config: Arc<Config>,
        source: Arc<S>,
        entries: mpsc::Sender<LogEntry>,
        errors: mpsc::Sender<Error>,
        token: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            config,
            source,
            slots: Default::default(),
            next_id: 0,
            outputs: Some(Outputs { entries, errors }),
            token,
            tracker,
        }
    }

    /// Drops the index's output senders so the channels close once every
    /// follow task has exited. No tasks are started afterwards.
    pub(crate) fn close(&mut self) {
        self.outputs = None;
    }

    #[cfg(test)]
    pub(crate) fn followed(&self) -> Vec<ContainerRef> {
        let mut targets = self.slots.lock().keys().cloned().collect::<Vec<_>>();
        targets.sort();
        targets
    }

    fn follow(&mut self, target: ContainerRef) {
        let (entries, errors) = match self.outputs.as_ref() {
            Some(Outputs { entries, errors }) => (entries.clone(), errors.clone()),
            None => return,
        };

        let id = self.next_id;
        let token = self.token.child_token();
        match self.slots.lock().entry(target.clone()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(entry) => {
                entry.insert(Slot {
                    id,
                    token: token.clone(),
                });
            }
        }
        self.next_id += 1;

        tracing::debug!(%target, "Following container logs");
        let span = tracing::info_span!(
            "follow",
            namespace = %target.namespace,
            pod = %target.pod,
            container = %target.container,
        );
        let follow = Follow {
            id,
            target,
            config: self.config.clone(),
            source: self.source.clone(),
            entries,
            errors,
            slots: self.slots.clone(),
            token,
        };
        self.tracker.spawn(follow.run().instrument(span));
    }
}

impl<S: LogSource> kubert::index::IndexNamespacedResource<Pod> for PodIndex<S> {
    fn apply(&mut self, pod: Pod) {
        let Some(namespace) = pod.namespace() else {
            return;
        };
        let name = pod.name_unchecked();

        let running = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|phase| phase == "Running");
        if !running && !self.config.previous {
            tracing::trace!(%namespace, pod = %name, "Pod is not running");
            return;
        }

        let containers = pod
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .map(|c| c.name.clone())
            .filter(|c| self.config.wants_container(c))
            .collect::<Vec<_>>();
        for container in containers {
            self.follow(ContainerRef {
                namespace: namespace.clone(),
                pod: name.clone(),
                container,
            });
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.slots.lock().retain(|target, slot| {
            if target.namespace == namespace && target.pod == name {
                tracing::debug!(%target, "Pod deleted");
                slot.token.cancel();
                return false;
            }
            true
        });
    }
}

/// Removes the slot for `target` if it is still owned by the task `id`.
pub(crate) fn release(slots: &Slots, target: &ContainerRef, id: u64) {
    let mut slots = slots.lock();
    if slots.get(target).is_some_and(|slot| slot.id == id) {
        slots.remove(target);
    }
}
