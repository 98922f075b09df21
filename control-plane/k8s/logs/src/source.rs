use crate::BoxError;
use futures::prelude::*;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, LogParams},
    runtime::{watcher, WatchStreamExt},
};
use std::fmt;
use tokio_util::{
    codec::{FramedRead, LinesCodec},
    compat::FuturesAsyncReadCompatExt,
};

/// Lines longer than this fail the stream.
const MAX_LINE_LENGTH: usize = 1024 * 1024;
const INITIAL_LINE_CAPACITY: usize = 2 * 1024;

pub type PodEvents = stream::BoxStream<'static, watcher::Event<Pod>>;
pub type Lines = stream::BoxStream<'static, Result<String, BoxError>>;

/// A single container of a single pod.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerRef {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

/// Where pods and their logs come from.
#[async_trait::async_trait]
pub trait LogSource: Send + Sync + 'static {
    /// Watches pods in `namespace` (or all namespaces) matching `selector`.
    fn watch_pods(&self, namespace: Option<&str>, selector: Option<&str>) -> PodEvents;

    /// Opens the log stream of one container.
    async fn follow(&self, target: &ContainerRef, params: &LogParams) -> Result<Lines, BoxError>;
}

#[derive(Clone)]
pub struct KubeLogSource {
    client: kube::Client,
}

// === impl ContainerRef ===

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

// === impl KubeLogSource ===

impl KubeLogSource {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

impl fmt::Debug for KubeLogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeLogSource").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl LogSource for KubeLogSource {
    fn watch_pods(&self, namespace: Option<&str>, selector: Option<&str>) -> PodEvents {
        let api = match namespace {
            Some(ns) => Api::<Pod>::namespaced(self.client.clone(), ns),
            None => Api::<Pod>::all(self.client.clone()),
        };
        let mut config = watcher::Config::default();
        if let Some(selector) = selector {
            config = config.labels(selector);
        }

        watcher(api, config)
            .default_backoff()
            .filter_map(|res| async move {
                match res {
                    Ok(event) => Some(event),
                    Err(error) => {
                        tracing::info!(%error, "Pod watch failed");
                        None
                    }
                }
            })
            .boxed()
    }

    async fn follow(&self, target: &ContainerRef, params: &LogParams) -> Result<Lines, BoxError> {
        let api = Api::<Pod>::namespaced(self.client.clone(), &target.namespace);
        let reader = api.log_stream(&target.pod, params).await?;
        let lines = FramedRead::with_capacity(
            reader.compat(),
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            INITIAL_LINE_CAPACITY,
        );
        Ok(lines.map_err(BoxError::from).boxed())
    }
}
