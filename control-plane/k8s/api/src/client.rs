use crate::{
    error::{Error, ObjectKind, Verb},
    Certificate, Deployment, HTTPRoute, HorizontalPodAutoscaler, Namespace, Pod, Role,
    RoleBinding, Secret, Service, ServiceAccount,
};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Identifies the platform as the owner of the fields it writes.
pub const FIELD_MANAGER: &str = "loco";

/// A namespaced object kind the platform reads or writes.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: ObjectKind;
}

/// Typed access to the cluster API.
///
/// Every call is scoped to a single namespace except the namespace calls
/// themselves. Not-found and conflict responses surface as
/// [`Error::NotFound`] and [`Error::AlreadyExists`].
#[async_trait::async_trait]
pub trait Cluster: Clone + Send + Sync + 'static {
    async fn create_namespace(&self, ns: &Namespace) -> Result<Namespace, Error>;

    async fn get_namespace(&self, name: &str) -> Result<Namespace, Error>;

    /// Deletes a namespace and, by cascade, everything in it.
    async fn delete_namespace(&self, name: &str) -> Result<(), Error>;

    async fn create<K: Object>(&self, ns: &str, obj: &K) -> Result<K, Error>;

    async fn get<K: Object>(&self, ns: &str, name: &str) -> Result<K, Error>;

    /// Replaces an object. The object's resource version guards against
    /// concurrent writers.
    async fn replace<K: Object>(&self, ns: &str, obj: &K) -> Result<K, Error>;

    async fn delete<K: Object>(&self, ns: &str, name: &str) -> Result<(), Error>;

    async fn list<K: Object>(&self, ns: &str, selector: &str) -> Result<Vec<K>, Error>;

    async fn exists<K: Object>(&self, ns: &str, name: &str) -> Result<bool, Error> {
        match self.get::<K>(ns, name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Creates the object or, if it exists, replaces it in place.
    async fn upsert<K: Object>(&self, ns: &str, obj: K) -> Result<K, Error> {
        let mut obj = obj;
        match self.get::<K>(ns, &obj.name_any()).await {
            Ok(current) => {
                obj.meta_mut().resource_version = current.resource_version();
                self.replace(ns, &obj).await
            }
            Err(e) if e.is_not_found() => self.create(ns, &obj).await,
            Err(e) => Err(e),
        }
    }
}

/// A [`Cluster`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

macro_rules! object_kinds {
    ($($ty:ty => $kind:ident),+ $(,)?) => {
        $(
            impl Object for $ty {
                const KIND: ObjectKind = ObjectKind::$kind;
            }
        )+
    };
}

object_kinds! {
    Secret => Secret,
    ServiceAccount => ServiceAccount,
    Role => Role,
    RoleBinding => RoleBinding,
    Service => Service,
    Deployment => Deployment,
    HTTPRoute => HttpRoute,
    HorizontalPodAutoscaler => Autoscaler,
    Certificate => Certificate,
    Pod => Pod,
}

// === impl KubeCluster ===

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> kube::Client {
        self.client.clone()
    }

    fn api<K: Object>(&self, ns: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

impl fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Cluster for KubeCluster {
    async fn create_namespace(&self, ns: &Namespace) -> Result<Namespace, Error> {
        let name = ns.name_any();
        tracing::debug!(%name, "Creating namespace");
        Api::<Namespace>::all(self.client.clone())
            .create(&Self::post_params(), ns)
            .await
            .map_err(|e| Error::from_kube(Verb::Create, ObjectKind::Namespace, &name, e))
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, Error> {
        Api::<Namespace>::all(self.client.clone())
            .get(name)
            .await
            .map_err(|e| Error::from_kube(Verb::Get, ObjectKind::Namespace, name, e))
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        tracing::debug!(%name, "Deleting namespace");
        Api::<Namespace>::all(self.client.clone())
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(Verb::Delete, ObjectKind::Namespace, name, e))
    }

    async fn create<K: Object>(&self, ns: &str, obj: &K) -> Result<K, Error> {
        let name = obj.name_any();
        tracing::debug!(namespace = %ns, %name, kind = %K::KIND, "Creating");
        self.api::<K>(ns)
            .create(&Self::post_params(), obj)
            .await
            .map_err(|e| Error::from_kube(Verb::Create, K::KIND, &qualified(ns, &name), e))
    }

    async fn get<K: Object>(&self, ns: &str, name: &str) -> Result<K, Error> {
        self.api::<K>(ns)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(Verb::Get, K::KIND, &qualified(ns, name), e))
    }

    async fn replace<K: Object>(&self, ns: &str, obj: &K) -> Result<K, Error> {
        let name = obj.name_any();
        tracing::debug!(namespace = %ns, %name, kind = %K::KIND, "Updating");
        self.api::<K>(ns)
            .replace(&name, &Self::post_params(), obj)
            .await
            .map_err(|e| Error::from_kube(Verb::Replace, K::KIND, &qualified(ns, &name), e))
    }

    async fn delete<K: Object>(&self, ns: &str, name: &str) -> Result<(), Error> {
        self.api::<K>(ns)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(Verb::Delete, K::KIND, &qualified(ns, name), e))
    }

    async fn list<K: Object>(&self, ns: &str, selector: &str) -> Result<Vec<K>, Error> {
        let params = ListParams::default().labels(selector);
        self.api::<K>(ns)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| Error::from_kube(Verb::List, K::KIND, ns, e))
    }
}

fn qualified(ns: &str, name: &str) -> String {
    format!("{ns}/{name}")
}
