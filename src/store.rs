use crate::{
    error::SourceError,
    resources::HTTPProxy,
};
use futures::{
    Future,
    StreamExt as _,
};
use kube::{
    runtime::{
        reflector::{
            self,
            Store,
        },
        watcher,
        WatchStreamExt as _,
    },
    Api,
    ResourceExt as _,
};
use std::sync::Arc;

/// A locally cached, eventually consistent view of the HTTPProxy resources.
pub trait ProxySnapshot {
    /// Resolves once the snapshot was populated at least once.
    fn wait_synced(&self) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// The proxies in `namespace`, or all of them for `None`.
    fn list(&self, namespace: Option<&str>) -> Result<Vec<Arc<HTTPProxy>>, SourceError>;
}

fn in_namespace(proxy: &HTTPProxy, namespace: Option<&str>) -> bool {
    namespace.map_or(true, |ns| proxy.namespace().as_deref() == Some(ns))
}

/// Snapshot backed by a kube-runtime reflector store.
#[derive(Clone)]
pub struct ReflectorSnapshot {
    store: Store<HTTPProxy>,
}

impl ReflectorSnapshot {
    /// Starts watching HTTPProxies in `namespace` (all namespaces for `None`).
    ///
    /// The returned future drives the watch and has to be polled (spawned) for the snapshot to fill up.
    pub fn watch(client: kube::Client, namespace: Option<&str>) -> (Self, impl Future<Output = ()> + Send + 'static) {
        let api = match namespace {
            Some(ns) => Api::<HTTPProxy>::namespaced(client, ns),
            None => Api::<HTTPProxy>::all(client),
        };

        let (store, writer) = reflector::store();
        let driver = watcher(api, watcher::Config::default())
            .default_backoff()
            .reflect(writer)
            .touched_objects()
            .for_each(|result| {
                match result {
                    Ok(proxy) => trace!(proxy = %proxy.key(), "HTTPProxy changed"),
                    Err(err) => warn!("HTTPProxy watch error: {err}"),
                }
                futures::future::ready(())
            });

        (Self { store }, driver)
    }
}

impl ProxySnapshot for ReflectorSnapshot {
    async fn wait_synced(&self) -> Result<(), SourceError> {
        self.store
            .wait_until_ready()
            .await
            .map_err(|err| SourceError::Snapshot(err.to_string()))
    }

    fn list(&self, namespace: Option<&str>) -> Result<Vec<Arc<HTTPProxy>>, SourceError> {
        Ok(self
            .store
            .state()
            .into_iter()
            .filter(|proxy| in_namespace(proxy, namespace))
            .collect())
    }
}

/// A fixed set of proxies, always synced.
impl ProxySnapshot for Vec<HTTPProxy> {
    async fn wait_synced(&self) -> Result<(), SourceError> {
        Ok(())
    }

    fn list(&self, namespace: Option<&str>) -> Result<Vec<Arc<HTTPProxy>>, SourceError> {
        Ok(self
            .iter()
            .filter(|proxy| in_namespace(proxy, namespace))
            .cloned()
            .map(Arc::new)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::HTTPProxySpec;
    use kube::ResourceExt as _;

    fn proxy(ns: &str, name: &str) -> HTTPProxy {
        let mut proxy = HTTPProxy::new(name, HTTPProxySpec::default());
        proxy.metadata.namespace = Some(ns.into());
        proxy
    }

    #[tokio::test]
    async fn static_snapshot_filters_namespace() {
        let snapshot = vec![proxy("a", "one"), proxy("b", "two"), proxy("a", "three")];
        snapshot.wait_synced().await.unwrap();

        let names = |ns| {
            snapshot
                .list(ns)
                .unwrap()
                .iter()
                .map(|p| p.name_any())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(None), vec!["one", "two", "three"]);
        assert_eq!(names(Some("a")), vec!["one", "three"]);
        assert!(names(Some("c")).is_empty());
    }
}
