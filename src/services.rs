use crate::{
    annotations::{
        self,
        Annotations,
    },
    error::SourceError,
};
use eyre::Result;
use k8s_openapi::api::core::v1::{
    LoadBalancerIngress,
    Service,
};
use std::{
    fmt,
    future::Future,
    str::FromStr,
};

/// The `namespace/name` of the service fronting contour, e.g. `projectcontour/envoy`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceLocator {
    pub namespace: String,
    pub name: String,
}

impl FromStr for ServiceLocator {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split('/').collect::<Vec<_>>()[..] {
            [namespace, name] if !namespace.is_empty() && !name.is_empty() => Ok(Self {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            _ => Err(SourceError::LoadBalancerService(s.to_string())),
        }
    }
}

impl fmt::Display for ServiceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Looks up the load balancer status of a service.
pub trait ServiceLookup {
    fn load_balancer_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Vec<LoadBalancerIngress>>> + Send;
}

impl ServiceLookup for kube::Client {
    async fn load_balancer_ingress(&self, namespace: &str, name: &str) -> Result<Vec<LoadBalancerIngress>> {
        trace!(%namespace, %name, "load balancer service lookup");
        let svc = kube::api::Api::<Service>::namespaced(self.clone(), namespace)
            .get(name)
            .await?;

        let ingress = svc
            .status
            .and_then(|status| status.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default();

        if ingress.is_empty() {
            warn!("Service {namespace}/{name} has no load balancer ingress");
        }

        Ok(ingress)
    }
}

/// Targets of a load balancer, ip before hostname for each ingress entry, in ingress order.
pub fn ingress_targets(ingress: &[LoadBalancerIngress]) -> Vec<String> {
    ingress
        .iter()
        .flat_map(|entry| [entry.ip.as_deref(), entry.hostname.as_deref()])
        .flatten()
        .filter(|target| !target.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolves the targets of resources during one synthesis pass.
///
/// The load balancer is only asked once per pass, the result (including a failed lookup) is reused for every
/// resource without a target annotation.
pub struct TargetResolver<'a, L> {
    lookup: &'a L,
    service: &'a ServiceLocator,
    fallback: Option<Vec<String>>,
}

impl<'a, L: ServiceLookup> TargetResolver<'a, L> {
    pub fn new(lookup: &'a L, service: &'a ServiceLocator) -> Self {
        Self {
            lookup,
            service,
            fallback: None,
        }
    }

    pub async fn resolve(&mut self, annotations: &Annotations) -> Vec<String> {
        let targets = annotations::targets(annotations);
        if !targets.is_empty() {
            return targets;
        }

        if let Some(fallback) = &self.fallback {
            return fallback.clone();
        }

        let ServiceLocator { namespace, name } = self.service;
        let fallback = match self.lookup.load_balancer_ingress(namespace, name).await {
            Ok(ingress) => ingress_targets(&ingress),
            Err(err) => {
                warn!("Unable to look up load balancer service {namespace}/{name}: {err}");
                Vec::new()
            }
        };
        debug!(service = %self.service, targets = ?fallback, "resolved load balancer targets");

        self.fallback = Some(fallback.clone());
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::TARGET_ANNOTATION_KEY;
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };
    use tracing_test::traced_test;

    struct FakeLookup {
        result: Result<Vec<LoadBalancerIngress>, String>,
        calls: AtomicUsize,
    }

    impl FakeLookup {
        fn new(result: Result<Vec<LoadBalancerIngress>, String>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ServiceLookup for FakeLookup {
        async fn load_balancer_ingress(&self, _namespace: &str, _name: &str) -> Result<Vec<LoadBalancerIngress>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(|err| eyre::eyre!(err))
        }
    }

    fn ingress(ip: Option<&str>, hostname: Option<&str>) -> LoadBalancerIngress {
        LoadBalancerIngress {
            ip: ip.map(str::to_string),
            hostname: hostname.map(str::to_string),
            ..Default::default()
        }
    }

    fn locator() -> ServiceLocator {
        "projectcontour/envoy".parse().unwrap()
    }

    #[test]
    fn parses_locator() {
        assert_eq!(
            locator(),
            ServiceLocator {
                namespace: "projectcontour".into(),
                name: "envoy".into()
            }
        );
        assert_eq!(locator().to_string(), "projectcontour/envoy");
    }

    #[test]
    fn rejects_malformed_locators() {
        for input in ["envoy", "a/b/c", "/envoy", "projectcontour/", ""] {
            assert!(
                matches!(input.parse::<ServiceLocator>(), Err(SourceError::LoadBalancerService(s)) if s == input),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn ingress_ip_before_hostname() {
        let targets = ingress_targets(&[
            ingress(Some("10.0.0.1"), None),
            ingress(None, Some("lb.example.com")),
            ingress(Some("10.0.0.2"), Some("lb2.example.com")),
            ingress(Some(""), None),
        ]);
        assert_eq!(targets, vec!["10.0.0.1", "lb.example.com", "10.0.0.2", "lb2.example.com"]);
    }

    #[tokio::test]
    async fn annotation_targets_skip_lookup() {
        let lookup = FakeLookup::new(Ok(vec![ingress(Some("10.9.9.9"), None)]));
        let service = locator();
        let mut resolver = TargetResolver::new(&lookup, &service);

        let annotations = [(TARGET_ANNOTATION_KEY.to_string(), "1.2.3.4,5.6.7.8".to_string())].into();
        assert_eq!(resolver.resolve(&annotations).await, vec!["1.2.3.4", "5.6.7.8"]);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_to_load_balancer_once() {
        let lookup = FakeLookup::new(Ok(vec![
            ingress(Some("10.0.0.1"), None),
            ingress(None, Some("lb.example.com")),
        ]));
        let service = locator();
        let mut resolver = TargetResolver::new(&lookup, &service);

        for _ in 0..3 {
            assert_eq!(
                resolver.resolve(&Annotations::new()).await,
                vec!["10.0.0.1", "lb.example.com"]
            );
        }
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn lookup_failure_means_no_targets() {
        let lookup = FakeLookup::new(Err("services \"envoy\" not found".into()));
        let service = locator();
        let mut resolver = TargetResolver::new(&lookup, &service);

        assert!(resolver.resolve(&Annotations::new()).await.is_empty());
        assert!(resolver.resolve(&Annotations::new()).await.is_empty());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert!(logs_contain("Unable to look up load balancer service projectcontour/envoy"));
    }
}
