//! Shared fixtures: HTTPProxy builders and a scripted load balancer lookup.

#![allow(dead_code)]

use httpproxy_dns_source::{
    resources::{
        HTTPProxy,
        HTTPProxySpec,
        HTTPProxyStatus,
        VirtualHost,
    },
    services::ServiceLookup,
    HTTPProxySource,
    SourceConfig,
};
use k8s_openapi::api::core::v1::LoadBalancerIngress;
use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};

pub struct ProxyBuilder {
    proxy: HTTPProxy,
}

impl ProxyBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        let mut proxy = HTTPProxy::new(name, HTTPProxySpec::default());
        proxy.metadata.namespace = Some(namespace.to_string());
        proxy.status = Some(HTTPProxyStatus {
            current_status: "valid".to_string(),
            description: "Valid HTTPProxy".to_string(),
        });
        Self { proxy }
    }

    pub fn fqdn(mut self, fqdn: &str) -> Self {
        self.proxy.spec.virtualhost = Some(VirtualHost { fqdn: fqdn.to_string() });
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.proxy
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.proxy.status = Some(HTTPProxyStatus {
            current_status: status.to_string(),
            description: String::new(),
        });
        self
    }

    pub fn build(self) -> HTTPProxy {
        self.proxy
    }
}

/// Answers every lookup with the same ingress list, or fails every lookup.
pub struct ScriptedLookup {
    result: Result<Vec<LoadBalancerIngress>, String>,
    calls: AtomicUsize,
}

impl ScriptedLookup {
    pub fn ingress(entries: &[(Option<&str>, Option<&str>)]) -> Self {
        let ingress = entries
            .iter()
            .map(|(ip, hostname)| LoadBalancerIngress {
                ip: ip.map(str::to_string),
                hostname: hostname.map(str::to_string),
                ..Default::default()
            })
            .collect();
        Self {
            result: Ok(ingress),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ServiceLookup for &ScriptedLookup {
    async fn load_balancer_ingress(&self, _namespace: &str, _name: &str) -> eyre::Result<Vec<LoadBalancerIngress>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(|err| eyre::eyre!(err))
    }
}

pub async fn source_with<'a>(
    config: SourceConfig,
    proxies: Vec<HTTPProxy>,
    lookup: &'a ScriptedLookup,
) -> HTTPProxySource<Vec<HTTPProxy>, &'a ScriptedLookup> {
    HTTPProxySource::new(&config, proxies, lookup)
        .await
        .expect("valid source configuration")
}
