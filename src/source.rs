//! Turns HTTPProxy resources into DNS endpoints.

use crate::{
    annotations::{
        self,
        CONTROLLER_ANNOTATION_VALUE,
    },
    config::SourceConfig,
    endpoint::{
        self,
        Endpoint,
        RecordData,
    },
    error::SourceError,
    filter,
    resources::HTTPProxy,
    services::{
        ServiceLocator,
        ServiceLookup,
        TargetResolver,
    },
    store::ProxySnapshot,
    template::FqdnTemplate,
};
use futures::Stream;
use kube::{
    core::{
        Selector,
        SelectorExt as _,
    },
    ResourceExt as _,
};
use std::{
    sync::Arc,
    time::Duration,
};

pub struct HTTPProxySource<S, L> {
    snapshot: S,
    services: L,
    namespace: Option<String>,
    annotation_filter: Selector,
    fqdn_template: Option<FqdnTemplate>,
    combine_fqdn_annotation: bool,
    ignore_hostname_annotation: bool,
    load_balancer: ServiceLocator,
    owner_id: Option<String>,
}

impl<S, L> HTTPProxySource<S, L>
where
    S: ProxySnapshot,
    L: ServiceLookup,
{
    /// Validates the configuration and waits (at most `config.sync_timeout`) for the snapshot to be populated.
    pub async fn new(config: &SourceConfig, snapshot: S, services: L) -> Result<Self, SourceError> {
        let fqdn_template = config
            .fqdn_template
            .as_deref()
            .filter(|template| !template.is_empty())
            .map(FqdnTemplate::parse)
            .transpose()
            .map_err(SourceError::TemplateParse)?;

        let annotation_filter =
            filter::parse(&config.annotation_filter).map_err(|source| SourceError::AnnotationFilter {
                filter: config.annotation_filter.clone(),
                source,
            })?;

        let load_balancer = config.contour_load_balancer.parse::<ServiceLocator>()?;

        match tokio::time::timeout(config.sync_timeout, snapshot.wait_synced()).await {
            Ok(synced) => synced?,
            Err(_) => return Err(SourceError::CacheSync(config.sync_timeout)),
        }

        info!(
            namespace = config.namespace().unwrap_or("<all>"),
            %annotation_filter,
            fqdn_template = fqdn_template.as_ref().map(FqdnTemplate::source),
            %load_balancer,
            "created HTTPProxy source"
        );

        Ok(Self {
            snapshot,
            services,
            namespace: config.namespace().map(str::to_string),
            annotation_filter,
            fqdn_template,
            combine_fqdn_annotation: config.combine_fqdn_annotation,
            ignore_hostname_annotation: config.ignore_hostname_annotation,
            load_balancer,
            owner_id: config.txt_owner_id.clone(),
        })
    }

    /// Runs one synthesis pass over the current snapshot.
    ///
    /// Only a broken template (or an unavailable snapshot) fails the pass. Problems with single resources are
    /// logged and those resources skipped or degraded.
    #[instrument(level = "debug", skip_all)]
    pub async fn endpoints(&self) -> Result<Vec<Endpoint>, SourceError> {
        let mut proxies = self.snapshot.list(self.namespace.as_deref())?;
        proxies.sort_by_key(|proxy| (proxy.namespace(), proxy.name_any()));
        let proxies = filter_by_annotations(proxies, &self.annotation_filter);

        let mut resolver = TargetResolver::new(&self.services, &self.load_balancer);
        let mut endpoints = Vec::new();

        for proxy in proxies {
            let key = proxy.key();
            let annotations = proxy.annotations_or_empty();

            if let Some(controller) = annotations::controller(annotations) {
                if controller != CONTROLLER_ANNOTATION_VALUE {
                    debug!(
                        "Skipping HTTPProxy {key} because controller value does not match, found: {controller}, required: {CONTROLLER_ANNOTATION_VALUE}"
                    );
                    continue;
                }
            }

            if !proxy.is_valid() {
                debug!(
                    "Skipping HTTPProxy {key} because it is not valid (status {:?})",
                    proxy.current_status()
                );
                continue;
            }

            let mut record_data = None;
            let mut proxy_endpoints = Vec::new();
            for hostname in proxy_hostnames(&proxy, self.ignore_hostname_annotation) {
                let data = self.record_data(&mut record_data, &proxy, &mut resolver).await;
                proxy_endpoints.extend(endpoint::endpoints_for_hostname(&hostname, data));
            }

            if let Some(template) = &self.fqdn_template {
                if self.combine_fqdn_annotation || proxy_endpoints.is_empty() {
                    let hostnames = template
                        .hostnames(&proxy)
                        .map_err(|source| SourceError::TemplateRender {
                            key: key.clone(),
                            source,
                        })?;

                    let mut template_endpoints = Vec::new();
                    for hostname in hostnames {
                        let data = self.record_data(&mut record_data, &proxy, &mut resolver).await;
                        template_endpoints.extend(endpoint::endpoints_for_hostname(&hostname, data));
                    }

                    if self.combine_fqdn_annotation {
                        proxy_endpoints.extend(template_endpoints);
                    } else {
                        proxy_endpoints = template_endpoints;
                    }
                }
            }

            if proxy_endpoints.is_empty() {
                debug!("No endpoints could be generated from HTTPProxy {key}");
                continue;
            }

            let resource = endpoint::resource_label(
                proxy.namespace().as_deref().unwrap_or_default(),
                &proxy.name_any(),
            );
            endpoint::set_ownership(&mut proxy_endpoints, &resource, self.owner_id.as_deref());

            debug!(
                "Endpoints generated from HTTPProxy {key}: {}",
                proxy_endpoints
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            endpoints.extend(proxy_endpoints);
        }

        for endpoint in &mut endpoints {
            endpoint.targets.sort();
        }

        Ok(endpoints)
    }

    /// Targets, TTL and provider properties of `proxy`, computed on first use.
    async fn record_data<'d>(
        &self,
        cached: &'d mut Option<RecordData>,
        proxy: &HTTPProxy,
        resolver: &mut TargetResolver<'_, L>,
    ) -> &'d RecordData {
        if cached.is_none() {
            *cached = Some(proxy_record_data(proxy, resolver).await);
        }
        cached.get_or_insert_with(RecordData::default)
    }
}

async fn proxy_record_data<L: ServiceLookup>(proxy: &HTTPProxy, resolver: &mut TargetResolver<'_, L>) -> RecordData {
    let annotations = proxy.annotations_or_empty();

    let ttl = annotations::ttl(annotations).unwrap_or_else(|err| {
        warn!("HTTPProxy {}: {err}", proxy.key());
        None
    });
    let targets = resolver.resolve(annotations).await;
    let (provider_specific, set_identifier) = annotations::provider_specific(annotations);

    RecordData {
        targets,
        ttl,
        provider_specific,
        set_identifier,
    }
}

/// The virtual host fqdn followed by the hostname annotation (unless ignored).
pub fn proxy_hostnames(proxy: &HTTPProxy, ignore_hostname_annotation: bool) -> Vec<String> {
    let mut hostnames = Vec::new();
    if let Some(fqdn) = proxy.fqdn() {
        hostnames.push(fqdn.to_string());
    }
    if !ignore_hostname_annotation {
        hostnames.extend(annotations::hostnames(proxy.annotations_or_empty()));
    }
    hostnames
}

/// Keeps the proxies whose annotations match `selector`.
pub fn filter_by_annotations(proxies: Vec<Arc<HTTPProxy>>, selector: &Selector) -> Vec<Arc<HTTPProxy>> {
    if selector.selects_all() {
        return proxies;
    }
    proxies
        .into_iter()
        .filter(|proxy| selector.matches(proxy.annotations_or_empty()))
        .collect()
}

/// Re-runs the pass every `interval` and yields the endpoints whenever they differ from the previous pass.
pub fn watch_endpoints<S, L>(
    source: Arc<HTTPProxySource<S, L>>,
    interval: Duration,
) -> impl Stream<Item = Result<Vec<Endpoint>, SourceError>>
where
    S: ProxySnapshot,
    L: ServiceLookup,
{
    async_stream::stream! {
        let mut timer = tokio::time::interval(interval);
        let mut previous: Option<Vec<Endpoint>> = None;

        loop {
            timer.tick().await;

            match source.endpoints().await {
                Ok(endpoints) => {
                    if previous.as_ref() == Some(&endpoints) {
                        trace!("Endpoints unchanged");
                        continue;
                    }
                    previous = Some(endpoints.clone());
                    yield Ok(endpoints);
                }
                Err(err) => {
                    error!("Failed to generate endpoints: {err}");
                    yield Err(err);
                }
            }
        }
    }
}
