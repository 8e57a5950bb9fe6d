use std::time::Duration;

pub const DEFAULT_CONTOUR_LOAD_BALANCER: &str = "heptio-contour/contour";
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration of the HTTPProxy endpoint source.
#[derive(clap::Args, Clone, Debug)]
pub struct SourceConfig {
    #[clap(
        long,
        env = "EXTERNAL_DNS_NAMESPACE",
        default_value = "",
        help = "Limit HTTPProxies to this namespace. Empty means all namespaces"
    )]
    pub namespace: String,

    #[clap(
        long,
        env = "EXTERNAL_DNS_ANNOTATION_FILTER",
        default_value = "",
        help = "Only use HTTPProxies whose annotations match this label selector (e.g. 'kubernetes.io/ingress.class=contour')"
    )]
    pub annotation_filter: String,

    #[clap(
        long,
        env = "EXTERNAL_DNS_FQDN_TEMPLATE",
        help = "Template for hostnames of HTTPProxies without a virtual host fqdn (e.g. '{{.Name}}.example.com'). Multiple hostnames are separated by commas"
    )]
    pub fqdn_template: Option<String>,

    #[clap(
        long,
        env = "EXTERNAL_DNS_COMBINE_FQDN_ANNOTATION",
        help = "Add the templated hostnames to the ones of the HTTPProxy instead of only using them as a fallback"
    )]
    pub combine_fqdn_annotation: bool,

    #[clap(
        long,
        env = "EXTERNAL_DNS_IGNORE_HOSTNAME_ANNOTATION",
        help = "Ignore the hostname annotation when generating endpoints"
    )]
    pub ignore_hostname_annotation: bool,

    #[clap(
        long,
        env = "EXTERNAL_DNS_CONTOUR_LOAD_BALANCER",
        default_value = DEFAULT_CONTOUR_LOAD_BALANCER,
        help = "The namespace/name of the load balancer service fronting contour, used when HTTPProxies have no target annotation"
    )]
    pub contour_load_balancer: String,

    #[clap(
        long,
        env = "EXTERNAL_DNS_SYNC_TIMEOUT",
        default_value = "60s",
        value_parser = humantime::parse_duration,
        help = "How long to wait for the HTTPProxy cache to sync on startup"
    )]
    pub sync_timeout: Duration,

    #[clap(
        long,
        env = "EXTERNAL_DNS_TXT_OWNER_ID",
        help = "Identity of this controller, added as the 'owner' label of every endpoint"
    )]
    pub txt_owner_id: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            annotation_filter: String::new(),
            fqdn_template: None,
            combine_fqdn_annotation: false,
            ignore_hostname_annotation: false,
            contour_load_balancer: DEFAULT_CONTOUR_LOAD_BALANCER.to_string(),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            txt_owner_id: None,
        }
    }
}

impl SourceConfig {
    /// The namespace scope, `None` meaning all namespaces.
    pub fn namespace(&self) -> Option<&str> {
        Some(self.namespace.as_str()).filter(|ns| !ns.is_empty())
    }
}
