use kube::{
    CustomResource,
    ResourceExt as _,
};
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

/// Status value contour assigns to proxies it accepted.
pub const STATUS_VALID: &str = "valid";

/// The subset of contour's HTTPProxy we care about. Routes, TLS and the like are ignored when deserializing.
///
/// See <https://projectcontour.io/docs/main/config/api/#projectcontour.io/v1.HTTPProxy>
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "projectcontour.io",
    version = "v1",
    kind = "HTTPProxy",
    plural = "httpproxies",
    status = "HTTPProxyStatus",
    namespaced
)]
pub struct HTTPProxySpec {
    /// Only set on root proxies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtualhost: Option<VirtualHost>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VirtualHost {
    /// The fully qualified domain name of the root of the ingress tree
    pub fqdn: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HTTPProxyStatus {
    #[serde(default)]
    pub current_status: String,
    #[serde(default)]
    pub description: String,
}

static NO_ANNOTATIONS: BTreeMap<String, String> = BTreeMap::new();

impl HTTPProxy {
    pub fn current_status(&self) -> &str {
        self.status.as_ref().map_or("", |status| status.current_status.as_str())
    }

    pub fn is_valid(&self) -> bool {
        self.current_status() == STATUS_VALID
    }

    /// The virtual host fqdn, if one is set and non-empty.
    pub fn fqdn(&self) -> Option<&str> {
        self.spec
            .virtualhost
            .as_ref()
            .map(|vhost| vhost.fqdn.as_str())
            .filter(|fqdn| !fqdn.is_empty())
    }

    /// Annotations without forcing a mutable borrow (unlike [`ResourceExt::annotations_mut`]).
    pub fn annotations_or_empty(&self) -> &BTreeMap<String, String> {
        self.metadata.annotations.as_ref().unwrap_or(&NO_ANNOTATIONS)
    }

    /// `{namespace}/{name}`, used in log lines and error messages.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }
}
