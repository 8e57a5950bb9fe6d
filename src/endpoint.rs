use crate::annotations::ProviderSpecific;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeMap,
    fmt,
    net::IpAddr,
};

/// Label recording which resource an endpoint was generated from, `hp/{namespace}/{name}`.
pub const RESOURCE_LABEL_KEY: &str = "resource";

/// Label recording the identity of the controller owning the endpoint.
pub const OWNER_LABEL_KEY: &str = "owner";

/// Kind prefix used in the [`RESOURCE_LABEL_KEY`] label.
pub const RESOURCE_KIND: &str = "hp";

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordType {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "AAAA")]
    AAAA,
    #[serde(rename = "CNAME")]
    CNAME,
}

impl RecordType {
    /// IP literals become address records, anything else is treated as a hostname.
    pub fn for_target(target: &str) -> Self {
        match target.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => RecordType::A,
            Ok(IpAddr::V6(_)) => RecordType::AAAA,
            Err(_) => RecordType::CNAME,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
        })
    }
}

impl std::str::FromStr for RecordType {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            s => Err(eyre::eyre!("Invalid RecordType: {s:?}")),
        }
    }
}

/// Record targets. Order is kept as produced but ignored when comparing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Targets(Vec<String>);

impl Targets {
    pub fn new(targets: Vec<String>) -> Self {
        Self(targets)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn sort(&mut self) {
        self.0.sort();
    }

    fn sorted(&self) -> Vec<&str> {
        let mut sorted = self.iter().collect::<Vec<_>>();
        sorted.sort_unstable();
        sorted
    }
}

impl PartialEq for Targets {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.sorted() == other.sorted()
    }
}

impl Eq for Targets {}

impl<S: Into<String>> FromIterator<S> for Targets {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Targets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(" "))
    }
}

/// A DNS record candidate handed to the DNS controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub dns_name: String,
    pub targets: Targets,
    pub record_type: RecordType,
    /// Seconds. `None` leaves the TTL to the provider default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_ttl: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_identifier: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_specific: ProviderSpecific,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} IN {} {}", self.dns_name, self.record_ttl.unwrap_or(0), self.record_type, self.targets)?;
        if let Some(set_identifier) = &self.set_identifier {
            write!(f, " {set_identifier}")?;
        }
        Ok(())
    }
}

/// The per-resource record data shared by every hostname of that resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordData {
    pub targets: Vec<String>,
    pub ttl: Option<i64>,
    pub provider_specific: ProviderSpecific,
    pub set_identifier: Option<String>,
}

/// Builds the endpoints for one hostname: one per record type present in the targets. No targets, no endpoints.
pub fn endpoints_for_hostname(hostname: &str, data: &RecordData) -> Vec<Endpoint> {
    let dns_name = hostname.strip_suffix('.').unwrap_or(hostname);
    if dns_name.is_empty() {
        return Vec::new();
    }

    let mut by_type = BTreeMap::<RecordType, Vec<String>>::new();
    for target in &data.targets {
        by_type
            .entry(RecordType::for_target(target))
            .or_default()
            .push(target.clone());
    }

    by_type
        .into_iter()
        .map(|(record_type, targets)| Endpoint {
            dns_name: dns_name.to_string(),
            targets: Targets::new(targets),
            record_type,
            record_ttl: data.ttl,
            set_identifier: data.set_identifier.clone(),
            labels: BTreeMap::new(),
            provider_specific: data.provider_specific.clone(),
        })
        .collect()
}

pub fn resource_label(namespace: &str, name: &str) -> String {
    format!("{RESOURCE_KIND}/{namespace}/{name}")
}

/// Tags endpoints with the resource they were generated from and, if given, the owning controller.
pub fn set_ownership(endpoints: &mut [Endpoint], resource: &str, owner_id: Option<&str>) {
    for endpoint in endpoints {
        endpoint
            .labels
            .insert(RESOURCE_LABEL_KEY.to_string(), resource.to_string());
        if let Some(owner_id) = owner_id {
            endpoint.labels.insert(OWNER_LABEL_KEY.to_string(), owner_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(targets: &[&str]) -> RecordData {
        RecordData {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            ttl: Some(60),
            provider_specific: [("aws/weight".to_string(), "10".to_string())].into(),
            set_identifier: Some("blue".into()),
        }
    }

    #[test]
    fn record_type_from_target_shape() {
        assert_eq!(RecordType::for_target("10.0.0.1"), RecordType::A);
        assert_eq!(RecordType::for_target("2001:db8::1"), RecordType::AAAA);
        assert_eq!(RecordType::for_target("lb.example.com"), RecordType::CNAME);
        assert_eq!("AAAA".parse::<RecordType>().unwrap(), RecordType::AAAA);
        assert!("MX".parse::<RecordType>().is_err());
    }

    #[test]
    fn one_endpoint_per_record_type() {
        let endpoints = endpoints_for_hostname("web.example.com.", &data(&["lb.example.com", "10.0.0.2", "10.0.0.1"]));

        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].dns_name, "web.example.com");
        assert_eq!(endpoints[0].record_type, RecordType::A);
        assert_eq!(endpoints[0].targets.iter().collect::<Vec<_>>(), vec!["10.0.0.2", "10.0.0.1"]);
        assert_eq!(endpoints[1].record_type, RecordType::CNAME);
        assert_eq!(endpoints[1].targets, Targets::from_iter(["lb.example.com"]));
        for endpoint in &endpoints {
            assert_eq!(endpoint.record_ttl, Some(60));
            assert_eq!(endpoint.set_identifier.as_deref(), Some("blue"));
            assert_eq!(endpoint.provider_specific.get("aws/weight").map(String::as_str), Some("10"));
            assert!(endpoint.labels.is_empty());
        }
    }

    #[test]
    fn no_targets_no_endpoints() {
        assert!(endpoints_for_hostname("web.example.com", &data(&[])).is_empty());
        assert!(endpoints_for_hostname(".", &data(&["10.0.0.1"])).is_empty());
    }

    #[test]
    fn targets_compare_ignoring_order() {
        let a = Targets::from_iter(["b", "a"]);
        let mut b = Targets::from_iter(["a", "b"]);
        assert_eq!(a, b);
        assert_ne!(a, Targets::from_iter(["a", "b", "b"]));
        b.sort();
        assert_eq!(b.to_string(), "[a b]");
    }

    #[test]
    fn ownership_labels() {
        let mut endpoints = endpoints_for_hostname("web.example.com", &data(&["10.0.0.1"]));
        set_ownership(&mut endpoints, &resource_label("apps", "web"), Some("cluster-a"));

        assert_eq!(endpoints[0].labels[RESOURCE_LABEL_KEY], "hp/apps/web");
        assert_eq!(endpoints[0].labels[OWNER_LABEL_KEY], "cluster-a");
    }

    #[test]
    fn serializes_without_unset_fields() {
        let mut endpoints = endpoints_for_hostname(
            "web.example.com",
            &RecordData {
                targets: vec!["10.0.0.1".into()],
                ..Default::default()
            },
        );
        set_ownership(&mut endpoints, "hp/apps/web", None);

        assert_eq!(
            serde_json::to_value(&endpoints[0]).unwrap(),
            serde_json::json!({
                "dnsName": "web.example.com",
                "targets": ["10.0.0.1"],
                "recordType": "A",
                "labels": { "resource": "hp/apps/web" },
            })
        );
    }
}
