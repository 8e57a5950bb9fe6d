use crate::{
    filter::FilterError,
    template::TemplateError,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid annotation filter {filter:?}: {source}")]
    AnnotationFilter {
        filter: String,
        #[source]
        source: FilterError,
    },

    #[error("invalid contour load balancer service (namespace/name) found {0:?}")]
    LoadBalancerService(String),

    #[error("failed to parse fqdn template: {0}")]
    TemplateParse(#[source] TemplateError),

    #[error("failed to apply template on HTTPProxy {key}: {source}")]
    TemplateRender {
        key: String,
        #[source]
        source: TemplateError,
    },

    #[error("failed to sync cache: not synced after {0:?}")]
    CacheSync(Duration),

    #[error("HTTPProxy cache unavailable: {0}")]
    Snapshot(String),
}

/// Invalid TTL annotation. Never fatal, the endpoint is created without a TTL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TtlError {
    #[error("{0:?} is not a valid TTL value")]
    Invalid(String),

    #[error("TTL value must be between [{min}, {max}], found {value}")]
    OutOfRange { value: i64, min: i64, max: i64 },
}
