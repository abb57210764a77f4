//! Service and region inference from endpoint hosts.

/// Signing service and region for an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service name, e.g. `appsync`.
    pub service: Option<String>,
    /// Region name, e.g. `us-east-1`.
    pub region: Option<String>,
}

/// Infers `{service, region}` from a host of the form
/// `<service>.<region>.amazonaws.com`.
///
/// The legacy search-domain naming (`<region>.es.amazonaws.com`) puts the
/// two labels the other way around, so it is swapped back.
pub fn parse_service_info(host: &str) -> ServiceInfo {
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    let Some(prefix) = host
        .strip_suffix(".amazonaws.com")
        .or_else(|| host.strip_suffix(".amazonaws.com.cn"))
    else {
        return ServiceInfo {
            service: None,
            region: None,
        };
    };

    let labels: Vec<&str> = prefix.rsplit('.').take(2).collect();
    let (mut service, mut region) = match labels.as_slice() {
        [last, before] => (Some(before.to_string()), Some(last.to_string())),
        [only] => (Some(only.to_string()), None),
        _ => (None, None),
    };

    if region.as_deref() == Some("es") {
        std::mem::swap(&mut service, &mut region);
    }

    ServiceInfo { service, region }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_and_region() {
        let info = parse_service_info("abc.appsync-api.us-east-1.amazonaws.com");
        assert_eq!(info.service.as_deref(), Some("appsync-api"));
        assert_eq!(info.region.as_deref(), Some("us-east-1"));

        let info = parse_service_info("sqs.eu-west-2.amazonaws.com");
        assert_eq!(info.service.as_deref(), Some("sqs"));
        assert_eq!(info.region.as_deref(), Some("eu-west-2"));
    }

    #[test]
    fn global_service_has_no_region() {
        let info = parse_service_info("iam.amazonaws.com");
        assert_eq!(info.service.as_deref(), Some("iam"));
        assert_eq!(info.region, None);
    }

    #[test]
    fn legacy_search_domain_is_reversed() {
        let info = parse_service_info("search-domain.us-west-1.es.amazonaws.com");
        assert_eq!(info.service.as_deref(), Some("es"));
        assert_eq!(info.region.as_deref(), Some("us-west-1"));
    }

    #[test]
    fn custom_domain_yields_nothing() {
        let info = parse_service_info("api.example.com:443");
        assert_eq!(info.service, None);
        assert_eq!(info.region, None);
    }
}
