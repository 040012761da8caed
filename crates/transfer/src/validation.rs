use std::collections::HashSet;

use chunkdrop_protocol::Endpoint;
use reqwest::Url;

use crate::TransferError;

/// Validates a single endpoint descriptor.
///
/// Rejects:
/// - Empty ids
/// - URLs that do not parse
/// - Schemes other than `http` / `https`
/// - URLs without a host
pub fn validate_endpoint(endpoint: &Endpoint) -> Result<(), TransferError> {
    if endpoint.id.trim().is_empty() {
        return Err(TransferError::InvalidEndpoint("empty endpoint id".into()));
    }

    // Never echo the URL itself: it carries the webhook token.
    let url = Url::parse(&endpoint.url).map_err(|e| {
        TransferError::InvalidEndpoint(format!("endpoint {}: unparseable url: {e}", endpoint.id))
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(TransferError::InvalidEndpoint(format!(
                "endpoint {}: unsupported scheme {other}",
                endpoint.id
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(TransferError::InvalidEndpoint(format!(
            "endpoint {}: missing host",
            endpoint.id
        )));
    }

    Ok(())
}

/// Validates a whole endpoint list: non-empty, unique ids, each valid.
pub fn validate_endpoints(endpoints: &[Endpoint]) -> Result<(), TransferError> {
    if endpoints.is_empty() {
        return Err(TransferError::NoEndpoints);
    }

    let mut ids = HashSet::with_capacity(endpoints.len());
    for endpoint in endpoints {
        validate_endpoint(endpoint)?;
        if !ids.insert(endpoint.id.as_str()) {
            return Err(TransferError::InvalidEndpoint(format!(
                "duplicate endpoint id: {}",
                endpoint.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(id: &str, url: &str) -> Endpoint {
        Endpoint::new(id, url)
    }

    #[test]
    fn accepts_https_webhook() {
        assert!(validate_endpoint(&ep("w1", "https://discord.com/api/webhooks/1/tok")).is_ok());
    }

    #[test]
    fn accepts_plain_http() {
        assert!(validate_endpoint(&ep("w1", "http://127.0.0.1:8080/hook")).is_ok());
    }

    #[test]
    fn rejects_empty_id() {
        assert!(validate_endpoint(&ep("  ", "https://example.com/h")).is_err());
    }

    #[test]
    fn rejects_garbage_url() {
        assert!(validate_endpoint(&ep("w1", "not a url")).is_err());
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(validate_endpoint(&ep("w1", "ftp://example.com/h")).is_err());
        assert!(validate_endpoint(&ep("w1", "file:///etc/passwd")).is_err());
    }

    #[test]
    fn error_does_not_leak_url() {
        let err = validate_endpoint(&ep("w1", "ftp://secret-token@example.com/h")).unwrap_err();
        assert!(!err.to_string().contains("secret-token"));
    }

    #[test]
    fn rejects_empty_list() {
        assert!(matches!(
            validate_endpoints(&[]),
            Err(TransferError::NoEndpoints)
        ));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let list = [
            ep("w1", "https://example.com/a"),
            ep("w1", "https://example.com/b"),
        ];
        assert!(validate_endpoints(&list).is_err());
    }

    #[test]
    fn accepts_valid_list() {
        let list = [
            ep("w1", "https://example.com/a"),
            ep("w2", "https://example.com/b"),
        ];
        assert!(validate_endpoints(&list).is_ok());
    }
}
