//! Request and request-error events built from completed HTTP transactions.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::attribute::{names, Attribute};
use crate::event::{Event, EventCategory, EventFactory};
use crate::validator::ATTRIBUTE_VALUE_MAX_LENGTH;

/// Placeholder recorded instead of the body when body capture is off.
pub const RESPONSE_BODY_CAPTURE_DISABLED: &str = "NEWRELIC_RESPONSE_BODY_CAPTURE_DISABLED";

/// Status codes at or above this value are HTTP errors.
pub const MIN_HTTP_ERROR_STATUS_CODE: u16 = 400;

/// Transaction parameter carrying the response content type.
pub const CONTENT_TYPE_PARAM: &str = "content_type";

/// A completed HTTP exchange as reported by network instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpTransaction {
    pub url: String,
    pub http_method: String,
    pub status_code: u16,
    /// Platform network error code; 0 when the request reached the server.
    pub error_code: i32,
    /// Seconds from request start to response end.
    pub total_time: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Connection type, e.g. `wifi` or `cellular`.
    pub wan_type: String,
    pub app_data: Option<String>,
    pub response_body: Option<String>,
    pub params: BTreeMap<String, String>,
}

/// Which event a transaction produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    HttpError,
    NetworkFailure,
    Success,
    /// No status and no error code; nothing is recorded.
    Incomplete,
}

impl HttpTransaction {
    pub fn outcome(&self) -> TransactionOutcome {
        if self.status_code >= MIN_HTTP_ERROR_STATUS_CODE {
            TransactionOutcome::HttpError
        } else if self.error_code != 0 {
            TransactionOutcome::NetworkFailure
        } else if self.status_code > 0 {
            TransactionOutcome::Success
        } else {
            TransactionOutcome::Incomplete
        }
    }
}

/// Whether the URL's host equals, or is a subdomain of, an ignored domain.
///
/// URLs that cannot be parsed or carry no host are never ignored.
pub fn is_ignored_domain(url: &str, ignored_domains: &[String]) -> bool {
    if url.is_empty() || ignored_domains.is_empty() {
        return false;
    }
    let host = match Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return false,
        },
        Err(e) => {
            debug!(url, error = %e, "Failed to parse URL for domain filtering");
            return false;
        }
    };
    ignored_domains
        .iter()
        .filter(|d| !d.is_empty())
        .any(|d| host == d.as_str() || host.ends_with(&format!(".{}", d)))
}

/// A `MobileRequest` event for a successful transaction.
pub fn network_request_event(txn: &HttpTransaction) -> Event {
    let mut attributes = default_attributes(txn);
    attributes.push(Attribute::transient(names::STATUS_CODE, txn.status_code));
    EventFactory::create_event(None, EventCategory::NetworkRequest, None, &attributes)
}

/// A `MobileRequestError` event for a transaction that returned an HTTP error.
pub fn http_error_event(txn: &HttpTransaction, capture_body: bool) -> Event {
    let mut attributes = error_attributes(txn, capture_body);
    attributes.push(Attribute::transient(names::STATUS_CODE, txn.status_code));
    EventFactory::create_event(None, EventCategory::RequestError, None, &attributes)
}

/// A `MobileRequestError` event for a transaction that never got a response.
pub fn network_failure_event(txn: &HttpTransaction, capture_body: bool) -> Event {
    let mut attributes = error_attributes(txn, capture_body);
    attributes.push(Attribute::transient(names::NETWORK_ERROR_CODE, txn.error_code));
    EventFactory::create_event(None, EventCategory::RequestError, None, &attributes)
}

fn default_attributes(txn: &HttpTransaction) -> Vec<Attribute> {
    let mut attributes = Vec::new();

    match Url::parse(&txn.url) {
        Ok(url) => {
            if let Some(host) = url.host_str() {
                attributes.push(Attribute::transient(names::REQUEST_DOMAIN, host));
            }
            attributes.push(Attribute::transient(names::REQUEST_PATH, url.path()));
        }
        Err(e) => warn!(
            url = txn.url.as_str(),
            error = %e,
            "Invalid URL, request domain and path not recorded"
        ),
    }

    attributes.push(Attribute::transient(names::REQUEST_URL, txn.url.as_str()));
    attributes.push(Attribute::transient(names::CONNECTION_TYPE, txn.wan_type.as_str()));
    attributes.push(Attribute::transient(names::REQUEST_METHOD, txn.http_method.as_str()));

    if txn.total_time != 0.0 {
        attributes.push(Attribute::transient(names::RESPONSE_TIME, txn.total_time));
    }
    if txn.bytes_sent != 0 {
        attributes.push(Attribute::transient(names::BYTES_SENT, txn.bytes_sent));
    }
    if txn.bytes_received != 0 {
        attributes.push(Attribute::transient(names::BYTES_RECEIVED, txn.bytes_received));
    }

    for (key, value) in &txn.params {
        attributes.push(Attribute::transient(key.as_str(), value.as_str()));
    }

    attributes
}

fn error_attributes(txn: &HttpTransaction, capture_body: bool) -> Vec<Attribute> {
    let mut attributes = default_attributes(txn);

    if capture_body {
        if let Some(body) = txn.response_body.as_deref().filter(|b| !b.is_empty()) {
            let body = truncate_to_boundary(body, ATTRIBUTE_VALUE_MAX_LENGTH);
            if body.len() < txn.response_body.as_deref().map_or(0, str::len) {
                warn!(
                    "Truncating response body to {} bytes",
                    ATTRIBUTE_VALUE_MAX_LENGTH
                );
            }
            attributes.push(Attribute::transient(
                names::RESPONSE_BODY,
                STANDARD.encode(body.as_bytes()),
            ));
        }
    } else {
        attributes.push(Attribute::transient(
            names::RESPONSE_BODY,
            RESPONSE_BODY_CAPTURE_DISABLED,
        ));
    }

    if let Some(app_data) = txn.app_data.as_deref().filter(|d| !d.is_empty()) {
        attributes.push(Attribute::transient(names::APP_DATA_HEADER, app_data));
    }

    if let Some(content_type) = txn
        .params
        .get(CONTENT_TYPE_PARAM)
        .filter(|c| !c.is_empty())
    {
        attributes.push(Attribute::transient(
            names::CONTENT_TYPE,
            content_type.as_str(),
        ));
    }

    attributes
}

/// The longest prefix of `s` that is at most `max` bytes and ends on a char boundary.
fn truncate_to_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(url: &str, status_code: u16, error_code: i32) -> HttpTransaction {
        HttpTransaction {
            url: url.to_string(),
            http_method: "GET".to_string(),
            status_code,
            error_code,
            total_time: 0.25,
            bytes_sent: 10,
            bytes_received: 2048,
            wan_type: "wifi".to_string(),
            ..HttpTransaction::default()
        }
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(txn("https://a.com", 200, 0).outcome(), TransactionOutcome::Success);
        assert_eq!(txn("https://a.com", 404, 0).outcome(), TransactionOutcome::HttpError);
        assert_eq!(txn("https://a.com", 500, -1).outcome(), TransactionOutcome::HttpError);
        assert_eq!(
            txn("https://a.com", 0, -1009).outcome(),
            TransactionOutcome::NetworkFailure
        );
        assert_eq!(txn("https://a.com", 0, 0).outcome(), TransactionOutcome::Incomplete);
    }

    #[test]
    fn test_ignored_domains_match_exact_and_subdomains() {
        let ignored = vec!["example.com".to_string(), String::new()];
        assert!(is_ignored_domain("https://example.com/x", &ignored));
        assert!(is_ignored_domain("https://api.example.com/x", &ignored));
        assert!(!is_ignored_domain("https://notexample.com/x", &ignored));
        assert!(!is_ignored_domain("https://example.com.evil.io/", &ignored));
        assert!(!is_ignored_domain("not a url", &ignored));
        assert!(!is_ignored_domain("", &ignored));
    }

    #[test]
    fn test_request_event_attributes() {
        let mut t = txn("https://api.example.com/v1/items?page=2", 200, 0);
        t.params.insert("traceId".to_string(), "abc".to_string());
        let event = network_request_event(&t);

        assert_eq!(event.category(), EventCategory::NetworkRequest);
        assert_eq!(event.event_type(), "MobileRequest");
        assert!(event.name().is_none());

        let s = |n: &str| event.attribute(n).and_then(|a| a.string_value()).map(str::to_string);
        let d = |n: &str| event.attribute(n).and_then(|a| a.double_value());
        assert_eq!(s("requestDomain").as_deref(), Some("api.example.com"));
        assert_eq!(s("requestPath").as_deref(), Some("/v1/items"));
        assert_eq!(
            s("requestUrl").as_deref(),
            Some("https://api.example.com/v1/items?page=2")
        );
        assert_eq!(s("requestMethod").as_deref(), Some("GET"));
        assert_eq!(s("connectionType").as_deref(), Some("wifi"));
        assert_eq!(s("traceId").as_deref(), Some("abc"));
        assert_eq!(d("statusCode"), Some(200.0));
        assert_eq!(d("responseTime"), Some(0.25));
        assert_eq!(d("bytesReceived"), Some(2048.0));
    }

    #[test]
    fn test_http_error_event_encodes_body() {
        let mut t = txn("https://api.example.com/fail", 503, 0);
        t.response_body = Some("service down".to_string());
        t.app_data = Some("app-data".to_string());
        t.params
            .insert(CONTENT_TYPE_PARAM.to_string(), "text/plain".to_string());
        let event = http_error_event(&t, true);

        assert_eq!(event.event_type(), "MobileRequestError");
        let body = event.attribute(names::RESPONSE_BODY).unwrap();
        assert_eq!(body.string_value(), Some(STANDARD.encode("service down").as_str()));
        assert_eq!(
            event.attribute(names::APP_DATA_HEADER).unwrap().string_value(),
            Some("app-data")
        );
        assert_eq!(
            event.attribute(names::CONTENT_TYPE).unwrap().string_value(),
            Some("text/plain")
        );
        assert_eq!(
            event.attribute(names::STATUS_CODE).unwrap().double_value(),
            Some(503.0)
        );
    }

    #[test]
    fn test_body_capture_disabled_placeholder() {
        let mut t = txn("https://api.example.com/fail", 500, 0);
        t.response_body = Some("secret".to_string());
        let event = http_error_event(&t, false);
        assert_eq!(
            event.attribute(names::RESPONSE_BODY).unwrap().string_value(),
            Some(RESPONSE_BODY_CAPTURE_DISABLED)
        );
    }

    #[test]
    fn test_long_body_is_truncated_before_encoding() {
        let mut t = txn("https://api.example.com/fail", 500, 0);
        t.response_body = Some("é".repeat(3000));
        let event = http_error_event(&t, true);
        let encoded = event
            .attribute(names::RESPONSE_BODY)
            .and_then(|a| a.string_value())
            .unwrap();
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded.len(), ATTRIBUTE_VALUE_MAX_LENGTH);
        assert!(String::from_utf8(decoded).is_ok());
    }

    #[test]
    fn test_network_failure_event() {
        let event = network_failure_event(&txn("https://api.example.com/", 0, -1004), true);
        assert_eq!(event.category(), EventCategory::RequestError);
        assert_eq!(
            event.attribute(names::NETWORK_ERROR_CODE).unwrap().double_value(),
            Some(-1004.0)
        );
        assert!(event.attribute(names::STATUS_CODE).is_none());
        assert!(event.attribute(names::RESPONSE_BODY).is_none());
    }

    #[test]
    fn test_invalid_url_still_records_event() {
        let event = network_request_event(&txn("::not-a-url::", 200, 0));
        assert!(event.attribute(names::REQUEST_DOMAIN).is_none());
        assert!(event.attribute(names::REQUEST_URL).is_some());
    }
}
