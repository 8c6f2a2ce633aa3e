//! Stream endpoint addressing.
//!
//! An [`Endpoint`] is a base URL, a path template with `{name}` placeholders
//! and query arguments. Resolving it yields the WebSocket URL to dial and the
//! [`SubscriptionKey`] that identifies the logical subscription.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::error::EndpointError;

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
    template: String,
    params: BTreeMap<String, String>,
    query: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(base: &Url, template: impl Into<String>) -> Self {
        Self {
            base: base.clone(),
            template: template.into(),
            params: BTreeMap::new(),
            query: Vec::new(),
        }
    }

    pub fn parse(base: &str, template: impl Into<String>) -> Result<Self, EndpointError> {
        Ok(Self::new(&Url::parse(base)?, template))
    }

    pub fn path_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn resolve(&self) -> Result<ResolvedEndpoint, EndpointError> {
        let mut url = self.base.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| EndpointError::UnsupportedScheme(scheme.to_string()))?;

        let path = self.expand_template()?;
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base_path}/{}", path.trim_start_matches('/')));

        let mut query = self.query.clone();
        query.sort();
        url.set_query(None);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url.set_fragment(None);

        Ok(ResolvedEndpoint {
            key: SubscriptionKey(url.to_string()),
            label: self.template.clone(),
            url,
        })
    }

    fn expand_template(&self) -> Result<String, EndpointError> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                EndpointError::InvalidUrl(format!("unclosed placeholder in `{}`", self.template))
            })?;
            let name = &after[..close];
            let value = self
                .params
                .get(name)
                .ok_or_else(|| EndpointError::UnresolvedParam(name.to_string()))?;
            out.extend(utf8_percent_encode(value, SEGMENT));
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Identity of a logical subscription: the resolved URL with sorted query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub url: Url,
    pub key: SubscriptionKey,
    /// Low-cardinality name for metrics: the unexpanded template.
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_http_to_ws_and_sorts_query() {
        let endpoint = Endpoint::parse("http://127.0.0.1:3000", "/api/execution-processes/stream/session/ws")
            .unwrap()
            .query("show_soft_deleted", false)
            .query("session_id", "s-1");
        let resolved = endpoint.resolve().unwrap();
        assert_eq!(
            resolved.url.as_str(),
            "ws://127.0.0.1:3000/api/execution-processes/stream/session/ws?session_id=s-1&show_soft_deleted=false"
        );
        assert_eq!(resolved.key.as_str(), resolved.url.as_str());
    }

    #[test]
    fn query_order_does_not_change_the_key() {
        let base = Url::parse("https://example.com/base/").unwrap();
        let a = Endpoint::new(&base, "stream").query("a", 1).query("b", 2);
        let b = Endpoint::new(&base, "stream").query("b", 2).query("a", 1);
        let a = a.resolve().unwrap();
        assert_eq!(a.key, b.resolve().unwrap().key);
        assert_eq!(a.url.as_str(), "wss://example.com/base/stream?a=1&b=2");
    }

    #[test]
    fn expands_and_escapes_path_params() {
        let resolved = Endpoint::parse("ws://localhost", "/api/execution-processes/{id}/normalized-logs/ws")
            .unwrap()
            .path_param("id", "a b/c")
            .resolve()
            .unwrap();
        assert_eq!(
            resolved.url.path(),
            "/api/execution-processes/a%20b%2Fc/normalized-logs/ws"
        );
        assert_eq!(resolved.label, "/api/execution-processes/{id}/normalized-logs/ws");
    }

    #[test]
    fn missing_param_and_bad_scheme_are_errors() {
        let err = Endpoint::parse("http://localhost", "/x/{id}")
            .unwrap()
            .resolve()
            .expect_err("unresolved");
        assert_eq!(err, EndpointError::UnresolvedParam("id".into()));

        let err = Endpoint::parse("ftp://localhost", "/x")
            .unwrap()
            .resolve()
            .expect_err("scheme");
        assert_eq!(err, EndpointError::UnsupportedScheme("ftp".into()));

        assert!(matches!(
            Endpoint::parse("not a url", "/x"),
            Err(EndpointError::InvalidUrl(_))
        ));
    }

    #[test]
    fn different_params_give_different_keys() {
        let base = Url::parse("http://localhost").unwrap();
        let one = Endpoint::new(&base, "/s").query("session_id", "1").resolve().unwrap();
        let two = Endpoint::new(&base, "/s").query("session_id", "2").resolve().unwrap();
        assert_ne!(one.key, two.key);
    }
}
