//! Transport-neutral view of an inbound request.
//!
//! The HTTP layer converts whatever it receives into an [`IncomingRequest`];
//! matching and authentication only ever look at this type.

use std::borrow::Cow;
use std::collections::HashMap;
use url::form_urlencoded;

/// An inbound request as seen by the dispatch engine.
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    /// HTTP method, normalized to uppercase
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Raw query string (without the leading `?`)
    pub query: Option<String>,
    /// Request headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Raw request body
    pub body: Vec<u8>,
}

impl IncomingRequest {
    /// Create a request with the given method and path.
    pub fn new(method: &str, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path.to_string(), None),
        };
        Self {
            method: method.to_uppercase(),
            path,
            query,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decoded query parameters.
    pub fn query_params(&self) -> HashMap<String, String> {
        parse_query_string(self.query.as_deref().unwrap_or(""))
    }

    /// Cookies from every `Cookie` header.
    pub fn cookies(&self) -> HashMap<String, String> {
        let mut cookies = HashMap::new();
        for (_, value) in self
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("cookie"))
        {
            for pair in value.split(';') {
                if let Some((name, val)) = pair.trim().split_once('=') {
                    cookies.insert(name.trim().to_string(), val.trim().to_string());
                }
            }
        }
        cookies
    }

    /// Body parsed as `application/x-www-form-urlencoded` data.
    pub fn form(&self) -> HashMap<String, String> {
        parse_query_string(&self.body_text())
    }
}

/// Parse a query string into key-value pairs.
///
/// Later occurrences of a key overwrite earlier ones.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_splits_query() {
        let req = IncomingRequest::new("get", "/search?q=rust&page=2");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/search");
        assert_eq!(req.query.as_deref(), Some("q=rust&page=2"));
        assert_eq!(req.query_params().get("page"), Some(&"2".to_string()));
    }

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("foo=bar&baz=qux");
        assert_eq!(params.get("foo"), Some(&"bar".to_string()));
        assert_eq!(params.get("baz"), Some(&"qux".to_string()));

        let params = parse_query_string("name=John%20Doe&city=New+York&flag");
        assert_eq!(params.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(params.get("city"), Some(&"New York".to_string()));
        assert_eq!(params.get("flag"), Some(&String::new()));
    }

    #[test]
    fn test_decode_multibyte_and_malformed() {
        let params = parse_query_string("drink=caf%C3%A9&ratio=100%&raw=%zz&empty=");
        assert_eq!(params.get("drink"), Some(&"café".to_string()));
        assert_eq!(params.get("ratio"), Some(&"100%".to_string()));
        assert_eq!(params.get("raw"), Some(&"%zz".to_string()));
        assert_eq!(params.get("empty"), Some(&String::new()));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = IncomingRequest::new("GET", "/").with_header("Authorization", "Bearer abc");
        assert_eq!(req.header("authorization"), Some("Bearer abc"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_cookies() {
        let req = IncomingRequest::new("GET", "/")
            .with_header("Cookie", "session=abc; theme=dark")
            .with_header("cookie", "lang=en");
        let cookies = req.cookies();
        assert_eq!(cookies.get("session"), Some(&"abc".to_string()));
        assert_eq!(cookies.get("theme"), Some(&"dark".to_string()));
        assert_eq!(cookies.get("lang"), Some(&"en".to_string()));
    }

    #[test]
    fn test_form() {
        let req = IncomingRequest::new("POST", "/login").with_body("user=admin&pass=s%3Dcret");
        let form = req.form();
        assert_eq!(form.get("user"), Some(&"admin".to_string()));
        assert_eq!(form.get("pass"), Some(&"s=cret".to_string()));
    }
}
