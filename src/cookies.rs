//! Cookie jar shared by every managed client
//!
//! A single RFC 6265 store (via `cookie_store`) is plugged into each reqwest
//! transport as its cookie provider, so a session cookie set by one server is
//! visible to every client that talks to it. Persistence across process
//! restarts is left to the host.

use std::sync::{Mutex, MutexGuard, PoisonError};

use cookie_store::CookieStore;
use http::HeaderValue;
use url::Url;

use crate::{Error, Result};

/// A cookie as seen by the application layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Domain (empty for host-only cookies)
    pub domain: String,
    /// Path
    pub path: String,
    /// Whether the cookie is secure (HTTPS only)
    pub secure: bool,
    /// Whether the cookie is HTTP only
    pub http_only: bool,
}

impl Cookie {
    /// Create a host-only session cookie with path `/`
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: "/".to_string(),
            secure: false,
            http_only: false,
        }
    }

    /// Set the domain for this cookie
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the path for this cookie
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Restrict the cookie to HTTPS
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    fn to_set_cookie(&self) -> String {
        let mut set_cookie = format!("{}={}", self.name, self.value);

        if !self.domain.is_empty() {
            set_cookie.push_str(&format!("; Domain={}", self.domain));
        }

        if self.path != "/" {
            set_cookie.push_str(&format!("; Path={}", self.path));
        }

        if self.secure {
            set_cookie.push_str("; Secure");
        }

        if self.http_only {
            set_cookie.push_str("; HttpOnly");
        }

        set_cookie
    }
}

/// Thread-safe cookie storage
#[derive(Debug, Default)]
pub struct CookieJar {
    store: Mutex<CookieStore>,
}

impl CookieJar {
    /// Create an empty jar
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, CookieStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a cookie as if `url` had set it
    pub fn add_cookie(&self, cookie: Cookie, url: &Url) -> Result<()> {
        self.store()
            .parse(&cookie.to_set_cookie(), url)
            .map_err(|e| Error::Internal(format!("Failed to parse cookie: {}", e)))?;
        Ok(())
    }

    /// Cookies that would be sent with a request to `url`
    pub fn cookies_for_url(&self, url: &Url) -> Vec<Cookie> {
        self.store()
            .matches(url)
            .into_iter()
            .map(|cookie| Cookie {
                name: cookie.name().to_string(),
                value: cookie.value().to_string(),
                domain: cookie.domain().unwrap_or("").to_string(),
                path: cookie.path().unwrap_or("/").to_string(),
                secure: cookie.secure().unwrap_or(false),
                http_only: cookie.http_only().unwrap_or(false),
            })
            .collect()
    }

    /// Drop every cookie that would be sent with a request to `url`
    pub fn remove_cookies_for_url(&self, url: &Url) {
        let mut store = self.store();
        let retained: Vec<_> = store
            .iter_any()
            .filter(|cookie| !cookie.matches(url))
            .cloned()
            .map(Ok::<_, std::convert::Infallible>)
            .collect();

        match CookieStore::from_cookies(retained, true) {
            Ok(rebuilt) => *store = rebuilt,
            Err(never) => match never {},
        }
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let mut store = self.store();
        for header in cookie_headers {
            if let Ok(header_str) = header.to_str() {
                if let Err(e) = store.parse(header_str, url) {
                    tracing::debug!("Ignoring malformed Set-Cookie from {}: {}", url, e);
                }
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let header = self
            .store()
            .get_request_values(url)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");

        if header.is_empty() {
            return None;
        }

        HeaderValue::from_str(&header).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore as _;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    #[test]
    fn test_set_cookie_headers_are_stored() {
        let jar = CookieJar::new();
        let header = HeaderValue::from_static("session=abc123; Path=/");
        jar.set_cookies(&mut std::iter::once(&header), &url("https://example.com/login"));

        let value = jar
            .cookies(&url("https://example.com/api"))
            .expect("cookie header");
        assert_eq!(value.to_str().unwrap(), "session=abc123");
        assert!(jar.cookies(&url("https://other.com/")).is_none());
    }

    #[test]
    fn test_add_and_list_cookies() {
        let jar = CookieJar::new();
        let site = url("https://example.com/");
        jar.add_cookie(Cookie::new("theme", "dark"), &site).unwrap();

        let cookies = jar.cookies_for_url(&site);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "theme");
        assert_eq!(cookies[0].value, "dark");
    }

    #[test]
    fn test_remove_cookies_for_url_keeps_other_hosts() {
        let jar = CookieJar::new();
        let first = url("https://example.com/");
        let second = url("https://other.com/");
        jar.add_cookie(Cookie::new("a", "1"), &first).unwrap();
        jar.add_cookie(Cookie::new("b", "2"), &second).unwrap();

        jar.remove_cookies_for_url(&first);

        assert!(jar.cookies_for_url(&first).is_empty());
        assert_eq!(jar.cookies_for_url(&second).len(), 1);
    }
}
