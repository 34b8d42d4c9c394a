//! Per-host cookie jar shared by every request of a session
//!
//! The portal clears cookies by re-sending them with the value `deleteMe`.
//! Those are ignored so they never clobber the live session cookie of the
//! same name. Everything else is merged by name (last write wins).

use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const DELETE_SENTINEL: &str = "deleteMe";

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredCookie {
    name: String,
    value: String,
}

#[derive(Debug, Default)]
pub struct SessionJar {
    hosts: RwLock<HashMap<String, Vec<StoredCookie>>>,
}

impl SessionJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch of raw `Set-Cookie` header values received from `host`
    pub fn store<'a, I>(&self, host: &str, set_cookie_headers: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut hosts = self.write();
        let cookies = hosts.entry(host.to_string()).or_default();

        for raw in set_cookie_headers {
            let Some((name, value)) = parse_set_cookie(raw) else {
                tracing::debug!("Ignoring malformed Set-Cookie from {}", host);
                continue;
            };

            if value.eq_ignore_ascii_case(DELETE_SENTINEL) {
                tracing::debug!("Ignoring {} deletion marker for {}", DELETE_SENTINEL, name);
                continue;
            }

            match cookies.iter_mut().find(|c| c.name == name) {
                Some(existing) => existing.value = value,
                None => cookies.push(StoredCookie { name, value }),
            }
        }
    }

    /// `Cookie` header value for requests to `host`, if anything is stored
    pub fn header_for(&self, host: &str) -> Option<String> {
        let hosts = self.read();
        let cookies = hosts.get(host).filter(|c| !c.is_empty())?;

        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    #[cfg(test)]
    fn get(&self, host: &str, name: &str) -> Option<String> {
        self.read()
            .get(host)?
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.clone())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<StoredCookie>>> {
        match self.hosts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<StoredCookie>>> {
        match self.hosts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let Some(host) = url.host_str() else {
            return;
        };
        self.store(host, cookie_headers.filter_map(|h| h.to_str().ok()));
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let header = self.header_for(url.host_str()?)?;
        HeaderValue::from_str(&header).ok()
    }
}

/// Extract `(name, value)` from `name=value; Path=/; HttpOnly`
fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');
    Some((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "selfcare.example.net";

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("JSESSIONID=abc123; Path=/; HttpOnly"),
            Some(("JSESSIONID".to_string(), "abc123".to_string()))
        );
        assert_eq!(
            parse_set_cookie("token=\"quoted\""),
            Some(("token".to_string(), "quoted".to_string()))
        );
        assert_eq!(parse_set_cookie("=orphan; Path=/"), None);
        assert_eq!(parse_set_cookie("garbage"), None);
    }

    #[test]
    fn test_delete_marker_never_overwrites() {
        let jar = SessionJar::new();
        jar.store(HOST, ["rememberMe=live-token; Path=/"]);
        jar.store(HOST, ["rememberMe=deleteMe; Path=/; Max-Age=0"]);
        jar.store(HOST, ["rememberMe=DELETEME; Path=/"]);

        assert_eq!(jar.get(HOST, "rememberMe").as_deref(), Some("live-token"));
    }

    #[test]
    fn test_delete_marker_is_not_stored_when_absent() {
        let jar = SessionJar::new();
        jar.store(HOST, ["rememberMe=deleteMe; Path=/"]);

        assert_eq!(jar.get(HOST, "rememberMe"), None);
        assert_eq!(jar.header_for(HOST), None);
    }

    #[test]
    fn test_merge_replaces_by_name_and_appends_new() {
        let jar = SessionJar::new();
        jar.store(HOST, ["SESSION=one", "lang=en"]);
        jar.store(HOST, ["SESSION=two", "csrf=xyz"]);

        assert_eq!(jar.get(HOST, "SESSION").as_deref(), Some("two"));
        assert_eq!(jar.get(HOST, "lang").as_deref(), Some("en"));
        assert_eq!(
            jar.header_for(HOST).as_deref(),
            Some("SESSION=two; lang=en; csrf=xyz")
        );
    }

    #[test]
    fn test_cookies_are_scoped_by_host() {
        let jar = SessionJar::new();
        jar.store(HOST, ["SESSION=one"]);

        assert_eq!(jar.header_for("other.example.net"), None);
    }

    #[test]
    fn test_cookie_store_round_trip_through_reqwest_trait() {
        let jar = SessionJar::new();
        let url = Url::parse("https://selfcare.example.net/customer/login").unwrap();
        let headers = [
            HeaderValue::from_static("SESSION=abc; Path=/"),
            HeaderValue::from_static("rememberMe=deleteMe; Path=/"),
        ];

        jar.set_cookies(&mut headers.iter(), &url);

        let dashboard = Url::parse("https://selfcare.example.net/customer/dashboard").unwrap();
        let sent = jar.cookies(&dashboard).unwrap();
        assert_eq!(sent.to_str().unwrap(), "SESSION=abc");
    }
}
