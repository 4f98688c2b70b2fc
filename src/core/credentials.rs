use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::core::renewal::SESSION_COOKIE;

static HEADER_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:-H|--header)\s+(?:'([^']*)'|"([^"]*)")"#).expect("static regex")
});

static COOKIE_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:-b|--cookie)\s+(?:'([^']*)'|"([^"]*)")"#).expect("static regex")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("no headers found in the curl command")]
    NoHeaders,
    #[error("no cookie found in the curl command")]
    NoCookie,
}

/// Tenant session credentials as replayed against the read endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub headers: BTreeMap<String, String>,
    pub cookie: String,
}

impl Credentials {
    pub fn new(headers: BTreeMap<String, String>, cookie: impl Into<String>) -> Self {
        Self {
            headers,
            cookie: cookie.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.headers.is_empty() && !self.cookie.trim().is_empty()
    }

    /// Parse a browser "copy as cURL" command.
    ///
    /// Headers come from `-H`/`--header`; the cookie from `-b`/`--cookie` when
    /// present, else from a `Cookie:` header (which is not kept as a header).
    pub fn from_curl(command: &str) -> Result<Self, CredentialsError> {
        let mut headers = BTreeMap::new();
        let mut cookie = String::new();

        for caps in HEADER_FLAG.captures_iter(command) {
            let raw = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            let Some((name, value)) = raw.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if name.eq_ignore_ascii_case("cookie") {
                cookie = value.trim().to_string();
            } else {
                headers.insert(name.to_string(), value.trim().to_string());
            }
        }

        if let Some(caps) = COOKIE_FLAG.captures(command) {
            let raw = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            if !raw.trim().is_empty() {
                cookie = raw.trim().to_string();
            }
        }

        if headers.is_empty() {
            return Err(CredentialsError::NoHeaders);
        }
        if cookie.is_empty() {
            return Err(CredentialsError::NoCookie);
        }
        Ok(Self { headers, cookie })
    }

    /// Build credentials from an intercepted request and the browser's cookie jar.
    pub fn from_interception(
        headers: BTreeMap<String, String>,
        jar: &[(String, String)],
    ) -> Self {
        let headers = headers
            .into_iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("cookie"))
            .collect();
        Self {
            headers,
            cookie: cookie_string(jar),
        }
    }

    /// Replace (or append) the session key cookie.
    pub fn with_session_key(&self, key: &str) -> Self {
        Self {
            headers: self.headers.clone(),
            cookie: set_cookie_entry(&self.cookie, SESSION_COOKIE, key),
        }
    }
}

pub fn cookie_string(jar: &[(String, String)]) -> String {
    jar.iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn set_cookie_entry(cookie: &str, name: &str, value: &str) -> String {
    let mut replaced = false;
    let mut entries: Vec<String> = cookie
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, _)) if key.trim() == name => {
                replaced = true;
                format!("{}={}", name, value)
            }
            _ => entry.to_string(),
        })
        .collect();
    if !replaced {
        entries.push(format!("{}={}", name, value));
    }
    entries.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURL: &str = r#"curl 'https://weread.qq.com/web/book/read' \
  -H 'accept: application/json, text/plain, */*' \
  -H 'content-type: application/json;charset=UTF-8' \
  -H "user-agent: Mozilla/5.0 (X11; Linux x86_64)" \
  -b 'wr_gid=123; wr_vid=456; wr_skey=oldkey12; wr_rt=abc' \
  --data-raw '{"appId":"wb"}'"#;

    #[test]
    fn parses_headers_and_cookie_flag() {
        let creds = Credentials::from_curl(CURL).unwrap();
        assert_eq!(creds.headers.len(), 3);
        assert_eq!(
            creds.headers["content-type"],
            "application/json;charset=UTF-8"
        );
        assert_eq!(creds.headers["user-agent"], "Mozilla/5.0 (X11; Linux x86_64)");
        assert_eq!(creds.cookie, "wr_gid=123; wr_vid=456; wr_skey=oldkey12; wr_rt=abc");
        assert!(creds.is_complete());
    }

    #[test]
    fn cookie_header_is_used_when_no_cookie_flag() {
        let cmd = "curl 'x' -H 'accept: */*' -H 'Cookie: wr_skey=abc; wr_vid=1'";
        let creds = Credentials::from_curl(cmd).unwrap();
        assert_eq!(creds.cookie, "wr_skey=abc; wr_vid=1");
        assert!(!creds.headers.contains_key("Cookie"));
    }

    #[test]
    fn missing_parts_are_rejected() {
        assert_eq!(
            Credentials::from_curl("curl 'x' -b 'a=b'"),
            Err(CredentialsError::NoHeaders)
        );
        assert_eq!(
            Credentials::from_curl("curl 'x' -H 'accept: */*'"),
            Err(CredentialsError::NoCookie)
        );
    }

    #[test]
    fn session_key_is_replaced_in_place() {
        let creds = Credentials::from_curl(CURL).unwrap();
        let renewed = creds.with_session_key("newkey34");
        assert_eq!(
            renewed.cookie,
            "wr_gid=123; wr_vid=456; wr_skey=newkey34; wr_rt=abc"
        );
        assert_eq!(renewed.headers, creds.headers);
    }

    #[test]
    fn session_key_is_appended_when_absent() {
        let creds = Credentials::new(BTreeMap::new(), "wr_vid=1");
        assert_eq!(creds.with_session_key("k").cookie, "wr_vid=1; wr_skey=k");
    }

    #[test]
    fn interception_builds_cookie_string_from_jar() {
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "*/*".to_string());
        headers.insert("Cookie".to_string(), "ignored".to_string());
        let jar = vec![
            ("wr_vid".to_string(), "1".to_string()),
            ("wr_skey".to_string(), "abc".to_string()),
        ];
        let creds = Credentials::from_interception(headers, &jar);
        assert_eq!(creds.cookie, "wr_vid=1; wr_skey=abc");
        assert_eq!(creds.headers.len(), 1);
    }

    #[test]
    fn empty_credentials_are_incomplete() {
        assert!(!Credentials::default().is_complete());
        let mut headers = BTreeMap::new();
        headers.insert("a".to_string(), "b".to_string());
        assert!(!Credentials::new(headers, "  ").is_complete());
    }
}
