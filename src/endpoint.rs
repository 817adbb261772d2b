//! Concrete network locations and path joining

use crate::error::{RestError, RestResult};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Url;
use std::fmt;

/// Characters escaped inside a single path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ').add(b'"').add(b'#').add(b'%').add(b'/').add(b'<').add(b'>')
    .add(b'?').add(b'`').add(b'{').add(b'}').add(b'&');

/// Basic-auth credentials taken from the root URL
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// An immutable, dispatchable network location.
///
/// `pathname` never carries a query string; `path` is what goes on the wire
/// and may end in one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
    pathname: String,
    path: String,
    auth: Option<Credentials>,
}

impl Endpoint {
    /// Parse an absolute URL
    pub fn parse(url: &str) -> RestResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| RestError::Decode(format!("invalid URL '{}': {}", url, e)))?;

        let host = parsed.host_str()
            .ok_or_else(|| RestError::Decode(format!("URL '{}' has no host", url)))?
            .to_string();
        let port = parsed.port_or_known_default()
            .ok_or_else(|| RestError::Decode(format!("URL '{}' has no port", url)))?;

        let pathname = parsed.path().to_string();
        let path = match parsed.query() {
            Some(query) => format!("{}?{}", pathname, query),
            None => pathname.clone(),
        };

        let auth = if parsed.username().is_empty() {
            None
        } else {
            let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
            Some(Credentials {
                username: decode(parsed.username()),
                password: parsed.password().map(decode),
            })
        };

        Ok(Self {
            scheme: parsed.scheme().to_string(),
            host,
            port,
            pathname,
            path,
            auth,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path without any query component
    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    /// Path as sent on the wire, query included
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn auth(&self) -> Option<&Credentials> {
        self.auth.as_ref()
    }

    /// Full URL of this endpoint
    pub fn href(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }

    /// A copy of this endpoint with `sub` joined onto its path.
    ///
    /// Any query on this endpoint is discarded before joining.
    pub fn join(&self, sub: &str) -> Endpoint {
        let path = path_join(&self.pathname, sub);
        let pathname = match path.find('?') {
            Some(pos) => path[..pos].to_string(),
            None => path.clone(),
        };

        Endpoint {
            pathname,
            path,
            ..self.clone()
        }
    }

    /// A copy with the trailing path segment `from` replaced by `to`, when
    /// the path ends with that segment.
    pub fn replace_trailing(&self, from: &str, to: &str) -> Option<Endpoint> {
        let stem = self.pathname.strip_suffix(from)?;
        if !(stem.is_empty() || stem.ends_with('/')) {
            return None;
        }

        let pathname = format!("{}{}", stem, to);
        Some(Endpoint {
            path: pathname.clone(),
            pathname,
            ..self.clone()
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.href())
    }
}

/// Join a sub-path onto a base path.
///
/// A `?` sub-path is appended as a query string, a leading `/` never doubles
/// the separator, and anything else gets exactly one separator.
pub fn path_join(base: &str, sub: &str) -> String {
    if sub.starts_with('?') {
        return format!("{}{}", base, sub);
    }

    if let Some(rest) = sub.strip_prefix('/') {
        if base.ends_with('/') {
            return format!("{}{}", base, rest);
        }
        return format!("{}{}", base, sub);
    }

    if base.ends_with('/') {
        format!("{}{}", base, sub)
    } else {
        format!("{}/{}", base, sub)
    }
}

/// Escape a value so it stays one path segment (property keys, index
/// names and values)
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Numeric id at the end of an entity URL
pub fn parse_id(url: &str) -> Option<u64> {
    let digits = url.len() - url.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    url[url.len() - digits..].parse().ok()
}
