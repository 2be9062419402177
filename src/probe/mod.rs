pub mod http;
pub mod tcp;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::error::AppError;

/// How a target is probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Unauthenticated GET with no body
    HttpGet,
    /// POST with a small fixed JSON body
    HttpPostJson,
    /// GET with HTTP Basic credentials
    HttpGetAuthenticated,
    /// Raw TCP connect to `host:port`
    TcpDial,
}

impl TargetKind {
    pub fn is_http(&self) -> bool {
        !matches!(self, TargetKind::TcpDial)
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::HttpGet => write!(f, "http_get"),
            TargetKind::HttpPostJson => write!(f, "http_post_json"),
            TargetKind::HttpGetAuthenticated => write!(f, "http_get_authenticated"),
            TargetKind::TcpDial => write!(f, "tcp_dial"),
        }
    }
}

impl std::str::FromStr for TargetKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "http_get" | "get" => Ok(TargetKind::HttpGet),
            "http_post_json" | "post" => Ok(TargetKind::HttpPostJson),
            "http_get_authenticated" | "rest" => Ok(TargetKind::HttpGetAuthenticated),
            "tcp_dial" | "tcp" => Ok(TargetKind::TcpDial),
            _ => Err(AppError::Config(format!("Unknown target kind: {}", s))),
        }
    }
}

/// Identity and secret used for Basic authentication
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}

/// One unit of probe work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub kind: TargetKind,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// A target address that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddress {
    Http(Url),
    Tcp { host: String, port: u16 },
}

impl ProbeTarget {
    pub fn new(kind: TargetKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            credentials: None,
        }
    }

    pub fn http_get(address: impl Into<String>) -> Self {
        Self::new(TargetKind::HttpGet, address)
    }

    pub fn http_post_json(address: impl Into<String>) -> Self {
        Self::new(TargetKind::HttpPostJson, address)
    }

    pub fn http_get_authenticated(address: impl Into<String>, credentials: Credentials) -> Self {
        Self::new(TargetKind::HttpGetAuthenticated, address).with_credentials(credentials)
    }

    pub fn tcp_dial(address: impl Into<String>) -> Self {
        Self::new(TargetKind::TcpDial, address)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Check the address before any I/O happens.
    pub fn validate(&self) -> Result<TargetAddress, String> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err("empty address".to_string());
        }

        if self.kind.is_http() {
            let url = parse_http_url(address)?;
            if self.kind == TargetKind::HttpGetAuthenticated && self.credentials.is_none() {
                return Err("authenticated target has no credentials".to_string());
            }
            Ok(TargetAddress::Http(url))
        } else {
            let (host, port) = split_host_port(address)?;
            Ok(TargetAddress::Tcp { host, port })
        }
    }
}

fn parse_http_url(address: &str) -> Result<Url, String> {
    let url = Url::parse(address).map_err(|e| format!("invalid URL '{}': {}", address, e))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported URL scheme '{}' in '{}'", other, address)),
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(format!("URL '{}' has no host", address));
    }
    Ok(url)
}

/// Split `host:port`. IPv6 literals must be bracketed: `[::1]:443`.
pub fn split_host_port(address: &str) -> Result<(String, u16), String> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("'{}' is not in host:port form", address))?;

    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| format!("'{}' has an unclosed '['", address))?,
        None if host.contains(':') || host.contains(']') => {
            return Err(format!(
                "IPv6 address in '{}' must be bracketed, e.g. [::1]:443",
                address
            ))
        }
        None => host,
    };
    if host.is_empty() {
        return Err(format!("'{}' has an empty host", address));
    }
    if host.contains('/') {
        return Err(format!("'{}' is not in host:port form", address));
    }

    let port: u16 = port
        .parse()
        .map_err(|e| format!("invalid port '{}' in '{}': {}", port, address, e))?;
    if port == 0 {
        return Err(format!("port 0 is not dialable in '{}'", address));
    }

    Ok((host.to_string(), port))
}

/// A named, ordered collection of targets for one cloud/datacenter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub cloud: String,
    pub datacenter: String,
    pub targets: Vec<ProbeTarget>,
}

impl ServiceGroup {
    pub fn new(cloud: impl Into<String>, datacenter: impl Into<String>) -> Self {
        Self {
            cloud: cloud.into(),
            datacenter: datacenter.into(),
            targets: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: ProbeTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn identity(&self) -> GroupIdentity {
        GroupIdentity {
            cloud: self.cloud.clone(),
            datacenter: self.datacenter.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupIdentity {
    pub cloud: String,
    pub datacenter: String,
}

impl fmt::Display for GroupIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cloud, self.datacenter)
    }
}

/// Classified outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Reachable,
    ReachableUnauthenticated,
    UnexpectedStatus,
    Unreachable,
}

impl Verdict {
    /// Whether the network path was proven, whatever the application said.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Verdict::Unreachable)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Reachable => write!(f, "reachable"),
            Verdict::ReachableUnauthenticated => write!(f, "reachable (unauthenticated)"),
            Verdict::UnexpectedStatus => write!(f, "unexpected status"),
            Verdict::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Map a raw probe result to a verdict. A transport error always wins.
pub fn classify(status: Option<u16>, transport_error: Option<&str>) -> Verdict {
    if transport_error.is_some() {
        return Verdict::Unreachable;
    }
    match status {
        Some(200) => Verdict::Reachable,
        Some(401) => Verdict::ReachableUnauthenticated,
        Some(_) => Verdict::UnexpectedStatus,
        None => Verdict::Unreachable,
    }
}

/// Outcome of one probe target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub verdict: Verdict,
    /// Status line or error description
    pub detail: String,
    /// HTTP status code, when a response arrived
    pub status: Option<u16>,
    /// False when the target was rejected before any network I/O
    pub attempted: bool,
    pub local_addr: Option<String>,
    pub remote_addr: Option<String>,
    pub duration_ms: u64,
}

impl ProbeResult {
    /// A response arrived; classify it by status code.
    pub fn from_status(status: u16, reason: Option<&str>, elapsed: Duration) -> Self {
        let detail = match reason {
            Some(reason) => format!("{} {}", status, reason),
            None => status.to_string(),
        };
        Self {
            verdict: classify(Some(status), None),
            detail,
            status: Some(status),
            attempted: true,
            local_addr: None,
            remote_addr: None,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// A TCP connection was established and closed.
    pub fn connected(elapsed: Duration) -> Self {
        Self {
            verdict: Verdict::Reachable,
            detail: "TCP connection established".to_string(),
            status: None,
            attempted: true,
            local_addr: None,
            remote_addr: None,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// The probe was attempted but the transport failed.
    pub fn transport_failure(error: impl Into<String>, elapsed: Duration) -> Self {
        let error = error.into();
        Self {
            verdict: classify(None, Some(&error)),
            detail: error,
            status: None,
            attempted: true,
            local_addr: None,
            remote_addr: None,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// The target could not even be attempted.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Unreachable,
            detail: error.into(),
            status: None,
            attempted: false,
            local_addr: None,
            remote_addr: None,
            duration_ms: 0,
        }
    }

    pub fn with_addresses(mut self, local: Option<String>, remote: Option<String>) -> Self {
        self.local_addr = local;
        self.remote_addr = remote;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transport_error_wins() {
        assert_eq!(classify(Some(200), Some("refused")), Verdict::Unreachable);
        assert_eq!(classify(None, Some("dns")), Verdict::Unreachable);
        assert_eq!(classify(None, None), Verdict::Unreachable);
    }

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(classify(Some(200), None), Verdict::Reachable);
        assert_eq!(classify(Some(401), None), Verdict::ReachableUnauthenticated);
        for status in [201, 204, 301, 403, 404, 418, 500, 503] {
            assert_eq!(classify(Some(status), None), Verdict::UnexpectedStatus, "{}", status);
        }
    }

    #[test]
    fn test_unexpected_status_is_still_reachable() {
        assert!(Verdict::UnexpectedStatus.is_reachable());
        assert!(Verdict::ReachableUnauthenticated.is_reachable());
        assert!(!Verdict::Unreachable.is_reachable());
    }

    #[test]
    fn test_validate_http_targets() {
        let ok = ProbeTarget::http_get("https://ondemand.saucelabs.com:443");
        assert!(matches!(ok.validate(), Ok(TargetAddress::Http(_))));

        assert!(ProbeTarget::http_get("").validate().is_err());
        assert!(ProbeTarget::http_get("   ").validate().is_err());
        assert!(ProbeTarget::http_get("ondemand.saucelabs.com").validate().is_err());
        assert!(ProbeTarget::http_get("ftp://example.com").validate().is_err());
        assert!(ProbeTarget::http_post_json("/wd/hub/status").validate().is_err());
    }

    #[test]
    fn test_validate_authenticated_target_needs_credentials() {
        let target = ProbeTarget::new(
            TargetKind::HttpGetAuthenticated,
            "https://saucelabs.com/rest/v1/someone/tunnels",
        );
        assert!(target.validate().is_err());

        let target = target.with_credentials(Credentials::new("someone", "key"));
        assert!(target.validate().is_ok());
    }

    #[test]
    fn test_validate_tcp_targets() {
        assert_eq!(
            ProbeTarget::tcp_dial("ondemand.saucelabs.com:443").validate(),
            Ok(TargetAddress::Tcp {
                host: "ondemand.saucelabs.com".to_string(),
                port: 443
            })
        );
        assert_eq!(
            ProbeTarget::tcp_dial("[::1]:9000").validate(),
            Ok(TargetAddress::Tcp {
                host: "::1".to_string(),
                port: 9000
            })
        );
        assert!(ProbeTarget::tcp_dial("ondemand.saucelabs.com").validate().is_err());
        assert!(ProbeTarget::tcp_dial(":443").validate().is_err());
        assert!(ProbeTarget::tcp_dial("host:http").validate().is_err());
        assert!(ProbeTarget::tcp_dial("host:0").validate().is_err());
        assert!(ProbeTarget::tcp_dial("https://host:443").validate().is_err());
    }

    #[test]
    fn test_ipv6_needs_brackets() {
        assert_eq!(
            split_host_port("[2001:db8::7]:4444"),
            Ok(("2001:db8::7".to_string(), 4444))
        );
        assert!(split_host_port("::1:9000")
            .unwrap_err()
            .contains("must be bracketed"));
        assert!(ProbeTarget::tcp_dial("::1:9000").validate().is_err());
        assert!(ProbeTarget::tcp_dial("2001:db8::7:443").validate().is_err());
        assert!(ProbeTarget::tcp_dial("[::1:9000").validate().is_err());
        assert!(ProbeTarget::tcp_dial("::1]:9000").validate().is_err());
        assert!(ProbeTarget::tcp_dial("[]:9000").validate().is_err());
    }

    #[test]
    fn test_credentials_debug_masks_secret() {
        let creds = Credentials::new("alice", "super-secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("tcp".parse::<TargetKind>().unwrap(), TargetKind::TcpDial);
        assert_eq!(
            "http-post-json".parse::<TargetKind>().unwrap(),
            TargetKind::HttpPostJson
        );
        assert!("udp".parse::<TargetKind>().is_err());
    }

    #[test]
    fn test_result_from_status() {
        let result = ProbeResult::from_status(401, Some("Unauthorized"), Duration::from_millis(12));
        assert_eq!(result.verdict, Verdict::ReachableUnauthenticated);
        assert_eq!(result.detail, "401 Unauthorized");
        assert_eq!(result.status, Some(401));
        assert!(result.attempted);
    }
}
