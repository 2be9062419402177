//! SOCKS5 CONNECT client (RFC 1928) with optional username/password
//! authentication (RFC 1929).
//!
//! Only the handshake is performed; once the proxy reports success the tunnel
//! is closed again, which is all a reachability probe needs.

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use super::{
    connect_with_timeout, url_credentials, DialInfo, TcpDialer, TransportError, TransportErrorKind,
};
use crate::error::{AppError, Result};
use crate::probe::Credentials;

const SOCKS5_VERSION: u8 = 0x05;

const AUTH_NO_AUTH: u8 = 0x00;
const AUTH_USERNAME_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const AUTH_SUBNEG_VERSION: u8 = 0x01;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;

/// Dials TCP targets through a SOCKS5 proxy
pub struct Socks5Dialer {
    proxy_host: String,
    proxy_port: u16,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl Socks5Dialer {
    pub fn new(
        proxy_host: impl Into<String>,
        proxy_port: u16,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Self {
        Self {
            proxy_host: proxy_host.into(),
            proxy_port,
            credentials,
            timeout,
        }
    }

    /// Build from a `socks5://[user:pass@]host:port` URL.
    pub fn from_url(url: &Url, timeout: Duration) -> Result<Self> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AppError::proxy(url.as_str(), "missing SOCKS5 proxy host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port()
            .ok_or_else(|| AppError::proxy(url.as_str(), "missing SOCKS5 proxy port"))?;

        let credentials = url_credentials(url);

        if let Some(creds) = &credentials {
            if creds.username.len() > 255 || creds.secret.len() > 255 {
                return Err(AppError::proxy(
                    format!("socks5://***:***@{}:{}", host, port),
                    "SOCKS5 username and password are limited to 255 bytes",
                ));
            }
        }

        Ok(Self::new(host, port, credentials, timeout))
    }

    async fn negotiate(&self, stream: &mut TcpStream) -> std::result::Result<u8, TransportError> {
        let mut methods = vec![AUTH_NO_AUTH];
        if self.credentials.is_some() {
            methods.push(AUTH_USERNAME_PASSWORD);
        }

        let mut request = vec![SOCKS5_VERSION, methods.len() as u8];
        request.extend_from_slice(&methods);
        stream
            .write_all(&request)
            .await
            .map_err(|e| proxy_io("send version negotiation", &e))?;

        let mut response = [0u8; 2];
        stream
            .read_exact(&mut response)
            .await
            .map_err(|e| proxy_io("read version response", &e))?;

        if response[0] != SOCKS5_VERSION {
            return Err(proxy_error(format!(
                "invalid SOCKS version from proxy: expected 0x05, got 0x{:02x}",
                response[0]
            )));
        }
        if response[1] == AUTH_NO_ACCEPTABLE {
            return Err(proxy_error("no acceptable authentication methods"));
        }

        tracing::trace!(method = response[1], "SOCKS5 server chose authentication method");
        Ok(response[1])
    }

    async fn authenticate(&self, stream: &mut TcpStream) -> std::result::Result<(), TransportError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| proxy_error("proxy requested password authentication but none was configured"))?;

        let user = creds.username.as_bytes();
        let pass = creds.secret.as_bytes();
        let mut request = vec![AUTH_SUBNEG_VERSION, user.len() as u8];
        request.extend_from_slice(user);
        request.push(pass.len() as u8);
        request.extend_from_slice(pass);

        stream
            .write_all(&request)
            .await
            .map_err(|e| proxy_io("send authentication", &e))?;

        let mut response = [0u8; 2];
        stream
            .read_exact(&mut response)
            .await
            .map_err(|e| proxy_io("read authentication response", &e))?;

        if response[0] != AUTH_SUBNEG_VERSION {
            return Err(proxy_error(format!(
                "invalid auth subnegotiation version: expected 0x01, got 0x{:02x}",
                response[0]
            )));
        }
        if response[1] != 0x00 {
            return Err(proxy_error(format!(
                "authentication rejected by proxy: status 0x{:02x}",
                response[1]
            )));
        }
        Ok(())
    }

    async fn connect_request(
        &self,
        stream: &mut TcpStream,
        host: &str,
        port: u16,
    ) -> std::result::Result<(), TransportError> {
        stream
            .write_all(&encode_connect_request(host, port)?)
            .await
            .map_err(|e| proxy_io("send connect request", &e))?;

        let mut header = [0u8; 4];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| proxy_io("read connect response", &e))?;

        if header[0] != SOCKS5_VERSION {
            return Err(proxy_error(format!(
                "invalid SOCKS version in response: expected 0x05, got 0x{:02x}",
                header[0]
            )));
        }
        if header[1] != REP_SUCCESS {
            return Err(reply_error(header[1]));
        }

        // Bound address: consume it so the reply is fully read.
        let addr_len = match header[3] {
            ATYP_IPV4 => 4,
            ATYP_IPV6 => 16,
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream
                    .read_exact(&mut len)
                    .await
                    .map_err(|e| proxy_io("read bound domain length", &e))?;
                len[0] as usize
            }
            other => {
                return Err(proxy_error(format!(
                    "unknown address type in response: 0x{:02x}",
                    other
                )))
            }
        };
        let mut rest = vec![0u8; addr_len + 2];
        stream
            .read_exact(&mut rest)
            .await
            .map_err(|e| proxy_io("read bound address", &e))?;

        Ok(())
    }

    async fn handshake(
        &self,
        host: &str,
        port: u16,
    ) -> std::result::Result<DialInfo, TransportError> {
        let mut stream = connect_with_timeout(&self.proxy_host, self.proxy_port, self.timeout)
            .await
            .map_err(|e| {
                TransportError::new(
                    e.kind,
                    format!(
                        "cannot reach SOCKS5 proxy {}:{}: {}",
                        self.proxy_host, self.proxy_port, e.message
                    ),
                )
            })?;

        match self.negotiate(&mut stream).await? {
            AUTH_NO_AUTH => {}
            AUTH_USERNAME_PASSWORD => self.authenticate(&mut stream).await?,
            other => {
                return Err(proxy_error(format!(
                    "unsupported authentication method: 0x{:02x}",
                    other
                )))
            }
        }

        self.connect_request(&mut stream, host, port).await?;

        let info = DialInfo {
            local_addr: stream.local_addr().ok(),
            remote_addr: stream.peer_addr().ok(),
        };
        let _ = stream.shutdown().await;
        Ok(info)
    }
}

#[async_trait]
impl TcpDialer for Socks5Dialer {
    async fn dial(&self, host: &str, port: u16) -> std::result::Result<DialInfo, TransportError> {
        tracing::debug!(
            proxy.host = %self.proxy_host,
            proxy.port = self.proxy_port,
            target.host = %host,
            target.port = port,
            "Dialing through SOCKS5 proxy"
        );

        match tokio::time::timeout(self.timeout, self.handshake(host, port)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::new(
                TransportErrorKind::Timeout,
                format!(
                    "SOCKS5 handshake for {}:{} did not complete within {:?}",
                    host, port, self.timeout
                ),
            )),
        }
    }
}

fn encode_connect_request(host: &str, port: u16) -> std::result::Result<Vec<u8>, TransportError> {
    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        // Domain names are resolved by the proxy.
        Err(_) => {
            let name = host.as_bytes();
            if name.len() > 255 {
                return Err(TransportError::new(
                    TransportErrorKind::Other,
                    format!("hostname too long for SOCKS5 (max 255 bytes): {}", host),
                ));
            }
            request.push(ATYP_DOMAIN);
            request.push(name.len() as u8);
            request.extend_from_slice(name);
        }
    }

    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

fn reply_error(code: u8) -> TransportError {
    let (kind, text) = match code {
        0x01 => (TransportErrorKind::Proxy, "general SOCKS server failure"),
        0x02 => (TransportErrorKind::Proxy, "connection not allowed by ruleset"),
        0x03 => (TransportErrorKind::Connect, "network unreachable"),
        0x04 => (TransportErrorKind::Connect, "host unreachable"),
        0x05 => (TransportErrorKind::Connect, "connection refused"),
        0x06 => (TransportErrorKind::Timeout, "TTL expired"),
        0x07 => (TransportErrorKind::Proxy, "command not supported"),
        0x08 => (TransportErrorKind::Proxy, "address type not supported"),
        _ => (TransportErrorKind::Proxy, "unknown SOCKS error"),
    };
    TransportError::new(kind, format!("SOCKS5 proxy reported {} (code 0x{:02x})", text, code))
}

fn proxy_error(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorKind::Proxy, message)
}

fn proxy_io(step: &str, err: &std::io::Error) -> TransportError {
    TransportError::new(TransportErrorKind::Proxy, format!("failed to {}: {}", step, err))
}
