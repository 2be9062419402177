use std::time::Instant;

use super::{ProbeResult, ProbeTarget, TargetAddress};
use crate::proxy::ProxyRouter;

/// Open a TCP connection to a `host:port` target along the router's path,
/// then close it again.
pub async fn probe(target: &ProbeTarget, router: &ProxyRouter) -> ProbeResult {
    let (host, port) = match target.validate() {
        Ok(TargetAddress::Tcp { host, port }) => (host, port),
        Ok(TargetAddress::Http(_)) => {
            return ProbeResult::rejected(format!("{} is not a TCP target kind", target.kind))
        }
        Err(reason) => {
            tracing::debug!(endpoint = %target.address, error = %reason, "Could not parse endpoint");
            return ProbeResult::rejected(reason);
        }
    };

    let start = Instant::now();
    match router.tcp().dial(&host, port).await {
        Ok(info) => ProbeResult::connected(start.elapsed()).with_addresses(
            info.local_addr.map(|a| a.to_string()),
            info.remote_addr.map(|a| a.to_string()),
        ),
        Err(err) => ProbeResult::transport_failure(err.to_string(), start.elapsed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Verdict;
    use crate::proxy::{DirectDialer, ProxySpec, TransportSettings};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn direct_router() -> ProxyRouter {
        let settings = TransportSettings::default();
        let http = crate::proxy::ReqwestTransport::new(&ProxySpec::direct(), &settings).unwrap();
        ProxyRouter::from_parts(
            ProxySpec::direct(),
            Arc::new(http),
            Arc::new(DirectDialer::new(Duration::from_secs(5))),
        )
    }

    #[tokio::test]
    async fn test_dial_local_listener_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1];
            // EOF once the probe closes its side
            socket.read(&mut buf).await.unwrap()
        });

        let router = direct_router();
        let result = probe(&ProbeTarget::tcp_dial(addr.to_string()), &router).await;

        assert_eq!(result.verdict, Verdict::Reachable);
        assert_eq!(result.remote_addr.as_deref(), Some(addr.to_string().as_str()));
        assert!(result.local_addr.is_some());

        let read = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_refused_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = probe(&ProbeTarget::tcp_dial(addr.to_string()), &direct_router()).await;
        assert_eq!(result.verdict, Verdict::Unreachable);
        assert!(result.attempted);
    }

    #[tokio::test]
    async fn test_malformed_address_is_not_attempted() {
        let result = probe(&ProbeTarget::tcp_dial("no-port-here"), &direct_router()).await;
        assert_eq!(result.verdict, Verdict::Unreachable);
        assert!(!result.attempted);
    }
}
