use std::time::Instant;

use super::{ProbeResult, ProbeTarget, TargetAddress, TargetKind};
use crate::proxy::{HttpMethod, HttpProbeRequest, ProxyRouter};

/// Body sent to APIs that reject a bare GET before the network question is answered.
pub const POST_PROBE_BODY: &str = r#"{"test":"this will result in an HTTP 500 resp or 401 resp."}"#;

/// Body sent alongside authenticated REST probes.
pub const REST_PROBE_BODY: &str = "{}";

/// Build the request for an HTTP-kind target. `None` for TCP targets.
pub fn build_request(target: &ProbeTarget, address: TargetAddress) -> Option<HttpProbeRequest> {
    let url = match address {
        TargetAddress::Http(url) => url,
        TargetAddress::Tcp { .. } => return None,
    };

    let request = match target.kind {
        TargetKind::HttpGet => HttpProbeRequest {
            method: HttpMethod::Get,
            url,
            basic_auth: None,
            json_body: None,
        },
        TargetKind::HttpPostJson => HttpProbeRequest {
            method: HttpMethod::Post,
            url,
            basic_auth: None,
            json_body: Some(POST_PROBE_BODY),
        },
        TargetKind::HttpGetAuthenticated => HttpProbeRequest {
            method: HttpMethod::Get,
            url,
            basic_auth: target.credentials.clone(),
            json_body: Some(REST_PROBE_BODY),
        },
        TargetKind::TcpDial => return None,
    };
    Some(request)
}

/// Probe one HTTP target along the router's path. Exactly one attempt.
pub async fn probe(target: &ProbeTarget, router: &ProxyRouter) -> ProbeResult {
    let address = match target.validate() {
        Ok(address) => address,
        Err(reason) => {
            tracing::debug!(endpoint = %target.address, error = %reason, "Could not parse endpoint");
            return ProbeResult::rejected(reason);
        }
    };

    let request = match build_request(target, address) {
        Some(request) => request,
        None => {
            return ProbeResult::rejected(format!(
                "{} is not an HTTP target kind",
                target.kind
            ))
        }
    };

    tracing::debug!(
        method = ?request.method,
        url = %request.url,
        authenticated = request.basic_auth.is_some(),
        "Sending HTTP probe"
    );

    let start = Instant::now();
    match router.http().send(request).await {
        Ok(response) => {
            ProbeResult::from_status(response.status, response.reason.as_deref(), start.elapsed())
        }
        Err(err) => ProbeResult::transport_failure(err.to_string(), start.elapsed()),
    }
}
