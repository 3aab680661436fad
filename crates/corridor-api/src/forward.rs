//! Body-preserving forwarding of leader-routed requests.
//!
//! Mutating endpoints must run on the channel's slot leader. A follower
//! replays the original request body against the leader's advertised HTTP
//! address and relays the response verbatim, so clients never see the
//! topology.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use corridor_commons::models::{ChannelKey, Peer};
use corridor_core::executor::LeaderLocation;
use corridor_core::{Context, CoreError};

use crate::error::ApiResult;

/// Resolves where a channel-mutating request must run. `None` means this
/// node is the place.
pub fn leader_redirect(ctx: &Context, channel: &ChannelKey) -> ApiResult<Option<Peer>> {
    if !ctx.cluster_on() {
        return Ok(None);
    }
    match ctx.executor.leader_location(channel)? {
        LeaderLocation::Local => Ok(None),
        LeaderLocation::Remote(peer) => Ok(Some(peer)),
    }
}

fn forward_url(peer: &Peer, path: &str) -> String {
    let base = peer.api_addr.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{}{}", base, path)
    } else {
        format!("http://{}{}", base, path)
    }
}

/// Replays `body` against the leader and relays status + body unchanged.
pub async fn forward_to_peer(peer: &Peer, path: &str, body: Vec<u8>) -> ApiResult<HttpResponse> {
    let url = forward_url(peer, path);
    log::debug!("Forwarding request to slot leader: {}", url);

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| CoreError::Transient(format!("forward to {} failed: {}", url, e)))?;

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CoreError::Transient(format!("forward read from {} failed: {}", url, e)))?;

    Ok(HttpResponse::build(status)
        .content_type("application/json")
        .body(bytes.to_vec()))
}

/// GET variant: relays the full path + query with no body.
pub async fn forward_get_to_peer(peer: &Peer, path_and_query: &str) -> ApiResult<HttpResponse> {
    let url = forward_url(peer, path_and_query);
    log::debug!("Forwarding request to slot leader: {}", url);

    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| CoreError::Transient(format!("forward to {} failed: {}", url, e)))?;

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CoreError::Transient(format!("forward read from {} failed: {}", url, e)))?;

    Ok(HttpResponse::build(status)
        .content_type("application/json")
        .body(bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_url_keeps_scheme() {
        let mut peer = Peer::new(2, "a:1", "a:2");
        peer.api_addr = "http://10.0.0.2:5001".to_string();
        assert_eq!(
            forward_url(&peer, "/channel"),
            "http://10.0.0.2:5001/channel"
        );

        peer.api_addr = "10.0.0.2:5001".to_string();
        assert_eq!(
            forward_url(&peer, "/channel"),
            "http://10.0.0.2:5001/channel"
        );
    }
}
