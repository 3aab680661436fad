//! Message endpoints: send, directional sync, max-seq query.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use corridor_core::types::SendRequest;
use corridor_core::{Context, CoreError};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::forward::{forward_to_peer, leader_redirect};
use crate::models::{
    check_channel, MaxSeqResp, MessageResp, PullMode, SendReq, SendResp, SyncMessagesReq,
    SyncMessagesResp,
};

/// Sync responses are capped regardless of the requested limit.
pub const MAX_SYNC_LIMIT: usize = 10_000;
const DEFAULT_SYNC_LIMIT: usize = 100;

fn bad_json(e: serde_json::Error) -> ApiError {
    ApiError(CoreError::InvalidInput(format!("malformed request body: {}", e)))
}

/// POST /message/send — accept a message on the channel's slot leader.
pub async fn message_send(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: SendReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;
    if parsed.from_uid.trim().is_empty() {
        return Err(ApiError(CoreError::InvalidInput(
            "from_uid must not be empty".to_string(),
        )));
    }

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    let result = ctx
        .reactor
        .send(SendRequest {
            client_msg_no: parsed.client_msg_no.clone(),
            from_uid: parsed.from_uid,
            channel_id: channel.channel_id.clone(),
            channel_type: channel.channel_type,
            payload: parsed.payload,
            expire_at: parsed.expire_at,
        })
        .await?;

    Ok(HttpResponse::Ok().json(SendResp {
        client_msg_no: parsed.client_msg_no,
        message_id: result.message_id,
        message_seq: result.message_seq,
    }))
}

/// POST /channel/messagesync — directional message pull.
///
/// Served from any replica of the channel's slot; non-replica nodes
/// forward to the slot leader. A channel whose cluster configuration has
/// never been initialised yields an empty result.
pub async fn sync_messages(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: SyncMessagesReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;
    if parsed.login_uid.trim().is_empty() {
        return Err(ApiError(CoreError::InvalidInput(
            "login_uid must not be empty".to_string(),
        )));
    }

    let mut limit = parsed.limit;
    if limit == 0 {
        limit = DEFAULT_SYNC_LIMIT;
    }
    if limit > MAX_SYNC_LIMIT {
        limit = MAX_SYNC_LIMIT;
    }

    if let Some(cluster) = &ctx.cluster {
        let manager = cluster.manager();
        if !manager.initialized() {
            return Ok(HttpResponse::Ok().json(SyncMessagesResp::empty(&parsed)));
        }
        let slot_id = ctx.router.slot_of_key(&channel);
        if !manager.is_replica_of(slot_id) {
            match manager.get_leader_peer(slot_id) {
                Some(peer) => return forward_to_peer(&peer, req.path(), body.to_vec()).await,
                None => return Ok(HttpResponse::Ok().json(SyncMessagesResp::empty(&parsed))),
            }
        }
    }

    let messages = if parsed.start_message_seq == 0 && parsed.end_message_seq == 0 {
        ctx.store
            .load_last_msgs(&channel, limit)
            .map_err(CoreError::from)?
    } else if parsed.pull_mode == PullMode::Up {
        ctx.store
            .load_next_range_msgs(
                &channel,
                parsed.start_message_seq,
                parsed.end_message_seq,
                limit,
            )
            .map_err(CoreError::from)?
    } else {
        ctx.store
            .load_prev_range_msgs(
                &channel,
                parsed.start_message_seq,
                parsed.end_message_seq,
                limit,
            )
            .map_err(CoreError::from)?
    };

    // `more` is accurate: a full page with unexhausted range means the
    // client should pull again.
    let more = if messages.len() < limit {
        false
    } else {
        let last_stored = ctx
            .store
            .get_last_msg_seq(&channel)
            .map_err(CoreError::from)?;
        match parsed.pull_mode {
            _ if parsed.start_message_seq == 0 && parsed.end_message_seq == 0 => false,
            PullMode::Up => {
                let next = messages.last().map(|m| m.message_seq + 1).unwrap_or(0);
                let upper = if parsed.end_message_seq > 0 {
                    parsed.end_message_seq.min(last_stored + 1)
                } else {
                    last_stored + 1
                };
                next < upper
            }
            PullMode::Down => {
                let next = messages.last().map(|m| m.message_seq).unwrap_or(0);
                next > parsed.start_message_seq + 1
            }
        }
    };

    let responses: Vec<MessageResp> = messages.iter().map(MessageResp::from).collect();
    Ok(HttpResponse::Ok().json(SyncMessagesResp {
        start_message_seq: parsed.start_message_seq,
        end_message_seq: parsed.end_message_seq,
        more: u8::from(more),
        messages: responses,
    }))
}

#[derive(Debug, serde::Deserialize)]
pub struct MaxSeqQuery {
    pub channel_id: String,
    #[serde(default)]
    pub channel_type: u8,
}

/// GET /channel/max_message_seq
pub async fn max_message_seq(
    ctx: web::Data<Arc<Context>>,
    query: web::Query<MaxSeqQuery>,
) -> ApiResult<HttpResponse> {
    let channel = check_channel(&query.channel_id, query.channel_type)?;
    let message_seq = ctx
        .store
        .get_last_msg_seq(&channel)
        .map_err(CoreError::from)?;
    Ok(HttpResponse::Ok().json(MaxSeqResp { message_seq }))
}

/// GET /health
pub async fn health(ctx: web::Data<Arc<Context>>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "peer_id": ctx.peer_id(),
        "cluster_on": ctx.cluster_on(),
    }))
}
