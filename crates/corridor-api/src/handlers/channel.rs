//! Channel CRUD and membership-set endpoints.
//!
//! All mutating endpoints are leader-routed: a non-leader node forwards the
//! original body to the slot leader and relays its response.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use corridor_core::{Context, CoreError};
use corridor_raft::commands::{ChannelParam, Command, MembersParam};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::forward::{forward_get_to_peer, forward_to_peer, leader_redirect};
use crate::models::{
    check_channel, ChannelCreateReq, ChannelDeleteReq, SubscriberAddReq, SubscriberRemoveReq,
    UidsReq,
};

fn bad_json(e: serde_json::Error) -> ApiError {
    ApiError(CoreError::InvalidInput(format!("malformed request body: {}", e)))
}

fn ok_response() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// POST /channel — create or replace a channel, including its subscriber
/// set.
pub async fn channel_create(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: ChannelCreateReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;
    if channel.is_person() {
        return Err(ApiError(CoreError::InvalidInput(
            "person channels cannot be created explicitly".to_string(),
        )));
    }

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    ctx.executor
        .execute_channel(&channel, Command::AddOrUpdateChannel(parsed.to_channel_info()))
        .await?;
    ctx.executor
        .execute_channel(
            &channel,
            Command::RemoveAllSubscribers(ChannelParam {
                channel: channel.clone(),
            }),
        )
        .await?;
    if !parsed.subscribers.is_empty() {
        ctx.executor
            .execute_channel(
                &channel,
                Command::AddSubscribers(MembersParam {
                    channel: channel.clone(),
                    uids: parsed.subscribers,
                }),
            )
            .await?;
    }

    Ok(ok_response())
}

/// POST /channel/info — upsert channel configuration only.
pub async fn channel_info_update(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: ChannelCreateReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    ctx.executor
        .execute_channel(&channel, Command::AddOrUpdateChannel(parsed.to_channel_info()))
        .await?;
    Ok(ok_response())
}

/// POST /channel/delete — remove the channel, its sets and its log.
/// Idempotent: deleting a missing channel succeeds.
pub async fn channel_delete(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: ChannelDeleteReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;
    if channel.is_person() {
        return Err(ApiError(CoreError::InvalidInput(
            "person channels cannot be deleted".to_string(),
        )));
    }

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    ctx.executor
        .execute_channel(&channel, Command::DeleteChannel(ChannelParam { channel: channel.clone() }))
        .await?;
    Ok(ok_response())
}

/// POST /channel/subscriber_add — add subscribers; `reset = 1` replaces
/// the whole set. The channel is created implicitly when missing.
pub async fn subscriber_add(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: SubscriberAddReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;
    if channel.is_person() {
        return Err(ApiError(CoreError::InvalidInput(
            "person channels do not take subscribers".to_string(),
        )));
    }

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    if !ctx.store.exist_channel(&channel).map_err(CoreError::from)? {
        ctx.executor
            .execute_channel(
                &channel,
                Command::AddOrUpdateChannel(corridor_commons::models::ChannelInfo::new(
                    channel.channel_id.clone(),
                    channel.channel_type,
                )),
            )
            .await?;
    }

    if parsed.reset == 1 {
        ctx.executor
            .execute_channel(
                &channel,
                Command::RemoveAllSubscribers(ChannelParam {
                    channel: channel.clone(),
                }),
            )
            .await?;
    }

    let subscribers: Vec<String> = parsed
        .subscribers
        .into_iter()
        .filter(|uid| !uid.trim().is_empty())
        .collect();
    if !subscribers.is_empty() {
        ctx.executor
            .execute_channel(
                &channel,
                Command::AddSubscribers(MembersParam {
                    channel: channel.clone(),
                    uids: subscribers,
                }),
            )
            .await?;
    }

    Ok(ok_response())
}

/// POST /channel/subscriber_remove
pub async fn subscriber_remove(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: SubscriberRemoveReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;
    if channel.is_person() {
        return Err(ApiError(CoreError::InvalidInput(
            "person channels do not take subscribers".to_string(),
        )));
    }

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    ctx.executor
        .execute_channel(
            &channel,
            Command::RemoveSubscribers(MembersParam {
                channel: channel.clone(),
                uids: parsed.subscribers,
            }),
        )
        .await?;
    Ok(ok_response())
}

// ─── Blacklist ──────────────────────────────────────────────────────────

pub async fn blacklist_add(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: UidsReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;
    if parsed.uids.is_empty() {
        return Err(ApiError(CoreError::InvalidInput(
            "uids must not be empty".to_string(),
        )));
    }

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    ctx.executor
        .execute_channel(
            &channel,
            Command::AddDenylist(MembersParam {
                channel: channel.clone(),
                uids: parsed.uids,
            }),
        )
        .await?;
    Ok(ok_response())
}

/// POST /channel/blacklist_set — last-writer-wins replacement.
pub async fn blacklist_set(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: UidsReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    ctx.executor
        .execute_channel(
            &channel,
            Command::RemoveAllDenylist(ChannelParam {
                channel: channel.clone(),
            }),
        )
        .await?;
    if !parsed.uids.is_empty() {
        ctx.executor
            .execute_channel(
                &channel,
                Command::AddDenylist(MembersParam {
                    channel: channel.clone(),
                    uids: parsed.uids,
                }),
            )
            .await?;
    }
    Ok(ok_response())
}

pub async fn blacklist_remove(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: UidsReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    ctx.executor
        .execute_channel(
            &channel,
            Command::RemoveDenylist(MembersParam {
                channel: channel.clone(),
                uids: parsed.uids,
            }),
        )
        .await?;
    Ok(ok_response())
}

// ─── Whitelist ──────────────────────────────────────────────────────────

pub async fn whitelist_add(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: UidsReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;
    if parsed.uids.is_empty() {
        return Err(ApiError(CoreError::InvalidInput(
            "uids must not be empty".to_string(),
        )));
    }

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    ctx.executor
        .execute_channel(
            &channel,
            Command::AddAllowlist(MembersParam {
                channel: channel.clone(),
                uids: parsed.uids,
            }),
        )
        .await?;
    Ok(ok_response())
}

/// POST /channel/whitelist_set — last-writer-wins replacement.
pub async fn whitelist_set(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: UidsReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    ctx.executor
        .execute_channel(
            &channel,
            Command::RemoveAllAllowlist(ChannelParam {
                channel: channel.clone(),
            }),
        )
        .await?;
    if !parsed.uids.is_empty() {
        ctx.executor
            .execute_channel(
                &channel,
                Command::AddAllowlist(MembersParam {
                    channel: channel.clone(),
                    uids: parsed.uids,
                }),
            )
            .await?;
    }
    Ok(ok_response())
}

pub async fn whitelist_remove(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let parsed: UidsReq = serde_json::from_slice(&body).map_err(bad_json)?;
    let channel = check_channel(&parsed.channel_id, parsed.channel_type)?;

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        return forward_to_peer(&peer, req.path(), body.to_vec()).await;
    }

    ctx.executor
        .execute_channel(
            &channel,
            Command::RemoveAllowlist(MembersParam {
                channel: channel.clone(),
                uids: parsed.uids,
            }),
        )
        .await?;
    Ok(ok_response())
}

#[derive(Debug, serde::Deserialize)]
pub struct WhitelistQuery {
    pub channel_id: String,
    #[serde(default)]
    pub channel_type: u8,
}

/// GET /channel/whitelist?channel_id=..&channel_type=..
pub async fn whitelist_get(
    ctx: web::Data<Arc<Context>>,
    req: HttpRequest,
    query: web::Query<WhitelistQuery>,
) -> ApiResult<HttpResponse> {
    let channel = check_channel(&query.channel_id, query.channel_type)?;

    if let Some(peer) = leader_redirect(&ctx, &channel)? {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.path().to_string());
        return forward_get_to_peer(&peer, &path_and_query).await;
    }

    let allowlist = ctx.store.get_allowlist(&channel).map_err(CoreError::from)?;
    Ok(HttpResponse::Ok().json(allowlist))
}
