//! Route table.

use actix_web::web;

use crate::handlers::{channel, message};

/// Mounts the full HTTP surface onto an actix app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Channel CRUD
        .route("/channel", web::post().to(channel::channel_create))
        .route("/channel/info", web::post().to(channel::channel_info_update))
        .route("/channel/delete", web::post().to(channel::channel_delete))
        // Subscribers
        .route(
            "/channel/subscriber_add",
            web::post().to(channel::subscriber_add),
        )
        .route(
            "/channel/subscriber_remove",
            web::post().to(channel::subscriber_remove),
        )
        // Blacklist
        .route(
            "/channel/blacklist_add",
            web::post().to(channel::blacklist_add),
        )
        .route(
            "/channel/blacklist_set",
            web::post().to(channel::blacklist_set),
        )
        .route(
            "/channel/blacklist_remove",
            web::post().to(channel::blacklist_remove),
        )
        // Whitelist
        .route(
            "/channel/whitelist_add",
            web::post().to(channel::whitelist_add),
        )
        .route(
            "/channel/whitelist_set",
            web::post().to(channel::whitelist_set),
        )
        .route(
            "/channel/whitelist_remove",
            web::post().to(channel::whitelist_remove),
        )
        .route("/channel/whitelist", web::get().to(channel::whitelist_get))
        // Messages
        .route(
            "/channel/messagesync",
            web::post().to(message::sync_messages),
        )
        .route(
            "/channel/max_message_seq",
            web::get().to(message::max_message_seq),
        )
        .route("/message/send", web::post().to(message::message_send))
        // Health
        .route("/health", web::get().to(message::health));
}
