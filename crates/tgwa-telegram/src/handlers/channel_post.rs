use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use tgwa_core::{
    domain::{ChannelId, PostId},
    messaging::types::{InboundPost, MediaKind, PostContent},
};

use crate::router::AppState;

/// Translate a channel post into the router's input.
///
/// Only posts from channels are accepted; the alias is the public
/// `@username`, when the channel has one.
pub fn to_inbound_post(msg: &Message) -> Option<InboundPost> {
    if !msg.chat.is_channel() {
        return None;
    }

    let caption = msg.caption().map(str::to_string);
    let media = |kind| PostContent::Media {
        kind,
        caption: caption.clone(),
    };

    let content = if let Some(text) = msg.text() {
        PostContent::Text(text.to_string())
    } else if msg.photo().is_some() {
        media(MediaKind::Photo)
    } else if msg.video().is_some() {
        media(MediaKind::Video)
    } else if msg.document().is_some() {
        media(MediaKind::Document)
    } else if msg.audio().is_some() {
        media(MediaKind::Audio)
    } else if msg.voice().is_some() {
        PostContent::Media {
            kind: MediaKind::Voice,
            caption: None,
        }
    } else if msg.sticker().is_some() {
        PostContent::Media {
            kind: MediaKind::Sticker,
            caption: None,
        }
    } else {
        PostContent::Other { caption }
    };

    Some(InboundPost {
        post_id: PostId(msg.id.0.to_string()),
        channel_id: ChannelId(msg.chat.id.0.to_string()),
        channel_alias: msg.chat.username().map(|u| ChannelId(format!("@{u}"))),
        content,
    })
}

pub async fn handle_channel_post(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(post) = to_inbound_post(&msg) else {
        return Ok(());
    };

    tracing::debug!(
        channel = %post.channel_id,
        alias = post.alias().unwrap_or("-"),
        message_id = %post.post_id,
        "channel post received"
    );

    let report = state.forwarder.route(&post).await;
    if report.matched > 0 {
        tracing::info!(
            channel = %post.channel_id,
            message_id = %post.post_id,
            sent = report.sent,
            failed = report.failed,
            "channel post fanned out"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel_message(extra: serde_json::Value) -> Message {
        let mut v = json!({
            "message_id": 7,
            "date": 1_700_000_000,
            "chat": {
                "id": -1001234567890i64,
                "type": "channel",
                "title": "News",
                "username": "news"
            }
        });
        if let (Some(obj), Some(more)) = (v.as_object_mut(), extra.as_object()) {
            for (k, val) in more {
                obj.insert(k.clone(), val.clone());
            }
        }
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn text_post_carries_both_identity_forms() {
        let post = to_inbound_post(&channel_message(json!({"text": "hello"}))).unwrap();
        assert_eq!(post.post_id, PostId("7".into()));
        assert_eq!(post.channel_id, ChannelId("-1001234567890".into()));
        assert_eq!(post.alias(), Some("@news"));
        assert_eq!(post.content, PostContent::Text("hello".into()));
    }

    #[test]
    fn photo_keeps_caption() {
        let msg = channel_message(json!({
            "photo": [{"file_id": "f", "file_unique_id": "u", "width": 90, "height": 90}],
            "caption": "map"
        }));
        let post = to_inbound_post(&msg).unwrap();
        assert_eq!(
            post.content,
            PostContent::Media {
                kind: MediaKind::Photo,
                caption: Some("map".into())
            }
        );
    }

    #[test]
    fn unrecognized_payload_becomes_other() {
        let msg = channel_message(json!({"location": {"latitude": 1.5, "longitude": 2.5}}));
        let post = to_inbound_post(&msg).unwrap();
        assert_eq!(post.content, PostContent::Other { caption: None });
    }
}
