use crate::messaging::types::{MediaKind, PostContent};

/// Tag used for payloads the normalizer does not recognize.
pub const GENERIC_MEDIA_TAG: &str = "[Media message]";

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Bracketed tag naming a media kind.
pub fn media_tag(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Photo => "[Photo]",
        MediaKind::Video => "[Video]",
        MediaKind::Document => "[Document]",
        MediaKind::Audio => "[Audio]",
        MediaKind::Voice => "[Voice message]",
        MediaKind::Sticker => "[Sticker]",
    }
}

/// Map an inbound payload to its canonical text.
///
/// Total and pure: every variant yields a non-empty string, and blank
/// text/captions count as absent.
pub fn normalize_content(content: &PostContent) -> String {
    match content {
        PostContent::Text(text) => match non_blank(Some(text)) {
            Some(t) => t.to_string(),
            None => GENERIC_MEDIA_TAG.to_string(),
        },
        PostContent::Media { kind, caption } => {
            let tag = media_tag(*kind);
            if !kind.carries_caption() {
                return tag.to_string();
            }
            match non_blank(caption.as_deref()) {
                Some(c) => format!("{tag} - {c}"),
                None => tag.to_string(),
            }
        }
        PostContent::Other { caption } => match non_blank(caption.as_deref()) {
            Some(c) => c.to_string(),
            None => GENERIC_MEDIA_TAG.to_string(),
        },
    }
}

/// Text actually sent to a destination: canonical content under the channel's display name.
pub fn compose_forward(channel_name: &str, canonical: &str) -> String {
    let name = channel_name.trim();
    if name.is_empty() {
        return canonical.to_string();
    }
    format!("📢 *{name}*\n\n{canonical}")
}

/// Append the platform group suffix unless the id already carries an address.
///
/// Idempotent: anything containing `@` is returned unchanged.
pub fn format_group_address(group_id: &str, suffix: &str) -> String {
    let id = group_id.trim();
    if id.contains('@') {
        return id.to_string();
    }
    format!("{id}{suffix}")
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(kind: MediaKind, caption: Option<&str>) -> PostContent {
        PostContent::Media {
            kind,
            caption: caption.map(str::to_string),
        }
    }

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn text_is_verbatim() {
        let c = PostContent::Text("  hello\nworld ".to_string());
        assert_eq!(normalize_content(&c), "  hello\nworld ");
    }

    #[test]
    fn media_with_and_without_caption() {
        assert_eq!(
            normalize_content(&media(MediaKind::Photo, Some("sunset"))),
            "[Photo] - sunset"
        );
        assert_eq!(normalize_content(&media(MediaKind::Video, None)), "[Video]");
        assert_eq!(
            normalize_content(&media(MediaKind::Document, Some("   "))),
            "[Document]"
        );
        assert_eq!(
            normalize_content(&media(MediaKind::Audio, Some("ep. 4"))),
            "[Audio] - ep. 4"
        );
    }

    #[test]
    fn voice_and_sticker_ignore_captions() {
        assert_eq!(
            normalize_content(&media(MediaKind::Voice, Some("x"))),
            "[Voice message]"
        );
        assert_eq!(
            normalize_content(&media(MediaKind::Sticker, Some("x"))),
            "[Sticker]"
        );
    }

    #[test]
    fn caption_only_and_unknown_payloads() {
        let captioned = PostContent::Other {
            caption: Some("poll results".to_string()),
        };
        assert_eq!(normalize_content(&captioned), "poll results");
        assert_eq!(
            normalize_content(&PostContent::Other { caption: None }),
            GENERIC_MEDIA_TAG
        );
    }

    #[test]
    fn normalizer_never_yields_empty_and_is_stable() {
        let variants = vec![
            PostContent::Text(String::new()),
            PostContent::Text("hi".to_string()),
            PostContent::Other { caption: None },
            PostContent::Other {
                caption: Some(String::new()),
            },
            media(MediaKind::Photo, None),
            media(MediaKind::Sticker, None),
        ];
        for v in &variants {
            let first = normalize_content(v);
            assert!(!first.is_empty(), "{v:?} produced empty text");
            assert_eq!(first, normalize_content(v));
        }
    }

    #[test]
    fn group_address_is_idempotent() {
        let once = format_group_address("120363000000000000", "@g.us");
        assert_eq!(once, "120363000000000000@g.us");
        assert_eq!(format_group_address(&once, "@g.us"), once);
        assert_eq!(format_group_address("100@dest", "@g.us"), "100@dest");
    }

    #[test]
    fn forward_text_carries_channel_name() {
        assert_eq!(compose_forward("News", "hello"), "📢 *News*\n\nhello");
        assert_eq!(compose_forward("  ", "hello"), "hello");
    }
}
