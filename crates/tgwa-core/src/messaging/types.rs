use crate::domain::{ChannelId, PostId};

/// One broadcast post raised by the inbound front end.
///
/// Telegram-specific fields stay in the Telegram adapter; the router only
/// needs the source identity in both its forms and the payload variant.
#[derive(Clone, Debug)]
pub struct InboundPost {
    pub post_id: PostId,
    /// Numeric source id, as reported at runtime.
    pub channel_id: ChannelId,
    /// `@username` form of the source, when the channel is public.
    pub channel_alias: Option<ChannelId>,
    pub content: PostContent,
}

impl InboundPost {
    pub fn alias(&self) -> Option<&str> {
        self.channel_alias.as_ref().map(|a| a.0.as_str())
    }
}

/// Media kinds the normalizer knows how to tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
}

impl MediaKind {
    /// Voice notes and stickers never carry a caption on either platform.
    pub fn carries_caption(self) -> bool {
        !matches!(self, MediaKind::Voice | MediaKind::Sticker)
    }
}

/// Heterogeneous inbound payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostContent {
    Text(String),
    Media {
        kind: MediaKind,
        caption: Option<String>,
    },
    /// Anything the front end did not recognize (polls, locations, ...),
    /// possibly with a caption attached.
    Other { caption: Option<String> },
}

/// Outbound lifecycle events raised by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    PairingChallenge(String),
    Authenticated,
    Ready,
    Disconnected(String),
}
