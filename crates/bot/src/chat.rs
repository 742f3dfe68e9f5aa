//! The structured chat record published on `chat.inbound`, common to both
//! transports.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    IrcLike,
    EventSubChat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Roles {
    pub broadcaster: bool,
    pub moderator: bool,
    pub vip: bool,
    pub subscriber: bool,
}

#[derive(Debug, Clone)]
pub struct ChatRecord {
    pub channel: String,
    pub sender_id: String,
    pub sender_login: String,
    pub text: String,
    pub roles: Roles,
    pub transport: TransportKind,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: String,
    pub text: String,
}
