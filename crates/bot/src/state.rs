use fleet_ipc::Bus;

use crate::chat::{ChatRecord, OutboundMessage};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    ChatInbound,
    ChatOutbound,
    SystemEvent,
    CommandExecuted,
    MetricsUpdate,
}

#[derive(Debug, Clone)]
pub enum BusMessage {
    Chat(ChatRecord),
    Outbound(OutboundMessage),
    Event { topic: String, data: serde_json::Value },
    CommandExecuted { name: String, success: bool },
    Metric { name: String, value: f64 },
}

pub type BotBus = Bus<Topic, BusMessage>;
