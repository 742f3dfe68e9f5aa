//! Hub<->Bot transport: the line-delimited JSON wire protocol plus the
//! in-process publish/subscribe bus used inside a bot process.

pub mod bus;
pub mod error;
pub mod framing;
pub mod protocol;

pub use bus::{Bus, Subscription};
pub use error::IpcError;
pub use framing::{read_frame, write_frame};
pub use protocol::{BotFrame, HubFrame, MAX_FRAME_LEN};
