//! Generic WebSocket protocol implementation: framing and message reassembly.

pub mod frame;
mod message;

pub use self::{
    frame::{coding::CloseCode, CloseFrame},
    message::{IncompleteMessage, IncompleteMessageType, Message},
};
