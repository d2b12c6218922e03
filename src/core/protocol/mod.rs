// src/core/protocol/mod.rs

pub mod connect;
pub mod frame;
pub mod info;
pub mod parser;

pub use connect::{ConnectOptions, SubjectPermissions};
pub use frame::{Message, ServerFrame, ServerFrameCodec};
pub use info::{PROTOCOL_VERSION, ServerInfo};
pub use parser::{
    CommandHandler, ParseError, ParseErrorCode, Parser, ParserState, PublishArgs, SubscribeArgs,
};
