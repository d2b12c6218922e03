// src/core/protocol/parser.rs

//! Implements the resumable client protocol parser.
//!
//! The parser consumes arbitrarily sized chunks of bytes as they arrive from the
//! socket and drives a byte-level state machine over the command grammar. When a
//! command is complete it invokes exactly one callback on a `CommandHandler` and
//! returns to `OP_START`. State survives between calls, so a command (or a PUB
//! payload) may be split across any number of reads.

use crate::core::SpinelMQError;
use bytes::Bytes;
use std::borrow::Cow;
use strum_macros::Display;
use thiserror::Error;

/// Default upper bound for a single command line, excluding any payload.
pub const DEFAULT_MAX_CONTROL_LINE: usize = 4096;
/// Default upper bound for a PUB payload.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

const CRLF_LEN: usize = 2;

/// Every state of the client protocol state machine.
///
/// The `OP_*` states spell out the command keywords one byte at a time; the
/// `*_ARG` states collect a command's argument line; `MSG_*` states consume a
/// PUB payload and its terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ParserState {
    OpStart,
    OpC,
    OpCo,
    OpCon,
    OpConn,
    OpConne,
    OpConnec,
    OpConnect,
    OpConnectSpc,
    ConnectArg,
    OpP,
    OpPi,
    OpPin,
    OpPing,
    OpPo,
    OpPon,
    OpPong,
    OpPu,
    OpPub,
    OpPubSpc,
    PubArg,
    MsgPayload,
    MsgEndR,
    MsgEndN,
    OpS,
    OpSu,
    OpSub,
    OpSubSpc,
    SubArg,
}

impl ParserState {
    /// True for the states that collect a command's argument line.
    fn is_arg(self) -> bool {
        matches!(
            self,
            ParserState::ConnectArg | ParserState::PubArg | ParserState::SubArg
        )
    }
}

/// The category of a `ParseError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ParseErrorCode {
    /// A byte did not fit the grammar at the current state.
    Parsing,
    /// A complete argument line had the wrong shape.
    InvalidArguments,
    /// An argument line grew beyond the configured maximum.
    MaxControlLine,
    /// A PUB declared a payload larger than the configured maximum.
    MaxPayload,
}

impl ParseErrorCode {
    /// The message sent to the client in the `-ERR` frame for this code.
    pub fn wire_message(self) -> &'static str {
        match self {
            ParseErrorCode::Parsing => "Unknown Protocol Operation",
            ParseErrorCode::InvalidArguments => "Invalid Protocol Arguments",
            ParseErrorCode::MaxControlLine => "Maximum Control Line Exceeded",
            ParseErrorCode::MaxPayload => "Maximum Payload Violation",
        }
    }
}

/// Raised when the inbound byte stream cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("code: {code}; last state: {state}; message: {message}")]
pub struct ParseError {
    pub code: ParseErrorCode,
    /// The state the parser was in when the offending byte arrived.
    pub state: ParserState,
    pub message: String,
}

/// The parsed argument line of a PUB command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishArgs {
    pub subject: Bytes,
    pub reply_to: Option<Bytes>,
    /// The number of payload bytes that follow the argument line.
    pub size: usize,
}

/// The parsed argument line of a SUB command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeArgs {
    pub subject: Bytes,
    pub queue_group: Option<Bytes>,
    pub sid: Bytes,
}

/// Receives one callback per completed command.
///
/// An error returned from a callback aborts the current `Parser::parse` call and
/// is handed back to its caller.
pub trait CommandHandler {
    fn process_connect(&mut self, arg: &[u8]) -> Result<(), SpinelMQError>;
    fn process_ping(&mut self) -> Result<(), SpinelMQError>;
    fn process_pong(&mut self) -> Result<(), SpinelMQError>;
    fn process_subscribe(&mut self, args: SubscribeArgs) -> Result<(), SpinelMQError>;
    fn process_publish(&mut self, args: PublishArgs, payload: Bytes)
    -> Result<(), SpinelMQError>;
}

/// The incremental protocol parser for a single connection.
#[derive(Debug)]
pub struct Parser {
    state: ParserState,
    /// Offset into the current chunk where the argument line starts.
    arg_start: usize,
    /// Number of trailing bytes (a `\r`) to strip from the argument line.
    drop: usize,
    /// Argument bytes carried over from previous chunks.
    arg_buf: Option<Vec<u8>>,
    /// Payload bytes carried over from previous chunks.
    msg_buf: Option<Vec<u8>>,
    /// Offset of the payload in the current chunk when it is parsed without a copy.
    payload_start: usize,
    pending_publish: Option<PublishArgs>,
    max_control_line: usize,
    max_payload: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTROL_LINE, DEFAULT_MAX_PAYLOAD)
    }
}

impl Parser {
    pub fn new(max_control_line: usize, max_payload: usize) -> Self {
        Self {
            state: ParserState::OpStart,
            arg_start: 0,
            drop: 0,
            arg_buf: None,
            msg_buf: None,
            payload_start: 0,
            pending_publish: None,
            max_control_line,
            max_payload,
        }
    }

    /// The current state of the machine.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Bytes currently reserved for an argument line or payload that spans
    /// reads.
    pub fn buffered_capacity(&self) -> usize {
        self.arg_buf.as_ref().map_or(0, Vec::capacity)
            + self.msg_buf.as_ref().map_or(0, Vec::capacity)
    }

    /// Returns the parser to `OP_START`, discarding any partial command.
    pub fn reset(&mut self) {
        self.state = ParserState::OpStart;
        self.arg_start = 0;
        self.drop = 0;
        self.arg_buf = None;
        self.msg_buf = None;
        self.payload_start = 0;
        self.pending_publish = None;
    }

    /// Feeds one chunk of bytes through the state machine.
    ///
    /// On error the parser has already been reset; any bytes of `chunk` after the
    /// failure point are not consumed.
    pub fn parse<H>(&mut self, chunk: &[u8], handler: &mut H) -> Result<(), SpinelMQError>
    where
        H: CommandHandler + ?Sized,
    {
        let result = self.parse_chunk(chunk, handler);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn parse_chunk<H>(&mut self, chunk: &[u8], handler: &mut H) -> Result<(), SpinelMQError>
    where
        H: CommandHandler + ?Sized,
    {
        // An argument line continued from a previous chunk starts at the front.
        self.arg_start = 0;

        let mut i = 0;
        while i < chunk.len() {
            let b = chunk[i];
            match self.state {
                ParserState::OpStart => match b.to_ascii_uppercase() {
                    b'C' => self.state = ParserState::OpC,
                    b'P' => self.state = ParserState::OpP,
                    b'S' => self.state = ParserState::OpS,
                    _ => return Err(self.fail(ParseErrorCode::Parsing, "unknown operation")),
                },

                // --- CONNECT ---
                ParserState::OpC => self.expect(b, b'O', ParserState::OpCo)?,
                ParserState::OpCo => self.expect(b, b'N', ParserState::OpCon)?,
                ParserState::OpCon => self.expect(b, b'N', ParserState::OpConn)?,
                ParserState::OpConn => self.expect(b, b'E', ParserState::OpConne)?,
                ParserState::OpConne => self.expect(b, b'C', ParserState::OpConnec)?,
                ParserState::OpConnec => self.expect(b, b'T', ParserState::OpConnect)?,
                ParserState::OpConnect => self.expect_space(b, ParserState::OpConnectSpc)?,
                ParserState::OpConnectSpc => {
                    if !is_space(b) {
                        self.begin_arg(ParserState::ConnectArg, i);
                        continue;
                    }
                }

                // --- PING / PONG / PUB ---
                ParserState::OpP => match b.to_ascii_uppercase() {
                    b'I' => self.state = ParserState::OpPi,
                    b'O' => self.state = ParserState::OpPo,
                    b'U' => self.state = ParserState::OpPu,
                    _ => return Err(self.fail(ParseErrorCode::Parsing, "unknown operation")),
                },
                ParserState::OpPi => self.expect(b, b'N', ParserState::OpPin)?,
                ParserState::OpPin => self.expect(b, b'G', ParserState::OpPing)?,
                ParserState::OpPing => {
                    if b == b'\n' {
                        self.reset();
                        handler.process_ping()?;
                    }
                }
                ParserState::OpPo => self.expect(b, b'N', ParserState::OpPon)?,
                ParserState::OpPon => self.expect(b, b'G', ParserState::OpPong)?,
                ParserState::OpPong => {
                    if b == b'\n' {
                        self.reset();
                        handler.process_pong()?;
                    }
                }
                ParserState::OpPu => self.expect(b, b'B', ParserState::OpPub)?,
                ParserState::OpPub => self.expect_space(b, ParserState::OpPubSpc)?,
                ParserState::OpPubSpc => {
                    if !is_space(b) {
                        self.begin_arg(ParserState::PubArg, i);
                        continue;
                    }
                }

                // --- SUB ---
                ParserState::OpS => self.expect(b, b'U', ParserState::OpSu)?,
                ParserState::OpSu => self.expect(b, b'B', ParserState::OpSub)?,
                ParserState::OpSub => self.expect_space(b, ParserState::OpSubSpc)?,
                ParserState::OpSubSpc => {
                    if !is_space(b) {
                        self.begin_arg(ParserState::SubArg, i);
                        continue;
                    }
                }

                // --- Argument lines ---
                ParserState::ConnectArg | ParserState::SubArg | ParserState::PubArg => match b {
                    b'\r' => self.drop = 1,
                    b'\n' => {
                        let state = self.state;
                        let arg = self.take_arg(chunk, i);
                        if arg.len() > self.max_control_line {
                            return Err(self.fail(
                                ParseErrorCode::MaxControlLine,
                                "argument line too long",
                            ));
                        }
                        match state {
                            ParserState::ConnectArg => {
                                self.reset();
                                handler.process_connect(&arg)?;
                            }
                            ParserState::SubArg => {
                                let args = self.parse_subscribe_args(&arg)?;
                                self.reset();
                                handler.process_subscribe(args)?;
                            }
                            _ => {
                                let args = self.parse_publish_args(&arg)?;
                                i = self.begin_payload(args, chunk.len(), i + 1);
                                continue;
                            }
                        }
                    }
                    _ => self.drop = 0,
                },

                // --- PUB payload ---
                ParserState::MsgPayload => {
                    let size = self.pending_size();
                    let buf = self.msg_buf.get_or_insert_with(Vec::new);
                    let take = (size - buf.len()).min(chunk.len() - i);
                    buf.extend_from_slice(&chunk[i..i + take]);
                    i += take;
                    if buf.len() == size {
                        self.state = ParserState::MsgEndR;
                    }
                    continue;
                }
                ParserState::MsgEndR => {
                    if b != b'\r' {
                        return Err(
                            self.fail(ParseErrorCode::Parsing, "expected CR after payload")
                        );
                    }
                    self.state = ParserState::MsgEndN;
                }
                ParserState::MsgEndN => {
                    if b != b'\n' {
                        return Err(
                            self.fail(ParseErrorCode::Parsing, "expected LF after payload")
                        );
                    }
                    let Some(args) = self.pending_publish.take() else {
                        return Err(self.fail(ParseErrorCode::Parsing, "payload without PUB"));
                    };
                    let payload = match self.msg_buf.take() {
                        Some(buf) => Bytes::from(buf),
                        None => Bytes::copy_from_slice(
                            &chunk[self.payload_start..self.payload_start + args.size],
                        ),
                    };
                    self.reset();
                    handler.process_publish(args, payload)?;
                }
            }
            i += 1;
        }

        // The chunk ended in the middle of an argument line: keep what we have
        // so the next call can resume from an empty chunk-local view.
        if self.state.is_arg() {
            let buf = self.arg_buf.get_or_insert_with(Vec::new);
            buf.extend_from_slice(&chunk[self.arg_start..]);
            if buf.len() > self.max_control_line {
                return Err(self.fail(ParseErrorCode::MaxControlLine, "argument line too long"));
            }
        }
        Ok(())
    }

    /// Matches one keyword byte, case-insensitively.
    fn expect(&mut self, b: u8, expected: u8, next: ParserState) -> Result<(), ParseError> {
        if b.to_ascii_uppercase() == expected {
            self.state = next;
            Ok(())
        } else {
            Err(self.error(ParseErrorCode::Parsing, "unexpected byte in operation"))
        }
    }

    /// Matches the separator between a keyword and its arguments.
    fn expect_space(&mut self, b: u8, next: ParserState) -> Result<(), ParseError> {
        if is_space(b) {
            self.state = next;
            Ok(())
        } else {
            Err(self.error(ParseErrorCode::Parsing, "expected whitespace after operation"))
        }
    }

    fn begin_arg(&mut self, state: ParserState, start: usize) {
        self.state = state;
        self.arg_start = start;
        self.drop = 0;
    }

    /// Extracts the finished argument line ending just before `end`, without the
    /// trailing `\r`.
    fn take_arg<'a>(&mut self, chunk: &'a [u8], end: usize) -> Cow<'a, [u8]> {
        let drop = self.drop;
        match self.arg_buf.take() {
            Some(mut buf) => {
                buf.extend_from_slice(&chunk[self.arg_start..end]);
                let keep = buf.len().saturating_sub(drop);
                buf.truncate(keep);
                Cow::Owned(buf)
            }
            None => {
                let stop = end.saturating_sub(drop).max(self.arg_start);
                Cow::Borrowed(&chunk[self.arg_start..stop])
            }
        }
    }

    /// Switches to payload collection after a PUB line and returns the index at
    /// which parsing continues.
    fn begin_payload(&mut self, args: PublishArgs, chunk_len: usize, start: usize) -> usize {
        let size = args.size;
        self.pending_publish = Some(args);
        self.arg_buf = None;
        self.drop = 0;

        if start + size + CRLF_LEN <= chunk_len {
            // Payload and terminator are already here: jump to the terminator.
            self.payload_start = start;
            self.msg_buf = None;
            self.state = ParserState::MsgEndR;
            start + size
        } else {
            // Reserve only what has arrived; the buffer grows with the payload.
            self.msg_buf = Some(Vec::with_capacity(size.min(chunk_len - start)));
            self.state = ParserState::MsgPayload;
            start
        }
    }

    fn pending_size(&self) -> usize {
        self.pending_publish.as_ref().map_or(0, |args| args.size)
    }

    fn parse_subscribe_args(&self, arg: &[u8]) -> Result<SubscribeArgs, ParseError> {
        match split_args(arg).as_slice() {
            [subject, sid] => Ok(SubscribeArgs {
                subject: Bytes::copy_from_slice(subject),
                queue_group: None,
                sid: Bytes::copy_from_slice(sid),
            }),
            [subject, queue, sid] => Ok(SubscribeArgs {
                subject: Bytes::copy_from_slice(subject),
                queue_group: Some(Bytes::copy_from_slice(queue)),
                sid: Bytes::copy_from_slice(sid),
            }),
            _ => Err(self.error(
                ParseErrorCode::InvalidArguments,
                "wrong number of arguments for SUB",
            )),
        }
    }

    fn parse_publish_args(&self, arg: &[u8]) -> Result<PublishArgs, ParseError> {
        let (subject, reply_to, size) = match split_args(arg).as_slice() {
            [subject, size] => (*subject, None, *size),
            [subject, reply_to, size] => (*subject, Some(*reply_to), *size),
            _ => {
                return Err(self.error(
                    ParseErrorCode::InvalidArguments,
                    "wrong number of arguments for PUB",
                ));
            }
        };

        let Some(size) = parse_size(size) else {
            return Err(self.error(
                ParseErrorCode::InvalidArguments,
                format!("invalid payload size '{}'", String::from_utf8_lossy(size)),
            ));
        };
        if size > self.max_payload {
            return Err(self.error(
                ParseErrorCode::MaxPayload,
                format!("payload of {size} bytes exceeds {}", self.max_payload),
            ));
        }

        Ok(PublishArgs {
            subject: Bytes::copy_from_slice(subject),
            reply_to: reply_to.map(Bytes::copy_from_slice),
            size,
        })
    }

    /// `error` converted for the `parse` call chain.
    fn fail(&self, code: ParseErrorCode, message: impl Into<String>) -> SpinelMQError {
        self.error(code, message).into()
    }

    fn error(&self, code: ParseErrorCode, message: impl Into<String>) -> ParseError {
        ParseError {
            code,
            state: self.state,
            message: message.into(),
        }
    }
}

fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Splits an argument line on runs of whitespace.
fn split_args(arg: &[u8]) -> Vec<&[u8]> {
    arg.split(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .filter(|token| !token.is_empty())
        .collect()
}

/// Parses a non-negative decimal integer, rejecting signs and overflow.
fn parse_size(token: &[u8]) -> Option<usize> {
    if token.is_empty() {
        return None;
    }
    token.iter().try_fold(0usize, |acc, &b| {
        if b.is_ascii_digit() {
            acc.checked_mul(10)?.checked_add(usize::from(b - b'0'))
        } else {
            None
        }
    })
}
