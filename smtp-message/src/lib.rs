mod command;
mod data;
mod misc;
mod parameters;
mod reply;
pub mod xtext;

pub use command::{Command, CommandParseError};
pub use data::{EscapedDataReader, EscapingDataWriter};
pub use misc::{next_crlf, Email, Hostname, Localpart, MaybeUtf8, NextCrLfState, Utf8Classification};
pub use parameters::{parse_parameters, BodyType, Parameters};
pub use reply::{
    EnhancedReplyCode, EnhancedReplyCodeSubject, Reply, ReplyCode, ReplyLine, ReplyParseError,
};
