//! Autopilot command strings
//!
//! The ground console drives the autopilot with comma separated text such as
//! `CMD,AUTOPILOT START,course.txt`. Fields are trimmed of surrounding spaces.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::message::{Message, MessageError, MessageType, ANY_MESSAGE};

/// Text command for the autopilot
pub static PILOT_DATA: MessageType = MessageType {
    name: "PilotData",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_pilot_data),
};

const PREFIX: &str = "CMD";
const START: &str = "AUTOPILOT START";
const STOP: &str = "AUTOPILOT STOP";
const SEND_COURSE_FILE_NAMES: &str = "AUTOPILOT SEND SET COURSE FILE NAMES";
const RESPONSE: &str = "AUTOPILOT RESPONSE";
const FILE_NAME: &str = "AUTOPILOT FILE NAME";

/// Parsed autopilot command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PilotCommand {
    /// Fly the named course
    Start(String),
    /// Stop flying the current course
    Stop,
    /// Ask for the list of available course files
    SendCourseFileNames,
    /// Free-form reply from the autopilot
    Response(String),
    /// One entry of the course file list
    FileName(String),
    /// Anything else
    Unknown,
}

impl PilotCommand {
    fn encode(&self) -> String {
        match self {
            Self::Start(course) => format!("{PREFIX},{START},{course}"),
            Self::Stop => format!("{PREFIX},{STOP}"),
            Self::SendCourseFileNames => format!("{PREFIX},{SEND_COURSE_FILE_NAMES}"),
            Self::Response(text) => format!("{PREFIX},{RESPONSE},{text}"),
            Self::FileName(name) => format!("{PREFIX},{FILE_NAME},{name}"),
            Self::Unknown => String::new(),
        }
    }

    fn parse(text: &str) -> Self {
        let fields: Vec<&str> = text.split(',').map(|field| field.trim_matches(' ')).collect();
        if fields.first() != Some(&PREFIX) {
            return Self::Unknown;
        }
        let parameter = fields.get(2).map(|p| (*p).to_string());

        match (fields.get(1).copied(), parameter) {
            (Some(START), Some(course)) if fields.len() == 3 => Self::Start(course),
            (Some(STOP), _) => Self::Stop,
            (Some(SEND_COURSE_FILE_NAMES), _) => Self::SendCourseFileNames,
            (Some(RESPONSE), Some(text)) => Self::Response(text),
            (Some(FILE_NAME), Some(name)) => Self::FileName(name),
            _ => Self::Unknown,
        }
    }
}

/// Raw autopilot command text
///
/// The payload is kept byte for byte; [`PilotData::command`] interprets it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PilotData {
    data: Vec<u8>,
}

impl PilotData {
    /// Wrap arbitrary command text
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            data: text.into().into_bytes(),
        }
    }

    /// Encode a known command
    #[must_use]
    pub fn from_command(command: &PilotCommand) -> Self {
        Self::new(command.encode())
    }

    /// Wrap a received payload; every byte sequence is accepted
    #[must_use]
    pub fn from_bytes(payload: &[u8]) -> Self {
        Self {
            data: payload.to_vec(),
        }
    }

    /// Payload as text, invalid UTF-8 replaced
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Interpret the text as an autopilot command
    #[must_use]
    pub fn command(&self) -> PilotCommand {
        PilotCommand::parse(&self.text())
    }
}

impl Message for PilotData {
    fn message_type(&self) -> &'static MessageType {
        &PILOT_DATA
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for PilotData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PilotData: '{}'", self.text())
    }
}

#[allow(clippy::unnecessary_wraps)]
fn decode_pilot_data(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(PilotData::from_bytes(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_start_command_with_course() {
        let data = PilotData::new("CMD, AUTOPILOT START ,  figure-eight.crs");
        assert_eq!(
            data.command(),
            PilotCommand::Start("figure-eight.crs".to_string())
        );
    }

    #[test]
    fn test_start_needs_exactly_one_parameter() {
        assert_eq!(
            PilotData::new("CMD,AUTOPILOT START").command(),
            PilotCommand::Unknown
        );
        assert_eq!(
            PilotData::new("CMD,AUTOPILOT START,a,b").command(),
            PilotCommand::Unknown
        );
    }

    #[test]
    fn test_commands_without_parameters() {
        assert_eq!(PilotData::new("CMD,AUTOPILOT STOP").command(), PilotCommand::Stop);
        assert_eq!(
            PilotData::new("CMD,AUTOPILOT SEND SET COURSE FILE NAMES").command(),
            PilotCommand::SendCourseFileNames
        );
    }

    #[test]
    fn test_unknown_text() {
        assert_eq!(PilotData::new("").command(), PilotCommand::Unknown);
        assert_eq!(
            PilotData::new("NOP,AUTOPILOT STOP").command(),
            PilotCommand::Unknown
        );
        assert_eq!(
            PilotData::new("CMD,AUTOPILOT RESPONSE").command(),
            PilotCommand::Unknown
        );
    }

    #[test]
    fn test_encoded_commands_parse_back() {
        for command in [
            PilotCommand::Start("square.crs".to_string()),
            PilotCommand::Stop,
            PilotCommand::SendCourseFileNames,
            PilotCommand::Response("course loaded".to_string()),
            PilotCommand::FileName("square.crs".to_string()),
        ] {
            let data = PilotData::from_command(&command);
            let decoded = PILOT_DATA.decode(&data.to_bytes()).unwrap();
            assert_eq!(
                decoded.downcast_ref::<PilotData>().map(PilotData::command),
                Some(command)
            );
        }
    }

    #[test]
    fn test_display_shows_raw_text() {
        assert_eq!(
            PilotData::new("CMD,AUTOPILOT STOP").to_string(),
            "PilotData: 'CMD,AUTOPILOT STOP'"
        );
    }
}
