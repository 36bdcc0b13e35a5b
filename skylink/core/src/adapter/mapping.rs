//! Mapping Table
//!
//! Declarative, bidirectional link between frame type bytes and message
//! types. Built once from configuration, validated as a whole, then shared
//! read-only by every adapter of a listener.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{MessageRegistry, MessageType};

/// One configured mapping, as read from the config file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Name used in errors and logs
    pub name: String,
    /// Frame type byte, 1..=255
    pub tag: Option<i64>,
    /// Registered message type name
    pub class_name: Option<String>,
    /// Whether bus messages of this type are forwarded onto the link
    pub advertise: bool,
}

impl MappingConfig {
    /// Fully specified mapping
    #[must_use]
    pub fn new(name: impl Into<String>, tag: i64, class_name: impl Into<String>, advertise: bool) -> Self {
        Self {
            name: name.into(),
            tag: Some(tag),
            class_name: Some(class_name.into()),
            advertise,
        }
    }
}

/// Validation errors, each naming the offending mapping
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// No mappings configured
    #[error("no mappings configured")]
    Empty,

    /// Mapping without a tag
    #[error("mapping '{mapping}': tag not configured")]
    MissingTag {
        /// Mapping name
        mapping: String,
    },

    /// Tag is zero or negative
    #[error("mapping '{mapping}' has not been assigned a tag > 0 (got {tag})")]
    NonPositiveTag {
        /// Mapping name
        mapping: String,
        /// Configured tag
        tag: i64,
    },

    /// Tag does not fit the type byte
    #[error("mapping '{mapping}' has tag {tag}, which does not fit in one byte")]
    TagOutOfRange {
        /// Mapping name
        mapping: String,
        /// Configured tag
        tag: i64,
    },

    /// Mapping without a class name
    #[error("mapping '{mapping}': class name not configured")]
    MissingClassName {
        /// Mapping name
        mapping: String,
    },

    /// Class name unknown to the registry
    #[error("mapping '{mapping}': class {class} is not registered")]
    UnknownClass {
        /// Mapping name
        mapping: String,
        /// Configured class name
        class: String,
    },

    /// Class is registered but outside the message tree
    #[error("mapping '{mapping}': class {class} is no derivative of Message")]
    NotAMessage {
        /// Mapping name
        mapping: String,
        /// Configured class name
        class: String,
    },

    /// Class is a family without a wire encoding
    #[error("mapping '{mapping}': class {class} is a message family and cannot be mapped")]
    AbstractClass {
        /// Mapping name
        mapping: String,
        /// Configured class name
        class: String,
    },

    /// Two mappings share a name
    #[error("mapping name '{mapping}' is used more than once")]
    DuplicateName {
        /// Mapping name
        mapping: String,
    },

    /// Two mappings share a tag
    #[error("mapping '{mapping}' reuses tag {tag} of mapping '{existing}'")]
    DuplicateTag {
        /// Mapping name
        mapping: String,
        /// Shared tag
        tag: u8,
        /// Mapping that claimed the tag first
        existing: String,
    },

    /// Two mappings share a class
    #[error("mapping '{mapping}' reuses class {class} of mapping '{existing}'")]
    DuplicateClass {
        /// Mapping name
        mapping: String,
        /// Shared class name
        class: String,
        /// Mapping that claimed the class first
        existing: String,
    },
}

/// One validated mapping
#[derive(Clone, Debug)]
pub struct MappingEntry {
    name: String,
    tag: u8,
    message_type: &'static MessageType,
    advertise: bool,
}

impl MappingEntry {
    /// Mapping name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frame type byte
    #[must_use]
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Mapped message type
    #[must_use]
    pub fn message_type(&self) -> &'static MessageType {
        self.message_type
    }

    /// Whether bus messages of this type go onto the link
    #[must_use]
    pub fn advertise(&self) -> bool {
        self.advertise
    }
}

/// Validated tag ↔ message type table
#[derive(Debug)]
pub struct MappingTable {
    entries: Vec<MappingEntry>,
    by_tag: HashMap<u8, usize>,
    by_type: HashMap<&'static str, usize>,
}

impl MappingTable {
    /// Validate `mappings` against `registry` and build the table
    ///
    /// # Errors
    ///
    /// Returns the first [`MappingError`] found; nothing is built on error.
    pub fn build(mappings: &[MappingConfig], registry: &MessageRegistry) -> Result<Self, MappingError> {
        if mappings.is_empty() {
            return Err(MappingError::Empty);
        }

        let mut entries: Vec<MappingEntry> = Vec::with_capacity(mappings.len());
        let mut by_tag = HashMap::new();
        let mut by_type = HashMap::new();

        for (index, config) in mappings.iter().enumerate() {
            let mapping = if config.name.is_empty() {
                format!("#{}", index + 1)
            } else {
                config.name.clone()
            };

            if entries.iter().any(|e| e.name == mapping) {
                return Err(MappingError::DuplicateName { mapping });
            }

            let tag = validate_tag(&mapping, config.tag)?;
            let message_type = resolve_class(&mapping, config.class_name.as_deref(), registry)?;

            if let Some(&existing) = by_tag.get(&tag) {
                let existing: &MappingEntry = &entries[existing];
                return Err(MappingError::DuplicateTag {
                    mapping,
                    tag,
                    existing: existing.name.clone(),
                });
            }
            if let Some(&existing) = by_type.get(message_type.name) {
                let existing: &MappingEntry = &entries[existing];
                return Err(MappingError::DuplicateClass {
                    mapping,
                    class: message_type.name.to_string(),
                    existing: existing.name.clone(),
                });
            }

            by_tag.insert(tag, entries.len());
            by_type.insert(message_type.name, entries.len());
            entries.push(MappingEntry {
                name: mapping,
                tag,
                message_type,
                advertise: config.advertise,
            });
        }

        tracing::debug!(mappings = entries.len(), "Built mapping table");
        Ok(Self {
            entries,
            by_tag,
            by_type,
        })
    }

    /// Mapping for a frame type byte
    #[must_use]
    pub fn by_tag(&self, tag: u8) -> Option<&MappingEntry> {
        self.by_tag.get(&tag).map(|&i| &self.entries[i])
    }

    /// Mapping for an exact message type
    #[must_use]
    pub fn by_type(&self, message_type: &MessageType) -> Option<&MappingEntry> {
        self.by_type.get(message_type.name).map(|&i| &self.entries[i])
    }

    /// All mappings in configuration order
    #[must_use]
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Mappings forwarded from the bus onto the link
    pub fn advertised(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.iter().filter(|e| e.advertise)
    }

    /// Number of mappings
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false` for a built table
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_tag(mapping: &str, tag: Option<i64>) -> Result<u8, MappingError> {
    let tag = tag.ok_or_else(|| MappingError::MissingTag {
        mapping: mapping.to_string(),
    })?;
    if tag <= 0 {
        return Err(MappingError::NonPositiveTag {
            mapping: mapping.to_string(),
            tag,
        });
    }
    u8::try_from(tag).map_err(|_| MappingError::TagOutOfRange {
        mapping: mapping.to_string(),
        tag,
    })
}

fn resolve_class(
    mapping: &str,
    class_name: Option<&str>,
    registry: &MessageRegistry,
) -> Result<&'static MessageType, MappingError> {
    let class = match class_name {
        Some(name) if !name.trim().is_empty() => name.trim(),
        _ => {
            return Err(MappingError::MissingClassName {
                mapping: mapping.to_string(),
            })
        }
    };

    let message_type = registry.get(class).ok_or_else(|| MappingError::UnknownClass {
        mapping: mapping.to_string(),
        class: class.to_string(),
    })?;
    if !message_type.is_message() {
        return Err(MappingError::NotAMessage {
            mapping: mapping.to_string(),
            class: class.to_string(),
        });
    }
    if message_type.is_abstract() {
        return Err(MappingError::AbstractClass {
            mapping: mapping.to_string(),
            class: class.to_string(),
        });
    }
    Ok(message_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{COMMAND_DATA, MOTOR_SIGNALS};
    use pretty_assertions::assert_eq;

    static WAYPOINT: MessageType = MessageType {
        name: "Waypoint",
        parents: &[],
        decoder: None,
    };

    fn build(mappings: &[MappingConfig]) -> Result<MappingTable, MappingError> {
        let mut registry = MessageRegistry::builtin();
        registry.register(&WAYPOINT);
        MappingTable::build(mappings, &registry)
    }

    fn command(tag: i64) -> MappingConfig {
        MappingConfig::new("command", tag, "CommandData", true)
    }

    #[test]
    fn test_bidirectional_lookup() {
        let table = build(&[
            command(13),
            MappingConfig::new("motors", 7, "MotorSignals", false),
        ])
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.by_tag(13).unwrap().message_type(), &COMMAND_DATA);
        assert_eq!(table.by_type(&MOTOR_SIGNALS).unwrap().tag(), 7);
        assert!(table.by_tag(99).is_none());
        let advertised: Vec<_> = table.advertised().map(MappingEntry::name).collect();
        assert_eq!(advertised, vec!["command"]);
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(build(&[]).unwrap_err(), MappingError::Empty);
    }

    #[test]
    fn test_tag_validation() {
        let mut missing = command(1);
        missing.tag = None;
        assert_eq!(
            build(&[missing]).unwrap_err(),
            MappingError::MissingTag {
                mapping: "command".into()
            }
        );
        assert_eq!(
            build(&[command(0)]).unwrap_err(),
            MappingError::NonPositiveTag {
                mapping: "command".into(),
                tag: 0
            }
        );
        assert_eq!(
            build(&[command(-4)]).unwrap_err(),
            MappingError::NonPositiveTag {
                mapping: "command".into(),
                tag: -4
            }
        );
        assert_eq!(
            build(&[command(256)]).unwrap_err(),
            MappingError::TagOutOfRange {
                mapping: "command".into(),
                tag: 256
            }
        );
        assert!(build(&[command(255)]).is_ok());
    }

    #[test]
    fn test_class_validation() {
        let mut missing = command(1);
        missing.class_name = Some("  ".into());
        assert_eq!(
            build(&[missing]).unwrap_err(),
            MappingError::MissingClassName {
                mapping: "command".into()
            }
        );
        assert_eq!(
            build(&[MappingConfig::new("gps", 2, "GpsPosition", false)]).unwrap_err(),
            MappingError::UnknownClass {
                mapping: "gps".into(),
                class: "GpsPosition".into()
            }
        );
        assert_eq!(
            build(&[MappingConfig::new("waypoint", 2, "Waypoint", false)]).unwrap_err(),
            MappingError::NotAMessage {
                mapping: "waypoint".into(),
                class: "Waypoint".into()
            }
        );
        assert_eq!(
            build(&[MappingConfig::new("gains", 2, "ControllerParameters", false)]).unwrap_err(),
            MappingError::AbstractClass {
                mapping: "gains".into(),
                class: "ControllerParameters".into()
            }
        );
    }

    #[test]
    fn test_duplicates_rejected() {
        assert_eq!(
            build(&[command(1), MappingConfig::new("command", 2, "MotorSignals", false)])
                .unwrap_err(),
            MappingError::DuplicateName {
                mapping: "command".into()
            }
        );
        assert_eq!(
            build(&[command(1), MappingConfig::new("motors", 1, "MotorSignals", false)])
                .unwrap_err(),
            MappingError::DuplicateTag {
                mapping: "motors".into(),
                tag: 1,
                existing: "command".into()
            }
        );
        assert_eq!(
            build(&[command(1), MappingConfig::new("again", 2, "CommandData", false)])
                .unwrap_err(),
            MappingError::DuplicateClass {
                mapping: "again".into(),
                class: "CommandData".into(),
                existing: "command".into()
            }
        );
    }

    #[test]
    fn test_unnamed_mappings_get_positional_names() {
        let unnamed = MappingConfig {
            tag: Some(0),
            class_name: Some("CommandData".into()),
            ..MappingConfig::default()
        };
        assert_eq!(
            build(&[command(1), unnamed]).unwrap_err(),
            MappingError::NonPositiveTag {
                mapping: "#2".into(),
                tag: 0
            }
        );
    }

    #[test]
    fn test_parse_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            mappings: Vec<MappingConfig>,
        }
        let doc: Doc = toml::from_str(
            r#"
            [[mappings]]
            name = "command"
            tag = 13
            class_name = "CommandData"
            advertise = true
            "#,
        )
        .unwrap();
        assert_eq!(doc.mappings, vec![command(13)]);
    }
}
