//! Target class abstraction.
//!
//! The receiving node's flash and RAM class decides the stored image
//! layout and the maximum image it accepts. Rather than baking the choice
//! in at compile time, the receiver is constructed with a [`TargetClass`]
//! whose [`ImageLayout`] carries the differences as data.

use std::fmt;

/// Supported target node classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TargetClass {
    /// Small nodes: 16-bit image length, 31 KiB ceiling.
    #[default]
    Standard,
    /// Mega-class nodes: 16-bit image length, 64 KiB ceiling.
    Mega,
    /// Larger-RAM nodes: 24-bit image length, 248 KiB ceiling.
    LargeRam,
}

impl TargetClass {
    /// Stored image layout for this class.
    #[must_use]
    pub fn layout(self) -> ImageLayout {
        match self {
            Self::Standard => ImageLayout {
                len_field_bytes: 2,
                separator_offset: 9,
                payload_offset: 10,
                max_payload: 31_744,
            },
            Self::Mega => ImageLayout {
                len_field_bytes: 2,
                separator_offset: 9,
                payload_offset: 10,
                max_payload: 65_526,
            },
            Self::LargeRam => ImageLayout {
                len_field_bytes: 3,
                separator_offset: 10,
                payload_offset: 11,
                max_payload: 253_952,
            },
        }
    }

    /// Reason string carried by the negative acknowledgment when an image
    /// exceeds this class's ceiling.
    #[must_use]
    pub fn capacity_nok_reason(self) -> &'static str {
        match self {
            Self::Standard => "HEX>31k",
            Self::Mega => "HEX>64k",
            Self::LargeRam => "HEX>248k",
        }
    }

    /// Parse a class from its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "mega" => Some(Self::Mega),
            "largeram" | "large-ram" => Some(Self::LargeRam),
            _ => None,
        }
    }

    /// All classes, smallest ceiling first.
    pub fn all() -> &'static [Self] {
        &[Self::Standard, Self::Mega, Self::LargeRam]
    }
}

impl fmt::Display for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Mega => write!(f, "mega"),
            Self::LargeRam => write!(f, "largeram"),
        }
    }
}

/// Layout of the image record in external flash.
///
/// The record is `FLXIMG:`, a big-endian payload length, a `:` separator,
/// then the payload itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    /// Width of the big-endian length field: 2 or 3 bytes.
    pub len_field_bytes: u8,
    /// Offset of the `:` separator after the length field.
    pub separator_offset: u32,
    /// Offset where payload bytes begin.
    pub payload_offset: u32,
    /// Maximum payload the class accepts, excluding the header.
    pub max_payload: u32,
}
