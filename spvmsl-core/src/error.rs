//! Typed error taxonomy (see spec §7).
use std::fmt;

/// MSL language version, `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MslVersion(pub u8, pub u8, pub u8);
impl MslVersion {
    pub const V1_0: MslVersion = MslVersion(1, 0, 0);
    pub const V2_0: MslVersion = MslVersion(2, 0, 0);
    pub const V2_1: MslVersion = MslVersion(2, 1, 0);
    pub const V2_2: MslVersion = MslVersion(2, 2, 0);
    pub const V2_3: MslVersion = MslVersion(2, 3, 0);
    pub const V2_4: MslVersion = MslVersion(2, 4, 0);
}
impl fmt::Display for MslVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// The four kinds of translation failure a compile can report.
#[derive(Debug, Clone)]
pub enum Error {
    /// The requested MSL version is too low for a feature the module uses.
    UnsupportedTarget {
        feature: &'static str,
        required: MslVersion,
        actual: MslVersion,
    },
    /// Structural SPIR-V that has no MSL expression.
    UnsupportedShape { message: String, id: Option<u32> },
    /// A struct's SPIR-V-declared layout cannot be reproduced in MSL.
    LayoutImpossible { message: String, id: Option<u32> },
    /// A bad combination of compiler options.
    InvalidArgument { message: String },
    /// An invariant of the IR itself (§3) was violated.
    Corrupted(String),
}

impl Error {
    pub fn unsupported_target(feature: &'static str, required: MslVersion, actual: MslVersion) -> Self {
        Error::UnsupportedTarget {
            feature,
            required,
            actual,
        }
    }
    pub fn unsupported_shape(message: impl Into<String>, id: Option<u32>) -> Self {
        Error::UnsupportedShape {
            message: message.into(),
            id,
        }
    }
    pub fn layout_impossible(message: impl Into<String>, id: Option<u32>) -> Self {
        Error::LayoutImpossible {
            message: message.into(),
            id,
        }
    }
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }
    pub fn corrupted(message: impl Into<String>) -> Self {
        Error::Corrupted(message.into())
    }
    pub fn missing(kind: &'static str, id: u32) -> Self {
        Error::Corrupted(format!("no {} registered for id %{}", kind, id))
    }

    /// The offending SPIR-V ID, when one is known (§7: "where possible").
    pub fn offending_id(&self) -> Option<u32> {
        match self {
            Error::UnsupportedShape { id, .. } | Error::LayoutImpossible { id, .. } => *id,
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedTarget {
                feature,
                required,
                actual,
            } => write!(
                f,
                "'{}' requires Metal Shading Language {} or later, targeting {}",
                feature, required, actual
            ),
            Error::UnsupportedShape { message, id } => match id {
                Some(id) => write!(f, "{} (on %{})", message, id),
                None => write!(f, "{}", message),
            },
            Error::LayoutImpossible { message, id } => match id {
                Some(id) => write!(f, "{} (on %{})", message, id),
                None => write!(f, "{}", message),
            },
            Error::InvalidArgument { message } => write!(f, "{}", message),
            Error::Corrupted(message) => write!(f, "corrupted IR: {}", message),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msl_version_ordering_is_field_wise() {
        assert!(MslVersion::V1_0 < MslVersion::V2_0);
        assert!(MslVersion::V2_0 < MslVersion::V2_1);
        assert_eq!(MslVersion::V2_0.to_string(), "2.0.0");
    }

    #[test]
    fn offending_id_is_only_set_on_shape_and_layout_errors() {
        let shape = Error::unsupported_shape("bad", Some(7));
        assert_eq!(shape.offending_id(), Some(7));
        let invalid = Error::invalid_argument("nope");
        assert_eq!(invalid.offending_id(), None);
    }

    #[test]
    fn display_includes_message_and_optional_id() {
        let err = Error::layout_impossible("stride too small", Some(42));
        assert_eq!(err.to_string(), "stride too small (on %42)");
        let err_no_id = Error::layout_impossible("stride too small", None);
        assert_eq!(err_no_id.to_string(), "stride too small");
    }

    #[test]
    fn missing_builds_a_corrupted_variant() {
        let err = Error::missing("variable", 9);
        assert!(matches!(err, Error::Corrupted(_)));
    }
}
