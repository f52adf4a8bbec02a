//! Rejection classification for schema-adaptive writes.
//!
//! Every backend message is matched against one declarative signature table.
//! The classified kind then selects a shedding strategy from a second table.
//! Nothing else in the crate inspects rejection text.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    /// The backend does not know this column/field.
    UnknownField(String),
    /// The backend could not parse or encode the payload.
    MalformedPayload,
    Other,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField(field) => write!(f, "unknown field `{field}`"),
            Self::MalformedPayload => f.write_str("malformed payload"),
            Self::Other => f.write_str("other"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShedStrategy {
    /// Remove the named field and retry.
    DropField,
    /// Remove free-form rich fields once and retry.
    DropRichFields,
    /// Give up and report the rejection.
    Surface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignatureClass {
    UnknownField,
    Malformed,
}

/// A rejection signature. For unknown-field signatures the field name is
/// captured between `marker` and the first `terminator` character.
struct Signature {
    class: SignatureClass,
    marker: &'static str,
    /// Only match when this text also appears after the marker.
    requires: Option<&'static str>,
    terminators: &'static [char],
}

const SIGNATURES: &[Signature] = &[
    // SQLite: "table artifacts has no column named prompt_excerpt"
    Signature {
        class: SignatureClass::UnknownField,
        marker: "has no column named ",
        requires: None,
        terminators: &[' ', ',', ')', ':', '\n'],
    },
    // SQLite: "no such column: prompt_excerpt"
    Signature {
        class: SignatureClass::UnknownField,
        marker: "no such column: ",
        requires: None,
        terminators: &[' ', ',', ')', '\n'],
    },
    // Postgres: column "prompt_excerpt" of relation "artifacts" does not exist
    Signature {
        class: SignatureClass::UnknownField,
        marker: "column \"",
        requires: Some("does not exist"),
        terminators: &['"'],
    },
    // PostgREST: Could not find the 'prompt_excerpt' column of 'artifacts' in the schema cache
    Signature {
        class: SignatureClass::UnknownField,
        marker: "could not find the '",
        requires: Some("column"),
        terminators: &['\''],
    },
    // serde-style validators: unknown field `prompt_excerpt`, expected ...
    Signature {
        class: SignatureClass::UnknownField,
        marker: "unknown field `",
        requires: None,
        terminators: &['`'],
    },
    Signature {
        class: SignatureClass::Malformed,
        marker: "malformed json",
        requires: None,
        terminators: &[],
    },
    Signature {
        class: SignatureClass::Malformed,
        marker: "invalid input syntax",
        requires: None,
        terminators: &[],
    },
    Signature {
        class: SignatureClass::Malformed,
        marker: "unsupported unicode escape",
        requires: None,
        terminators: &[],
    },
    Signature {
        class: SignatureClass::Malformed,
        marker: "invalid byte sequence",
        requires: None,
        terminators: &[],
    },
    Signature {
        class: SignatureClass::Malformed,
        marker: "invalid json",
        requires: None,
        terminators: &[],
    },
    Signature {
        class: SignatureClass::Malformed,
        marker: "string or blob too big",
        requires: None,
        terminators: &[],
    },
];

/// Map each rejection kind to what the writer should do about it.
const STRATEGIES: &[(fn(&RejectionKind) -> bool, ShedStrategy)] = &[
    (
        |kind| matches!(kind, RejectionKind::UnknownField(_)),
        ShedStrategy::DropField,
    ),
    (
        |kind| matches!(kind, RejectionKind::MalformedPayload),
        ShedStrategy::DropRichFields,
    ),
    (|kind| matches!(kind, RejectionKind::Other), ShedStrategy::Surface),
];

fn capture_field(message: &str, start: usize, terminators: &[char]) -> Option<String> {
    let rest = &message[start..];
    let end = rest.find(terminators).unwrap_or(rest.len());
    let field = rest[..end]
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`');
    // Qualified names ("artifacts.prompt_excerpt") refer to the last segment.
    let field = field.rsplit('.').next().unwrap_or(field);
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

/// Classify a backend rejection message.
pub fn classify(message: &str) -> RejectionKind {
    let lower = message.to_ascii_lowercase();

    for signature in SIGNATURES {
        let Some(pos) = lower.find(signature.marker) else {
            continue;
        };
        let after = pos + signature.marker.len();
        if let Some(required) = signature.requires
            && !lower[after..].contains(required)
        {
            continue;
        }

        match signature.class {
            SignatureClass::Malformed => return RejectionKind::MalformedPayload,
            SignatureClass::UnknownField => {
                // Capture from the original message to keep field casing.
                if let Some(field) = capture_field(message, after, signature.terminators) {
                    return RejectionKind::UnknownField(field);
                }
            }
        }
    }

    RejectionKind::Other
}

pub fn strategy_for(kind: &RejectionKind) -> ShedStrategy {
    STRATEGIES
        .iter()
        .find(|(applies, _)| applies(kind))
        .map_or(ShedStrategy::Surface, |(_, strategy)| *strategy)
}
