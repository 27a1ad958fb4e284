use serde::{Deserialize, Serialize};

use crate::value::QsValue;

/// Severity of a diagnostic routed through the output collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Good,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandFlags {
    pub is_flow: bool,
    pub asyncable: bool,
    pub waitable: bool,
    pub breakable: bool,
}

/// Dispatch target of a command. Flow commands are interpreted by the
/// engine itself; `Host` commands go through a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    If,
    Else,
    While,
    Repeat,
    Foreach,
    Break,
    Call,
    Inject,
    Run,
    Function,
    Event,
    Try,
    Catch,
    Error,
    Determine,
    Stop,
    Next,
    Wait,
    Echo,
    Set,
    Unset,
    Host,
}

/// Per-argument value coercer: raw token -> typed value or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgCoercer {
    Any,
    Text,
    Number,
    Integer,
    Boolean,
    VarName,
    LoopKind,
}

impl ArgCoercer {
    pub fn coerce(&self, raw: &str) -> Result<QsValue, String> {
        match self {
            Self::Any | Self::Text => Ok(QsValue::String(raw.to_string())),
            Self::Number => raw
                .trim()
                .parse::<f64>()
                .map(QsValue::Number)
                .map_err(|_| format!("\"{}\" is not a number", raw)),
            Self::Integer => {
                let parsed = raw.trim().parse::<i64>();
                match parsed {
                    Ok(value) => Ok(QsValue::Number(value as f64)),
                    Err(_) => Err(format!("\"{}\" is not an integer", raw)),
                }
            }
            Self::Boolean => {
                if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
                    Ok(QsValue::Bool(raw.eq_ignore_ascii_case("true")))
                } else {
                    Err(format!("\"{}\" is not true or false", raw))
                }
            }
            Self::VarName => {
                let valid = !raw.is_empty()
                    && !raw.starts_with(|ch: char| ch.is_ascii_digit())
                    && raw
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
                if valid {
                    Ok(QsValue::String(raw.to_string()))
                } else {
                    Err(format!("\"{}\" is not a valid variable name", raw))
                }
            }
            Self::LoopKind => {
                let known = ["while", "repeat", "foreach"];
                if known.iter().any(|kind| raw.eq_ignore_ascii_case(kind)) {
                    Ok(QsValue::String(raw.to_ascii_lowercase()))
                } else {
                    Err(format!("\"{}\" is not a loop kind", raw))
                }
            }
        }
    }

    /// Parse-time check. Arguments that reference variables cannot be
    /// validated until execution, so anything containing `$` passes.
    pub fn check_static(&self, raw: &str) -> Result<(), String> {
        if raw.contains('$') {
            return Ok(());
        }
        self.coerce(raw).map(|_| ())
    }
}

/// Immutable contract of one registered command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub name: String,
    pub min_args: usize,
    /// `None` means unbounded (the wire form's -1).
    pub max_args: Option<usize>,
    pub coercers: Vec<ArgCoercer>,
    pub flags: CommandFlags,
    pub kind: CommandKind,
}

impl CommandDescriptor {
    pub fn host(name: impl Into<String>, min_args: usize, max_args: Option<usize>) -> Self {
        Self {
            name: name.into(),
            min_args,
            max_args,
            coercers: Vec::new(),
            flags: CommandFlags::default(),
            kind: CommandKind::Host,
        }
    }

    pub fn with_coercers(mut self, coercers: Vec<ArgCoercer>) -> Self {
        self.coercers = coercers;
        self
    }

    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Positions past the declared list fall back to `Any`.
    pub fn coercer_for(&self, index: usize) -> ArgCoercer {
        self.coercers.get(index).copied().unwrap_or(ArgCoercer::Any)
    }

    pub fn check_arity(&self, arg_count: usize) -> Result<(), String> {
        if arg_count < self.min_args {
            return Err(format!(
                "expects at least {} argument(s), got {}",
                self.min_args, arg_count
            ));
        }
        if let Some(max) = self.max_args {
            if arg_count > max {
                return Err(format!(
                    "expects at most {} argument(s), got {}",
                    max, arg_count
                ));
            }
        }
        Ok(())
    }
}

/// Which flow construct a synthetic boundary entry closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    While,
    Repeat,
    Foreach,
    Try,
}

/// Inclusive block extent inside the owning frame's entry array.
/// `start` is the owning entry's own index; `end` is the last entry of
/// the block, the synthetic boundary included when one exists. The body
/// is the open interval between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    Command { name: String },
    Boundary { owner: usize, boundary: BoundaryKind },
}

/// One parsed statement. Position-independent except for the block
/// range, which indexes the owning script's flat entry array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(flatten)]
    pub kind: EntryKind,
    pub args: Vec<String>,
    pub block: Option<BlockRange>,
    pub script: String,
    pub line: usize,
    pub indent: usize,
    pub await_completion: bool,
}

impl Entry {
    pub fn command_name(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Command { name } => Some(name.as_str()),
            EntryKind::Boundary { .. } => None,
        }
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self.kind, EntryKind::Boundary { .. })
    }
}

/// A parsed script: a flat ordered entry array with blocks as ranges.
/// Immutable; shared read-only by any number of queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub name: String,
    pub entries: Vec<Entry>,
    pub debug_level: u8,
}

impl Script {
    pub fn new(name: impl Into<String>, entries: Vec<Entry>) -> Self {
        Self {
            name: name.into(),
            entries,
            debug_level: 0,
        }
    }
}

#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn coercers_accept_and_reject_expected_tokens() {
        assert_eq!(
            ArgCoercer::Integer.coerce("3"),
            Ok(QsValue::Number(3.0))
        );
        assert!(ArgCoercer::Integer.coerce("3.5").is_err());
        assert_eq!(
            ArgCoercer::Number.coerce(" 2.5 "),
            Ok(QsValue::Number(2.5))
        );
        assert_eq!(ArgCoercer::Boolean.coerce("TRUE"), Ok(QsValue::Bool(true)));
        assert!(ArgCoercer::Boolean.coerce("yes").is_err());
        assert!(ArgCoercer::VarName.coerce("loop_index").is_ok());
        assert!(ArgCoercer::VarName.coerce("2fast").is_err());
        assert!(ArgCoercer::VarName.coerce("a b").is_err());
        assert_eq!(
            ArgCoercer::LoopKind.coerce("Foreach"),
            Ok(QsValue::String("foreach".to_string()))
        );
        assert!(ArgCoercer::LoopKind.coerce("if").is_err());
    }

    #[test]
    fn static_checks_skip_variable_references() {
        assert!(ArgCoercer::Integer.check_static("${count}").is_ok());
        assert!(ArgCoercer::Integer.check_static("$count").is_ok());
        assert!(ArgCoercer::Integer.check_static("abc").is_err());
        assert!(ArgCoercer::Integer.check_static("7").is_ok());
    }

    #[test]
    fn arity_check_honors_unbounded_maximum() {
        let bounded = CommandDescriptor::host("set", 2, Some(2));
        assert!(bounded.check_arity(2).is_ok());
        assert!(bounded.check_arity(1).is_err());
        assert!(bounded.check_arity(3).is_err());

        let unbounded = CommandDescriptor::host("echo", 0, None);
        assert!(unbounded.check_arity(0).is_ok());
        assert!(unbounded.check_arity(40).is_ok());
    }

    #[test]
    fn coercer_positions_past_the_list_fall_back_to_any() {
        let descriptor = CommandDescriptor::host("repeat", 1, Some(1))
            .with_coercers(vec![ArgCoercer::Integer]);
        assert_eq!(descriptor.coercer_for(0), ArgCoercer::Integer);
        assert_eq!(descriptor.coercer_for(5), ArgCoercer::Any);
    }

    #[test]
    fn scripts_round_trip_through_serde() {
        let script = Script::new(
            "startup.qs",
            vec![
                Entry {
                    kind: EntryKind::Command {
                        name: "repeat".to_string(),
                    },
                    args: vec!["2".to_string()],
                    block: Some(BlockRange { start: 0, end: 1 }),
                    script: "startup.qs".to_string(),
                    line: 1,
                    indent: 0,
                    await_completion: false,
                },
                Entry {
                    kind: EntryKind::Boundary {
                        owner: 0,
                        boundary: BoundaryKind::Repeat,
                    },
                    args: Vec::new(),
                    block: None,
                    script: "startup.qs".to_string(),
                    line: 1,
                    indent: 1,
                    await_completion: false,
                },
            ],
        );

        let encoded = serde_json::to_string(&script).expect("script should serialize");
        let decoded: Script = serde_json::from_str(&encoded).expect("script should deserialize");
        assert_eq!(decoded, script);
    }
}
