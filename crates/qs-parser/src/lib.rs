mod split;

use qs_core::{
    boundary_kind_for, requires_block, BlockRange, CommandKind, CommandRegistry, Entry, EntryKind,
    QueueScriptError, Script, SourceRef,
};

use crate::split::{split_statements, RawStatement, Token};

/// Parses script text, replacing the whole body with a single
/// error-reporting stand-in when anything is invalid. A broken script
/// never partially runs.
pub fn parse(name: &str, source: &str, registry: &CommandRegistry) -> Script {
    match try_parse(name, source, registry) {
        Ok(script) => script,
        Err(error) => compile_error_script(name, &error),
    }
}

/// Parse without the fail-closed wrapper; used by the wrapper and by
/// callers that want the compile error itself.
pub fn try_parse(
    name: &str,
    source: &str,
    registry: &CommandRegistry,
) -> Result<Script, QueueScriptError> {
    let raw = split_statements(name, source)?;
    let mut entries: Vec<Entry> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut owner_candidate: Option<usize> = None;

    for statement in raw {
        match statement {
            RawStatement::Tokens { tokens, line } => {
                let entry = build_entry(name, registry, tokens, line, open.len())?;
                entries.push(entry);
                owner_candidate = Some(entries.len() - 1);
            }
            RawStatement::OpenBrace { line } => {
                let owner = owner_candidate.take().ok_or_else(|| {
                    QueueScriptError::with_origin(
                        "PARSE_BLOCK_OWNERLESS",
                        "Block has no owning statement.",
                        SourceRef::new(name, line),
                    )
                })?;
                open.push(owner);
            }
            RawStatement::CloseBrace { line } => {
                let owner = open.pop().ok_or_else(|| {
                    QueueScriptError::with_origin(
                        "PARSE_UNBALANCED_BRACE",
                        "Closing brace without a matching opening brace.",
                        SourceRef::new(name, line),
                    )
                })?;
                let owner_kind = command_kind(registry, &entries[owner]);
                if let Some(boundary) = owner_kind.and_then(boundary_kind_for) {
                    entries.push(Entry {
                        kind: EntryKind::Boundary { owner, boundary },
                        args: Vec::new(),
                        block: None,
                        script: name.to_string(),
                        line,
                        indent: open.len() + 1,
                        await_completion: false,
                    });
                }
                let end = entries.len() - 1;
                entries[owner].block = Some(BlockRange { start: owner, end });
                owner_candidate = None;
            }
        }
    }

    if let Some(&owner) = open.last() {
        return Err(QueueScriptError::with_origin(
            "PARSE_UNBALANCED_BRACE",
            "Block is never closed.",
            SourceRef::new(name, entries[owner].line),
        ));
    }

    check_placement(name, registry, &entries)?;
    Ok(Script::new(name, entries))
}

/// Reconstructs source text from a parsed script, omitting synthetic
/// boundary entries. Re-parsing the result yields the same structure.
pub fn render_source(script: &Script) -> String {
    let mut out = String::new();
    render_range(&script.entries, 0, script.entries.len(), &mut out);
    out
}

fn render_range(entries: &[Entry], mut index: usize, end_exclusive: usize, out: &mut String) {
    while index < end_exclusive {
        let entry = &entries[index];
        let EntryKind::Command { name } = &entry.kind else {
            index += 1;
            continue;
        };

        for _ in 0..entry.indent {
            out.push_str("    ");
        }
        if entry.await_completion {
            out.push('&');
        }
        out.push_str(name);
        for arg in &entry.args {
            out.push(' ');
            out.push_str(&render_argument(arg));
        }

        match entry.block {
            Some(range) => {
                out.push_str(" {\n");
                render_range(entries, index + 1, range.end + 1, out);
                for _ in 0..entry.indent {
                    out.push_str("    ");
                }
                out.push_str("}\n");
                index = range.end + 1;
            }
            None => {
                out.push('\n');
                index += 1;
            }
        }
    }
}

fn render_argument(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|ch| ch.is_whitespace() || matches!(ch, ';' | '{' | '}' | '\'' | '"' | '/'));
    if !needs_quotes {
        return arg.to_string();
    }
    if !arg.contains('"') {
        format!("\"{}\"", arg)
    } else {
        format!("'{}'", arg)
    }
}

fn compile_error_script(name: &str, error: &QueueScriptError) -> Script {
    let line = error.origin.as_ref().map(|origin| origin.line).unwrap_or(1);
    let entry = Entry {
        kind: EntryKind::Command {
            name: "error".to_string(),
        },
        args: vec![format!("compile error: {}", error.message)],
        block: None,
        script: name.to_string(),
        line,
        indent: 0,
        await_completion: false,
    };
    Script::new(name, vec![entry])
}

fn build_entry(
    script: &str,
    registry: &CommandRegistry,
    tokens: Vec<Token>,
    line: usize,
    indent: usize,
) -> Result<Entry, QueueScriptError> {
    let origin = SourceRef::new(script, line);
    let command_token = &tokens[0];

    let mut command = command_token.text.as_str();
    let mut await_completion = false;
    if !command_token.quoted && command.starts_with('&') {
        await_completion = true;
        command = &command[1..];
    }

    let descriptor = registry.lookup(command).ok_or_else(|| {
        QueueScriptError::with_origin(
            "PARSE_UNKNOWN_COMMAND",
            format!("Unknown command \"{}\".", command),
            origin.clone(),
        )
    })?;

    let args = tokens[1..]
        .iter()
        .map(|token| token.text.clone())
        .collect::<Vec<_>>();

    for arg in &args {
        if arg.starts_with('\0') {
            return Err(QueueScriptError::with_origin(
                "PARSE_RESERVED_ARGUMENT",
                "Arguments beginning with \\0 are reserved.",
                origin.clone(),
            ));
        }
    }

    descriptor.check_arity(args.len()).map_err(|detail| {
        QueueScriptError::with_origin(
            "PARSE_ARITY",
            format!("\"{}\" {}.", descriptor.name, detail),
            origin.clone(),
        )
    })?;

    for (index, arg) in args.iter().enumerate() {
        descriptor
            .coercer_for(index)
            .check_static(arg)
            .map_err(|detail| {
                QueueScriptError::with_origin(
                    "PARSE_ARGUMENT",
                    format!("\"{}\" argument {}: {}.", descriptor.name, index + 1, detail),
                    origin.clone(),
                )
            })?;
    }

    Ok(Entry {
        kind: EntryKind::Command {
            name: descriptor.name.to_ascii_lowercase(),
        },
        args,
        block: None,
        script: script.to_string(),
        line,
        indent,
        await_completion,
    })
}

fn command_kind(registry: &CommandRegistry, entry: &Entry) -> Option<CommandKind> {
    entry
        .command_name()
        .and_then(|name| registry.lookup(name))
        .map(|descriptor| descriptor.kind)
}

/// Post-assembly checks that need the finished entry array: mandatory
/// blocks, and catch/else attachment to the statement they follow.
fn check_placement(
    script: &str,
    registry: &CommandRegistry,
    entries: &[Entry],
) -> Result<(), QueueScriptError> {
    for (index, entry) in entries.iter().enumerate() {
        let Some(kind) = command_kind(registry, entry) else {
            continue;
        };
        let origin = SourceRef::new(script, entry.line);

        if requires_block(kind) && entry.block.is_none() {
            return Err(QueueScriptError::with_origin(
                "PARSE_BLOCK_REQUIRED",
                format!(
                    "\"{}\" needs a bracketed block.",
                    entry.command_name().unwrap_or_default()
                ),
                origin,
            ));
        }

        match kind {
            CommandKind::Catch => {
                let follows_try = index > 0
                    && matches!(
                        entries[index - 1].kind,
                        EntryKind::Boundary {
                            boundary: qs_core::BoundaryKind::Try,
                            ..
                        }
                    );
                if !follows_try {
                    return Err(QueueScriptError::with_origin(
                        "PARSE_CATCH_PLACEMENT",
                        "\"catch\" must immediately follow a try block.",
                        origin,
                    ));
                }
            }
            CommandKind::Else => {
                let paired = index > 0
                    && entries.iter().enumerate().any(|(owner, candidate)| {
                        owner < index
                            && candidate.block.map(|range| range.end) == Some(index - 1)
                            && matches!(
                                command_kind(registry, candidate),
                                Some(CommandKind::If) | Some(CommandKind::Else)
                            )
                    });
                if !paired {
                    return Err(QueueScriptError::with_origin(
                        "PARSE_ELSE_PLACEMENT",
                        "\"else\" must immediately follow an if block.",
                        origin,
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod parser_tests {
    use super::*;
    use qs_core::{builtin_registry, BoundaryKind};

    fn parse_ok(source: &str) -> Script {
        let registry = builtin_registry();
        try_parse("main", source, &registry).expect("parse should pass")
    }

    fn parse_err(source: &str) -> QueueScriptError {
        let registry = builtin_registry();
        try_parse("main", source, &registry).expect_err("parse should fail")
    }

    fn without_lines(script: &Script) -> Vec<Entry> {
        script
            .entries
            .iter()
            .map(|entry| Entry {
                line: 0,
                ..entry.clone()
            })
            .collect()
    }

    #[test]
    fn blocks_are_inlined_with_owner_relative_ranges() {
        let script = parse_ok("repeat 3 { echo hi }\necho done");
        // repeat, echo, boundary, echo
        assert_eq!(script.entries.len(), 4);
        assert_eq!(
            script.entries[0].block,
            Some(BlockRange { start: 0, end: 2 })
        );
        assert!(matches!(
            script.entries[2].kind,
            EntryKind::Boundary {
                owner: 0,
                boundary: BoundaryKind::Repeat
            }
        ));
        assert_eq!(script.entries[3].command_name(), Some("echo"));
    }

    #[test]
    fn nested_blocks_nest_their_ranges() {
        let script = parse_ok("if true { repeat 2 { echo a } }\necho b");
        // if, repeat, echo, boundary, echo
        assert_eq!(script.entries.len(), 5);
        assert_eq!(
            script.entries[0].block,
            Some(BlockRange { start: 0, end: 3 })
        );
        assert_eq!(
            script.entries[1].block,
            Some(BlockRange { start: 1, end: 3 })
        );
        assert_eq!(script.entries[2].indent, 2);
        for entry in &script.entries {
            if let Some(range) = entry.block {
                assert!(range.start <= range.end);
                assert!(range.end < script.entries.len());
            }
        }
    }

    #[test]
    fn if_blocks_get_no_boundary_and_loops_and_try_do() {
        let script = parse_ok("if true { echo a }\nwhile true { break }\ntry { } catch { }");
        let boundaries = script
            .entries
            .iter()
            .filter_map(|entry| match entry.kind {
                EntryKind::Boundary { boundary, .. } => Some(boundary),
                EntryKind::Command { .. } => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(boundaries, vec![BoundaryKind::While, BoundaryKind::Try]);
    }

    #[test]
    fn parsing_is_idempotent() {
        let source = "repeat 2 { if true { determine yes } }\necho done\n";
        let registry = builtin_registry();
        let first = try_parse("main", source, &registry).expect("parse should pass");
        let second = try_parse("main", source, &registry).expect("parse should pass");
        assert_eq!(first.entries, second.entries);
    }

    #[test]
    fn round_trip_reproduces_the_structure() {
        let source = r#"
set greeting "hello there"
repeat 3 {
    if $greeting == "hello there" {
        determine $repeat_index
    } else {
        echo "never taken; honest"
    }
}
&run other.qs
"#;
        let registry = builtin_registry();
        let parsed = try_parse("main", source, &registry).expect("parse should pass");
        let rendered = render_source(&parsed);
        let reparsed = try_parse("main", &rendered, &registry).expect("reparse should pass");
        assert_eq!(without_lines(&parsed), without_lines(&reparsed));
    }

    #[test]
    fn unbalanced_braces_are_compile_errors_not_crashes() {
        assert_eq!(parse_err("if true { echo a").code, "PARSE_UNBALANCED_BRACE");
        assert_eq!(parse_err("echo a }").code, "PARSE_UNBALANCED_BRACE");
        assert_eq!(parse_err("{ echo a }").code, "PARSE_BLOCK_OWNERLESS");
    }

    #[test]
    fn descriptor_validation_covers_arity_and_static_types() {
        assert_eq!(parse_err("unknowncmd").code, "PARSE_UNKNOWN_COMMAND");
        assert_eq!(parse_err("repeat { echo a }").code, "PARSE_ARITY");
        assert_eq!(parse_err("repeat 1 2 { echo a }").code, "PARSE_ARITY");
        assert_eq!(parse_err("repeat abc { echo a }").code, "PARSE_ARGUMENT");
        // A variable reference cannot be checked until execution.
        let script = parse_ok("repeat $n { echo a }");
        assert_eq!(script.entries[0].command_name(), Some("repeat"));
    }

    #[test]
    fn reserved_null_arguments_are_rejected() {
        assert_eq!(parse_err("echo \0CALLBACK").code, "PARSE_RESERVED_ARGUMENT");
    }

    #[test]
    fn misplaced_catch_and_else_are_rejected() {
        assert_eq!(parse_err("catch { echo a }").code, "PARSE_CATCH_PLACEMENT");
        assert_eq!(parse_err("echo a\nelse { echo b }").code, "PARSE_ELSE_PLACEMENT");
        assert_eq!(parse_err("if true\necho a").code, "PARSE_BLOCK_REQUIRED");

        let chained = parse_ok("if true { echo a } else { echo b }");
        assert_eq!(chained.entries[2].command_name(), Some("else"));
    }

    #[test]
    fn failed_parse_produces_a_single_reporting_stand_in() {
        let registry = builtin_registry();
        let script = parse("main", "repeat { echo a }", &registry);
        assert_eq!(script.entries.len(), 1);
        assert_eq!(script.entries[0].command_name(), Some("error"));
        assert!(script.entries[0].args[0].starts_with("compile error:"));
    }

    #[test]
    fn await_prefix_is_recorded_and_stripped() {
        let script = parse_ok("&run startup.qs");
        assert!(script.entries[0].await_completion);
        assert_eq!(script.entries[0].command_name(), Some("run"));
    }

    #[test]
    fn entry_lines_point_at_the_source() {
        let script = parse_ok("echo a\n\nif true {\n    echo deep\n}");
        assert_eq!(script.entries[0].line, 1);
        assert_eq!(script.entries[1].line, 3);
        assert_eq!(script.entries[2].line, 4);
    }
}
