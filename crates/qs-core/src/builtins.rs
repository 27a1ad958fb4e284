use crate::registry::CommandRegistry;
use crate::types::{ArgCoercer, CommandDescriptor, CommandFlags, CommandKind};

fn flow(breakable: bool) -> CommandFlags {
    CommandFlags {
        is_flow: true,
        asyncable: false,
        waitable: false,
        breakable,
    }
}

fn descriptor(
    name: &str,
    kind: CommandKind,
    min_args: usize,
    max_args: Option<usize>,
    coercers: Vec<ArgCoercer>,
    flags: CommandFlags,
) -> CommandDescriptor {
    CommandDescriptor {
        name: name.to_string(),
        min_args,
        max_args,
        coercers,
        flags,
        kind,
    }
}

/// The descriptor table every engine starts from. Hosts extend it with
/// `register_command`; these entries themselves cannot be replaced.
pub fn builtin_registry() -> CommandRegistry {
    use ArgCoercer::{Integer, LoopKind, Number, VarName};
    use CommandKind as K;

    let mut registry = CommandRegistry::new();
    let table = vec![
        descriptor("if", K::If, 1, None, Vec::new(), flow(true)),
        descriptor("else", K::Else, 0, None, Vec::new(), flow(true)),
        descriptor("while", K::While, 1, None, Vec::new(), flow(true)),
        descriptor("repeat", K::Repeat, 1, Some(1), vec![Integer], flow(true)),
        descriptor("foreach", K::Foreach, 1, None, Vec::new(), flow(true)),
        descriptor("break", K::Break, 0, Some(1), vec![Integer], flow(false)),
        descriptor("call", K::Call, 1, None, Vec::new(), flow(false)),
        descriptor("inject", K::Inject, 1, Some(1), Vec::new(), flow(false)),
        descriptor(
            "run",
            K::Run,
            1,
            Some(1),
            Vec::new(),
            CommandFlags {
                is_flow: true,
                asyncable: true,
                waitable: true,
                breakable: false,
            },
        ),
        descriptor("function", K::Function, 1, Some(1), vec![VarName], flow(false)),
        descriptor("event", K::Event, 1, Some(2), Vec::new(), flow(false)),
        descriptor("try", K::Try, 0, Some(0), Vec::new(), flow(true)),
        descriptor("catch", K::Catch, 0, Some(0), Vec::new(), flow(false)),
        descriptor("error", K::Error, 1, None, Vec::new(), flow(false)),
        descriptor("determine", K::Determine, 1, None, Vec::new(), flow(false)),
        descriptor("stop", K::Stop, 0, Some(1), vec![LoopKind], flow(false)),
        descriptor("next", K::Next, 0, Some(1), vec![LoopKind], flow(false)),
        descriptor(
            "wait",
            K::Wait,
            1,
            Some(1),
            vec![Number],
            CommandFlags::default(),
        ),
        descriptor("echo", K::Echo, 0, None, Vec::new(), CommandFlags::default()),
        descriptor(
            "set",
            K::Set,
            2,
            None,
            vec![VarName],
            CommandFlags::default(),
        ),
        descriptor(
            "unset",
            K::Unset,
            1,
            Some(1),
            vec![VarName],
            CommandFlags::default(),
        ),
    ];

    for entry in table {
        registry.register(entry);
    }
    registry
}

/// Commands whose block closes with a synthetic boundary entry.
pub fn boundary_kind_for(kind: CommandKind) -> Option<crate::types::BoundaryKind> {
    use crate::types::BoundaryKind;
    match kind {
        CommandKind::While => Some(BoundaryKind::While),
        CommandKind::Repeat => Some(BoundaryKind::Repeat),
        CommandKind::Foreach => Some(BoundaryKind::Foreach),
        CommandKind::Try => Some(BoundaryKind::Try),
        _ => None,
    }
}

/// Commands that are meaningless without a bracketed body.
pub fn requires_block(kind: CommandKind) -> bool {
    matches!(
        kind,
        CommandKind::If
            | CommandKind::Else
            | CommandKind::While
            | CommandKind::Repeat
            | CommandKind::Foreach
            | CommandKind::Try
            | CommandKind::Catch
            | CommandKind::Function
            | CommandKind::Event
    )
}

#[cfg(test)]
mod builtins_tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_the_flow_command_set() {
        let registry = builtin_registry();
        for name in [
            "if", "else", "while", "repeat", "foreach", "break", "call", "inject", "run",
            "function", "event", "try", "catch", "error", "determine", "stop", "next", "wait",
            "echo", "set", "unset",
        ] {
            assert!(registry.contains(name), "missing builtin \"{}\"", name);
        }
    }

    #[test]
    fn loop_and_try_blocks_get_boundaries_and_if_does_not() {
        assert!(boundary_kind_for(CommandKind::While).is_some());
        assert!(boundary_kind_for(CommandKind::Repeat).is_some());
        assert!(boundary_kind_for(CommandKind::Foreach).is_some());
        assert!(boundary_kind_for(CommandKind::Try).is_some());
        assert!(boundary_kind_for(CommandKind::If).is_none());
        assert!(boundary_kind_for(CommandKind::Call).is_none());
    }

    #[test]
    fn breakable_flags_cover_every_block_construct_short_of_catch() {
        let registry = builtin_registry();
        for name in ["if", "else", "while", "repeat", "foreach", "try"] {
            let descriptor = registry.lookup(name).expect("builtin should resolve");
            assert!(descriptor.flags.breakable, "\"{}\" should be breakable", name);
        }
        let catch = registry.lookup("catch").expect("builtin should resolve");
        assert!(!catch.flags.breakable);
    }
}
