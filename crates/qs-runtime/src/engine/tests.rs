use std::collections::BTreeMap;
use std::sync::Arc;

use qs_core::{ArgCoercer, CommandDescriptor, QsValue, Severity};

use super::lifecycle::{CommandHandler, CommandInvocation};
use super::runtime_test_support::*;

#[test]
fn if_runs_exactly_one_branch() {
    let (engine, _output, queue_id) =
        run_source("if true { determine \"yes\" } else { determine \"no\" }");
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["yes"]);

    let (engine, _output, queue_id) =
        run_source("if false { determine \"yes\" } else { determine \"no\" }");
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["no"]);
}

#[test]
fn else_if_chains_take_the_first_true_branch() {
    let source = r#"
set hp 5
if $hp > 9 {
    determine "high"
} else $hp > 3 {
    determine "mid"
} else {
    determine "low"
}
"#;
    let (engine, _output, queue_id) = run_source(source);
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["mid"]);
}

#[test]
fn repeat_determines_each_index_and_finishes() {
    let (engine, _output, queue_id) = run_source("repeat 3 { determine $repeat_index }");
    assert_eq!(
        rendered(&engine.determinations(queue_id)),
        vec!["1", "2", "3"]
    );
    assert!(!engine.queue_running(queue_id));
}

#[test]
fn repeat_zero_skips_the_block_entirely() {
    let (engine, _output, queue_id) =
        run_source("repeat 0 { determine \"never\" }\ndetermine \"after\"");
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["after"]);
}

#[test]
fn while_reevaluates_its_condition_each_pass() {
    let source = r#"
set flag true
while $flag {
    determine $while_index
    if $while_index >= 3 {
        set flag false
    }
}
determine "done"
"#;
    let (engine, _output, queue_id) = run_source(source);
    assert_eq!(
        rendered(&engine.determinations(queue_id)),
        vec!["1", "2", "3", "done"]
    );
}

#[test]
fn foreach_binds_item_index_and_total() {
    let (engine, _output, queue_id) =
        run_source("foreach red green blue { determine \"$foreach_index/$foreach_total $foreach_item\" }");
    assert_eq!(
        rendered(&engine.determinations(queue_id)),
        vec!["1/3 red", "2/3 green", "3/3 blue"]
    );
}

#[test]
fn foreach_iterates_a_single_list_argument() {
    let vars = BTreeMap::from([(
        "items".to_string(),
        QsValue::List(vec![QsValue::from("a"), QsValue::from("b")]),
    )]);
    let (engine, _output, queue_id) =
        run_source_with_vars("foreach $items { determine $foreach_item }", vars);
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["a", "b"]);
}

#[test]
fn nested_break_leaves_outer_siblings_running() {
    let (engine, _output, queue_id) =
        run_source("if true { if true { break 2 } }\ndetermine \"after\"");
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["after"]);
}

#[test]
fn break_counts_every_enclosing_breakable_block() {
    let source = r#"
repeat 3 {
    determine $repeat_index
    if $repeat_index == 2 {
        break 2
    }
}
determine "out"
"#;
    let (engine, _output, queue_id) = run_source(source);
    assert_eq!(
        rendered(&engine.determinations(queue_id)),
        vec!["1", "2", "out"]
    );
}

#[test]
fn break_as_the_last_statement_of_an_if_exits_that_if_first() {
    let (engine, _output, queue_id) =
        run_source("if true { determine \"in\"\nbreak }\ndetermine \"after\"");
    assert_eq!(
        rendered(&engine.determinations(queue_id)),
        vec!["in", "after"]
    );
    assert!(!engine.queue_running(queue_id));
}

#[test]
fn overdeep_break_is_a_runtime_error_not_a_crash() {
    let (engine, output, queue_id) =
        run_source("if true { if true { break 9 } }\ndetermine \"after\"");
    assert!(!engine.queue_running(queue_id));
    assert!(engine.determinations(queue_id).is_empty());
    assert!(output
        .messages()
        .iter()
        .any(|(severity, message)| *severity == Severity::Error
            && message.contains("break level(s)")));
}

#[test]
fn wait_gates_on_cumulative_tick_time() {
    let (mut engine, output, _queue_id) = run_source("wait 1\necho \"done\"");
    engine.tick(0.4);
    engine.tick(0.4);
    assert!(output.messages().is_empty());

    engine.tick(0.5);
    let messages: Vec<String> = output.messages().into_iter().map(|(_, m)| m).collect();
    assert_eq!(messages, vec!["done"]);

    let (mut engine, output, _queue_id) = run_source("wait 1\necho \"done\"");
    engine.tick(0.5);
    assert!(output.messages().is_empty());
    engine.tick(0.5);
    assert_eq!(output.messages().len(), 1);
}

#[test]
fn stop_without_arguments_finishes_the_frame_cleanly() {
    let (engine, output, queue_id) =
        run_source("determine \"a\"\nstop\ndetermine \"b\"");
    assert!(!engine.queue_running(queue_id));
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["a"]);
    assert!(output.messages().is_empty());
}

#[test]
fn stop_with_a_kind_exits_the_nearest_matching_loop() {
    let source = r#"
repeat 5 {
    determine $repeat_index
    if $repeat_index == 3 {
        stop repeat
    }
}
determine "after"
"#;
    let (engine, _output, queue_id) = run_source(source);
    assert_eq!(
        rendered(&engine.determinations(queue_id)),
        vec!["1", "2", "3", "after"]
    );
}

#[test]
fn next_jumps_to_the_loop_boundary_immediately() {
    let source = r#"
foreach a b c {
    if $foreach_item == b {
        next
    }
    determine $foreach_item
}
"#;
    let (engine, _output, queue_id) = run_source(source);
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["a", "c"]);
}

#[test]
fn next_ignores_loops_that_do_not_enclose_it() {
    let (engine, output, queue_id) =
        run_source("if true { next }\nrepeat 2 { determine $repeat_index }");
    assert!(!engine.queue_running(queue_id));
    assert!(engine.determinations(queue_id).is_empty());
    assert!(output
        .messages()
        .iter()
        .any(|(severity, message)| *severity == Severity::Error
            && message.contains("No loop boundary")));
}

#[test]
fn stop_ignores_loops_that_do_not_enclose_it() {
    let (engine, output, queue_id) =
        run_source("if true { stop repeat }\nrepeat 2 { determine $repeat_index }");
    assert!(!engine.queue_running(queue_id));
    assert!(engine.determinations(queue_id).is_empty());
    assert!(output
        .messages()
        .iter()
        .any(|(severity, message)| *severity == Severity::Error
            && message.contains("No repeat boundary")));
}

#[test]
fn stop_inside_a_function_frame_only_ends_that_frame() {
    let source = r#"
function partial {
    determine "kept"
    stop
    determine "cut"
}
call partial
determine $determined
"#;
    let (engine, _output, queue_id) = run_source(source);
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["[kept]"]);
}

#[test]
fn a_compile_error_script_reports_once_and_never_partially_runs() {
    let (engine, output, queue_id) = run_source("echo ok\nrepeat { determine \"x\" }");
    assert!(!engine.queue_running(queue_id));
    assert!(engine.determinations(queue_id).is_empty());

    let messages = output.messages();
    // The echo before the broken statement must not have run.
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, Severity::Error);
    assert!(messages[0].1.contains("compile error"));
}

#[test]
fn the_dispatch_guard_stops_runaway_scripts() {
    let (engine, output, queue_id) = run_source("while true { set x 1 }");
    assert!(!engine.queue_running(queue_id));
    assert!(output
        .messages()
        .iter()
        .any(|(severity, message)| *severity == Severity::Error
            && message.contains("guard")));
}

#[test]
fn host_commands_receive_coerced_arguments_and_mutate_the_scope() {
    let (mut engine, _output) = test_engine();
    let handler: Arc<dyn CommandHandler> = Arc::new(|invocation: CommandInvocation<'_>| {
        let total = invocation
            .args
            .iter()
            .filter_map(QsValue::as_number)
            .sum::<f64>();
        invocation.scope.set("sum", QsValue::Number(total));
        Ok(())
    });
    engine.register_command(
        CommandDescriptor::host("accumulate", 2, Some(2))
            .with_coercers(vec![ArgCoercer::Number, ArgCoercer::Number]),
        handler,
    );

    let script = qs_parser::parse(
        "main",
        "accumulate 2 3\ndetermine $sum",
        engine.registry(),
    );
    let (queue_id, determinations) = engine.execute_script(script, BTreeMap::new());
    assert!(!engine.queue_running(queue_id));
    assert_eq!(rendered(&determinations), vec!["5"]);
}

#[test]
fn host_argument_coercion_failures_fault_at_runtime() {
    let (mut engine, _output) = test_engine();
    let handler: Arc<dyn CommandHandler> =
        Arc::new(|_invocation: CommandInvocation<'_>| Ok(()));
    engine.register_command(
        CommandDescriptor::host("hit", 1, Some(1)).with_coercers(vec![ArgCoercer::Number]),
        handler,
    );

    let script = qs_parser::parse(
        "main",
        "set target abc\ntry { hit $target } catch { determine $error_message }",
        engine.registry(),
    );
    let (_queue_id, determinations) = engine.execute_script(script, BTreeMap::new());
    assert_eq!(determinations.len(), 1);
    assert!(determinations[0].render().contains("not a number"));
}

#[test]
fn unset_of_a_missing_variable_warns_without_faulting() {
    let (engine, output, queue_id) = run_source("unset ghost\ndetermine \"after\"");
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["after"]);
    assert!(output
        .messages()
        .iter()
        .any(|(severity, message)| *severity == Severity::Warning
            && message.contains("ghost")));
}

#[test]
fn initial_variables_seed_the_root_scope() {
    let vars = BTreeMap::from([("who".to_string(), QsValue::from("ada"))]);
    let (engine, _output, queue_id) = run_source_with_vars("determine \"hi $who\"", vars);
    assert_eq!(rendered(&engine.determinations(queue_id)), vec!["hi ada"]);
}

#[test]
fn loop_state_is_discarded_when_its_block_exits() {
    // Re-entering the same loop later must start from a clean slate.
    let source = r#"
repeat 2 {
    repeat 2 {
        determine "$repeat_index"
    }
}
"#;
    let (engine, _output, queue_id) = run_source(source);
    assert_eq!(
        rendered(&engine.determinations(queue_id)),
        vec!["1", "2", "1", "2"]
    );
}
