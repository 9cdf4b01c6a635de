//! Scheduling, routing and completion guarantees of the kernel runtime

use anyhow::anyhow;
use parking_lot::Mutex;
use polyglot_directives::{DirectiveParameter, KernelDirective};
use polyglot_kernel::{CompositeKernel, Kernel, TypedCommand, ValueKernel};
use polyglot_types::commands::{
    Cancel, RequestInput, RequestKernelInfo, RequestValue, SendValue, SubmitCode,
};
use polyglot_types::events::{
    CommandCancelled, CommandFailed, CommandSucceeded, DiagnosticsProduced, InputProduced,
    KernelInfoProduced, StandardOutputValueProduced, ValueProduced,
};
use polyglot_types::{CommandToken, ErrorKind, KernelCommand};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

type Log = Arc<Mutex<Vec<String>>>;

/// A kernel recording `{name}:{code}` for every submission it handles
fn recording_kernel(name: &str, log: &Log) -> Kernel {
    let kernel = Kernel::new(name);
    let log = log.clone();
    let label = name.to_string();
    kernel.register_command_handler(move |command: TypedCommand<SubmitCode>, context| {
        let log = log.clone();
        let label = label.clone();
        async move {
            log.lock().push(format!("{}:{}", label, command.code.trim()));
            context.publish(StandardOutputValueProduced::plain(command.code.clone()));
            Ok(())
        }
    });
    kernel
}

fn dotnet(log: &Log) -> CompositeKernel {
    let composite = CompositeKernel::new(".NET");
    composite.add(recording_kernel("csharp", log)).unwrap();
    composite
        .add_with_aliases(recording_kernel("pwsh", log), &["powershell"])
        .unwrap();
    composite
}

fn submit(code: &str) -> KernelCommand {
    KernelCommand::new(SubmitCode::new(code))
}

// ============================================================================
// Ordering and independence
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commands_in_one_scope_run_in_submission_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let running = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicUsize::new(0));

    let kernel = Kernel::new("csharp");
    {
        let order = order.clone();
        let running = running.clone();
        let overlapped = overlapped.clone();
        kernel.register_command_handler(move |command: TypedCommand<SubmitCode>, _| {
            let order = order.clone();
            let running = running.clone();
            let overlapped = overlapped.clone();
            async move {
                if running.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlapped.fetch_add(1, Ordering::SeqCst);
                }
                let n: u64 = command.code.parse()?;
                // Earlier submissions take longer, so overlap would reorder them
                tokio::time::sleep(Duration::from_millis(30 - n * 3)).await;
                order.lock().push(n);
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }

    let sends = (0..10).map(|n| kernel.send(submit(&n.to_string())));
    let results = futures::future::join_all(sends).await;

    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(*order.lock(), (0..10).collect::<Vec<u64>>());
    assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    assert_eq!(running.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocked_scope_does_not_delay_another_scope() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    let gate = Arc::new(Notify::new());

    let slow = Kernel::new("slow");
    {
        let gate = gate.clone();
        slow.register_command_handler(move |_: TypedCommand<SubmitCode>, _| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(())
            }
        });
    }
    composite.add(slow).unwrap();

    let blocked = {
        let composite = composite.clone();
        tokio::spawn(async move { composite.send(submit("wait").with_target("slow")).await })
    };

    let fast = timeout(Duration::from_secs(5), composite.send(submit("go").with_target("csharp")))
        .await
        .expect("csharp was blocked by another scope");
    assert!(fast.is_success());
    assert!(!blocked.is_finished());

    gate.notify_one();
    assert!(blocked.await.unwrap().is_success());
}

// ============================================================================
// Terminal events
// ============================================================================

#[tokio::test]
async fn test_exactly_one_terminal_event_and_it_is_last() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    let csharp = composite.find_kernel_by_name("csharp").unwrap();
    csharp.register_command_handler(|command: TypedCommand<SubmitCode>, context| async move {
        context.publish(StandardOutputValueProduced::plain("one"));
        let nested = context.send(submit("nested").with_target("pwsh")).await;
        assert!(nested.is_success());
        context.publish(StandardOutputValueProduced::plain("two"));
        if command.code == "fail" {
            context.fail("asked to fail");
        }
        Ok(())
    });

    let mut events = composite.subscribe();
    for code in ["ok", "fail"] {
        let result = composite.send(submit(code)).await;
        let root = result.command().token().clone();

        let mut stream = Vec::new();
        while let Ok(event) = events.try_recv() {
            if event.command().token().is_self_or_descendant_of(&root) {
                stream.push(event);
            }
        }
        let terminals: Vec<_> = stream.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1, "{:?}", stream);
        assert!(stream.last().unwrap().is_terminal());
        assert_eq!(stream.last().unwrap().command().token(), &root);

        let in_result = result.events().iter().filter(|e| e.is_terminal()).count();
        assert_eq!(in_result, 1);
        assert_eq!(result.is_success(), code == "ok");
    }
}

#[tokio::test]
async fn test_handler_error_fails_command_and_scope_continues() {
    let kernel = Kernel::new("k");
    kernel.register_command_handler(|command: TypedCommand<SubmitCode>, _| async move {
        if command.code == "boom" {
            return Err(anyhow!("boom"));
        }
        Ok(())
    });

    let failed = kernel.send(submit("boom")).await;
    let failure = failed.failure().unwrap();
    assert_eq!(failure.message, "boom");
    assert_eq!(failure.kind, ErrorKind::HandlerFault);
    assert!(failed.first::<CommandSucceeded>().is_none());

    assert!(kernel.send(submit("fine")).await.is_success());
}

#[tokio::test]
async fn test_handler_panic_is_reported_and_scope_continues() {
    let kernel = Kernel::new("k");
    kernel.register_command_handler(|command: TypedCommand<SubmitCode>, _| async move {
        if command.code == "panic" {
            panic!("kaboom");
        }
        Ok(())
    });

    let failed = kernel.send(submit("panic")).await;
    let failure = failed.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::HandlerFault);
    assert!(failure.message.contains("kaboom"), "{}", failure.message);

    assert!(kernel.send(submit("fine")).await.is_success());
}

// ============================================================================
// Deferred commands and middleware
// ============================================================================

#[tokio::test]
async fn test_deferred_command_runs_once_before_next_command() {
    let log: Log = Arc::default();
    let kernel = recording_kernel("k", &log);
    {
        let log = log.clone();
        kernel.register_command_handler(move |command: TypedCommand<SendValue>, _| {
            let log = log.clone();
            async move {
                log.lock().push(format!("deferred:{}", command.name));
                Ok(())
            }
        });
    }

    kernel.defer_command(KernelCommand::new(SendValue::new("x", json!(1))));
    assert_eq!(kernel.deferred_count(), 1);
    assert!(log.lock().is_empty());

    let first = kernel.send(submit("a")).await;
    assert!(first.is_success());
    assert_eq!(first.events().iter().filter(|e| e.is_terminal()).count(), 1);
    kernel.send(submit("b")).await;

    assert_eq!(*log.lock(), ["deferred:x", "k:a", "k:b"]);
    assert_eq!(kernel.deferred_count(), 0);
}

#[tokio::test]
async fn test_failed_deferred_command_fails_the_submission() {
    let log: Log = Arc::default();
    let kernel = recording_kernel("k", &log);
    kernel.register_command_handler(|_: TypedCommand<SendValue>, _| async move { Err(anyhow!("no room")) });

    kernel.defer_command(KernelCommand::new(SendValue::new("x", json!(1))));
    let result = kernel.send(submit("a")).await;

    assert_eq!(result.failure().unwrap().message, "no room");
    assert!(log.lock().is_empty());
    assert!(kernel.send(submit("b")).await.is_success());
}

#[tokio::test]
async fn test_middleware_wraps_handler_in_registration_order() {
    let log: Log = Arc::default();
    let kernel = recording_kernel("k", &log);
    for name in ["outer", "inner"] {
        let log = log.clone();
        kernel.add_middleware(name, move |command, context, next| {
            let log = log.clone();
            async move {
                log.lock().push(format!("{}:before", name));
                let result = next.run(command, context).await;
                log.lock().push(format!("{}:after", name));
                result
            }
        });
    }

    assert!(kernel.send(submit("x")).await.is_success());
    assert_eq!(
        *log.lock(),
        ["outer:before", "inner:before", "k:x", "inner:after", "outer:after"]
    );
    assert_eq!(kernel.middleware_names(), ["outer", "inner"]);
}

#[tokio::test]
async fn test_middleware_can_short_circuit() {
    let log: Log = Arc::default();
    let kernel = recording_kernel("k", &log);
    kernel.add_middleware("deny", |command, context, next| async move {
        if command.is::<SubmitCode>() && context.command().token() == command.token() {
            return Err(anyhow!("denied"));
        }
        next.run(command, context).await
    });

    let result = kernel.send(submit("x")).await;
    assert_eq!(result.failure().unwrap().message, "denied");
    assert!(log.lock().is_empty());
}

// ============================================================================
// Composite routing
// ============================================================================

#[tokio::test]
async fn test_composite_routes_by_target_alias_and_default() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);

    assert!(composite.send(submit("1")).await.is_success());
    assert!(composite.send(submit("2").with_target("pwsh")).await.is_success());
    assert!(composite.send(submit("3").with_target("powershell")).await.is_success());

    let unknown = composite.send(submit("4").with_target("unknown")).await;
    let failure = unknown.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Routing);

    assert_eq!(*log.lock(), ["csharp:1", "pwsh:2", "pwsh:3"]);
}

#[tokio::test]
async fn test_routed_command_carries_routing_slip() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    let result = composite.send(submit("1")).await;

    let slip: Vec<String> = result
        .command()
        .routing_slip()
        .iter()
        .map(|uri| uri.to_string())
        .collect();
    assert_eq!(slip, ["kernel://local/", "kernel://local/csharp"]);
}

#[tokio::test]
async fn test_composite_finds_itself_and_its_children_by_name() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);

    let own = composite.find_kernel_by_name(".NET").unwrap();
    assert_eq!(own.uri(), composite.uri());
    assert_eq!(composite.find_kernel_by_name("powershell").unwrap().name(), "pwsh");
    assert!(composite.find_kernel_by_name("fsharp").is_none());
}

#[tokio::test]
async fn test_composite_middleware_wraps_commands_routed_to_children() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    {
        let log = log.clone();
        composite.add_middleware("audit", move |command, context, next| {
            let log = log.clone();
            async move {
                log.lock().push(format!("composite:{}", context.handling_kernel().name()));
                next.run(command, context).await
            }
        });
    }

    assert!(composite.send(submit("1")).await.is_success());
    assert!(composite.send(submit("2").with_target("pwsh")).await.is_success());

    assert_eq!(
        *log.lock(),
        ["composite:csharp", "csharp:1", "composite:pwsh", "pwsh:2"]
    );
}

#[tokio::test]
async fn test_child_sent_directly_skips_composite_middleware() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let hits = hits.clone();
        composite.add_middleware("count", move |command, context, next| {
            hits.fetch_add(1, Ordering::SeqCst);
            next.run(command, context)
        });
    }

    let csharp = composite.find_kernel_by_name("csharp").unwrap();
    assert!(csharp.send(submit("direct")).await.is_success());
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    assert!(composite.send(submit("routed")).await.is_success());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_submission_is_split_by_kernel_selectors() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);

    let result = composite
        .send(submit("#!csharp\nvar x = 1;\n#!pwsh\nGet-Date\n#!c\nnot a directive\n"))
        .await;
    assert!(result.is_success(), "{:?}", result.failure());
    assert_eq!(
        *log.lock(),
        ["csharp:var x = 1;", "pwsh:Get-Date\n#!c\nnot a directive"]
    );

    let root = result.command().token();
    let outputs: Vec<_> = result
        .events()
        .iter()
        .filter(|e| e.is::<StandardOutputValueProduced>())
        .collect();
    assert_eq!(outputs.len(), 2);
    for output in outputs {
        let token = output.command().token();
        assert_ne!(token, root);
        assert!(token.is_self_or_descendant_of(root));
    }
}

#[tokio::test]
async fn test_unknown_directive_is_a_parse_failure_when_exhaustive() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    composite.set_directives_exhaustive(true);

    let result = composite.send(submit("#!nope\n1")).await;
    let failure = result.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Parse);
    let diagnostics = &result.first::<DiagnosticsProduced>().unwrap().diagnostics;
    assert_eq!(diagnostics[0].code, "DNI101");
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_missing_required_parameter_is_a_binding_failure() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    composite
        .add_directive(
            KernelDirective::action("#!say", |bound| {
                let text = bound.get_str("--text").unwrap_or_default();
                Ok(submit(text).with_target("csharp"))
            })
            .with_parameter(DirectiveParameter::new("--text").required()),
        )
        .unwrap();

    let result = composite.send(submit("#!say\n")).await;
    assert_eq!(result.failure().unwrap().kind, ErrorKind::Binding);
    assert!(log.lock().is_empty());

    let result = composite.send(submit("#!say --text hello\n")).await;
    assert!(result.is_success());
    assert_eq!(*log.lock(), ["csharp:hello"]);
}

// ============================================================================
// Values and expressions
// ============================================================================

fn with_say_directive(composite: &CompositeKernel) {
    composite
        .add_directive(
            KernelDirective::action("#!say", |bound| {
                let text = bound.get_str("--text").ok_or("--text must be a string")?;
                Ok(submit(text).with_target("csharp"))
            })
            .with_parameter(DirectiveParameter::new("--text").required()),
        )
        .unwrap();
}

#[tokio::test]
async fn test_value_kernel_stores_selected_submission() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    composite.add(ValueKernel::create()).unwrap();
    with_say_directive(&composite);

    let stored = composite.send(submit("#!value --name greeting\nhello\n")).await;
    assert!(stored.is_success(), "{:?}", stored.failure());

    let requested = composite
        .send(KernelCommand::new(RequestValue::new("greeting")).with_target("value"))
        .await;
    assert_eq!(requested.first::<ValueProduced>().unwrap().value, json!("hello"));

    let result = composite.send(submit("#!say --text @value:greeting\n")).await;
    assert!(result.is_success(), "{:?}", result.failure());
    assert_eq!(*log.lock(), ["csharp:hello"]);
}

#[tokio::test]
async fn test_missing_value_in_expression_is_a_binding_failure() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    composite.add(ValueKernel::create()).unwrap();
    with_say_directive(&composite);

    let result = composite.send(submit("#!say --text @value:nothing\n")).await;
    let failure = result.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Binding);
    assert!(failure.message.contains("DNI202"), "{}", failure.message);
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_input_expression_asks_the_root_kernel() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    with_say_directive(&composite);
    composite.register_command_handler(|command: TypedCommand<RequestInput>, context| async move {
        assert_eq!(command.prompt, "Your name?");
        context.publish(InputProduced {
            value: "Ada".to_string(),
        });
        Ok(())
    });

    let result = composite.send(submit("#!say --text @input:\"Your name?\"\n")).await;
    assert!(result.is_success(), "{:?}", result.failure());
    assert_eq!(*log.lock(), ["csharp:Ada"]);
}

// ============================================================================
// Cancellation
// ============================================================================

fn long_running_kernel(started: Arc<Notify>) -> Kernel {
    let kernel = Kernel::new("csharp");
    kernel.register_command_handler(move |command: TypedCommand<SubmitCode>, context| {
        let started = started.clone();
        async move {
            if command.code == "quick" {
                return Ok(());
            }
            started.notify_one();
            for _ in 0..500 {
                if context.is_cancellation_requested() {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(())
        }
    });
    kernel
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_stops_running_command_in_scope() {
    let started = Arc::new(Notify::new());
    let composite = CompositeKernel::new(".NET");
    composite.add(long_running_kernel(started.clone())).unwrap();

    let running = {
        let composite = composite.clone();
        tokio::spawn(async move { composite.send(submit("loop")).await })
    };
    started.notified().await;

    let cancel = composite
        .send(KernelCommand::new(Cancel {}).with_target("csharp"))
        .await;
    assert!(cancel.is_success());

    let result = timeout(Duration::from_secs(5), running)
        .await
        .expect("cancelled command did not stop")
        .unwrap();
    let failure = result.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(failure.message, "Command cancelled.");
    assert!(result.first::<CommandFailed>().is_some());

    let cancelled: Vec<CommandToken> = cancel
        .events_of::<CommandCancelled>()
        .map(|c| CommandToken::from(c.cancelled_command_token.as_str()))
        .collect();
    assert_eq!(cancelled, [result.command().token().clone()]);

    assert!(composite.send(submit("quick")).await.is_success());
}

#[tokio::test]
async fn test_cancel_with_nothing_running_succeeds() {
    let composite = CompositeKernel::new(".NET");
    composite.add(long_running_kernel(Arc::new(Notify::new()))).unwrap();

    let cancel = composite.send(KernelCommand::new(Cancel {})).await;
    assert!(cancel.is_success());
    assert!(cancel.first::<CommandCancelled>().is_none());
}

// ============================================================================
// Queries and disposal
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kernel_info_is_answered_while_a_submission_runs() {
    let started = Arc::new(Notify::new());
    let composite = CompositeKernel::new(".NET");
    composite.add(long_running_kernel(started.clone())).unwrap();

    let running = {
        let composite = composite.clone();
        tokio::spawn(async move { composite.send(submit("loop")).await })
    };
    started.notified().await;

    let info = timeout(
        Duration::from_secs(2),
        composite.send(KernelCommand::new(RequestKernelInfo {}).with_target("csharp")),
    )
    .await
    .expect("query waited behind the running submission");
    assert!(info.is_success(), "{:?}", info.failure());
    assert_eq!(info.first::<KernelInfoProduced>().unwrap().kernel_info.local_name, "csharp");
    assert!(!running.is_finished());

    let cancel = composite
        .send(KernelCommand::new(Cancel {}).with_target("csharp"))
        .await;
    assert!(cancel.is_success());
    let result = timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
    assert_eq!(result.failure().unwrap().kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_send_after_dispose_fails() {
    let log: Log = Arc::default();
    let composite = dotnet(&log);
    assert!(composite.send(submit("before")).await.is_success());

    composite.dispose();

    for command in [submit("after"), KernelCommand::new(RequestKernelInfo {})] {
        let result = timeout(Duration::from_secs(5), composite.send(command))
            .await
            .expect("send after dispose did not complete");
        assert_eq!(result.failure().unwrap().kind, ErrorKind::Scheduler);
        assert!(result.first::<CommandFailed>().is_some());
    }
    assert_eq!(*log.lock(), ["csharp:before"]);
}
