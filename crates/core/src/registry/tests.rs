use std::sync::Arc;

use parking_lot::Mutex;
use rsession_protocol::SlotId;
use rsession_runtime::testing::FakeSpawner;

use super::*;
use crate::error::HaltOutcome;
use crate::options::HaltPolicy;

fn registry() -> (Registry, FakeSpawner) {
	let spawner = FakeSpawner::new();
	(Registry::with_spawner(Arc::new(spawner.clone())), spawner)
}

fn raw(text: &str) -> Expr {
	Expr::raw(text)
}

fn with_policy(policy: HaltPolicy) -> SessionOptions {
	SessionOptions::new().halt_policy(policy)
}

#[tokio::test]
async fn test_unnamed_opens_get_distinct_aliases() {
	let (registry, _) = registry();

	let first = registry.open(SessionOptions::new()).await.unwrap();
	let second = registry.open(SessionOptions::new()).await.unwrap();

	assert_ne!(first, second);
	assert!(first.starts_with(ALIAS_PREFIX));
	// Most recently opened becomes the default.
	assert_eq!(registry.aliases(), vec![second.clone(), first.clone()]);
	assert_eq!(registry.default_alias(), Some(second));
}

#[tokio::test]
async fn test_tail_placement_keeps_default() {
	let (registry, _) = registry();

	registry.open(SessionOptions::new().alias("main")).await.unwrap();
	registry
		.open(SessionOptions::new().alias("side").placement(Placement::Tail))
		.await
		.unwrap();

	assert_eq!(registry.default_alias().as_deref(), Some("main"));
	assert_eq!(registry.aliases(), vec!["main", "side"]);
}

#[tokio::test]
async fn test_duplicate_alias_is_rejected() {
	let (registry, spawner) = registry();

	registry.open(SessionOptions::new().alias("s")).await.unwrap();
	let err = registry.open(SessionOptions::new().alias("s")).await.unwrap_err();

	assert!(matches!(err, Error::AliasInUse { ref alias } if alias == "s"));
	assert_eq!(spawner.spawn_count(), 1);
}

#[tokio::test]
async fn test_concurrent_opens_of_one_alias_keep_a_single_session() {
	let (registry, spawner) = registry();

	// Both pass the up-front check before either handshake completes.
	let (first, second) = tokio::join!(
		registry.open(SessionOptions::new().alias("s")),
		registry.open(SessionOptions::new().alias("s")),
	);

	let (won, lost) = match (first, second) {
		(Ok(alias), Err(err)) | (Err(err), Ok(alias)) => (alias, err),
		other => panic!("expected exactly one open to win, got {other:?}"),
	};
	assert_eq!(won, "s");
	assert!(matches!(lost, Error::AliasInUse { ref alias } if alias == "s"));
	assert_eq!(spawner.spawn_count(), 2);
	assert_eq!(registry.aliases(), vec!["s"]);

	registry.push("s", &Expr::assign("x", Expr::list([Expr::Int(7)]))).await.unwrap();
	let text = registry.print("s", &Expr::sym("x")).await.unwrap();
	assert_eq!(text, "[1] 7");
}

#[tokio::test]
async fn test_close_closed_alias_is_unknown() {
	let (registry, spawner) = registry();
	let alias = registry.open(SessionOptions::new()).await.unwrap();

	registry.close(&alias).await.unwrap();
	assert!(!registry.is_open(&alias));
	assert_eq!(spawner.inputs(0).last().map(String::as_str), Some("q(save = \"no\")"));

	let err = registry.close(&alias).await.unwrap_err();
	assert!(matches!(err, Error::UnknownSessionAlias { alias: ref a } if *a == alias));
}

#[tokio::test]
async fn test_close_all_empties_registry() {
	let (registry, _) = registry();
	registry.open(SessionOptions::new()).await.unwrap();
	registry.open(SessionOptions::new()).await.unwrap();

	registry.close_all().await.unwrap();

	assert!(registry.is_empty());
	assert_eq!(registry.default_alias(), None);
	let err = registry.evaluate(Target::Default, &raw("1")).await.unwrap_err();
	assert!(matches!(err, Error::NoOpenSession));
}

#[tokio::test]
async fn test_evaluate_binds_slot() {
	let (registry, spawner) = registry();
	let alias = registry.open(SessionOptions::new()).await.unwrap();

	let expr = Expr::assign_slot(SlotId(0), Expr::list([Expr::Int(1), Expr::Int(2), Expr::Int(3)]));
	let eval = registry.evaluate(&alias, &expr).await.unwrap();

	assert_eq!(eval.binding(SlotId(0)), Some(&ParsedValue::vector(["1", "2", "3"])));
	assert_eq!(
		spawner.commands(0),
		vec!["pl_Rv_0 <- c(1,2,3)", "print(pl_Rv_0)"]
	);
}

#[tokio::test]
async fn test_placeholder_counter_threads_across_commands() {
	let (registry, spawner) = registry();
	let alias = registry.open(SessionOptions::new()).await.unwrap();

	let expr = Expr::seq([
		Expr::assign_slot(SlotId(1), Expr::Int(5)),
		Expr::assign_slot(SlotId(2), Expr::str("a")),
	]);
	let eval = registry.evaluate(&alias, &expr).await.unwrap();
	assert_eq!(eval.binding(SlotId(1)), Some(&ParsedValue::scalar("5")));
	assert_eq!(eval.binding(SlotId(2)), Some(&ParsedValue::scalar("\"a\"")));

	registry
		.evaluate(&alias, &Expr::assign_slot(SlotId(3), true.into()))
		.await
		.unwrap();

	let commands = spawner.commands(0);
	assert_eq!(commands[0], "pl_Rv_0 <- 5; pl_Rv_1 <- \"a\"");
	assert_eq!(commands[3], "pl_Rv_2 <- TRUE");
}

#[tokio::test]
async fn test_push_skips_bindings() {
	let (registry, spawner) = registry();
	let alias = registry.open(SessionOptions::new()).await.unwrap();

	registry
		.push(&alias, &Expr::assign_slot(SlotId(0), Expr::Int(1)))
		.await
		.unwrap();

	assert_eq!(spawner.commands(0), vec!["pl_Rv_0 <- 1"]);
}

#[tokio::test]
async fn test_print_and_query() {
	let (registry, _) = registry();
	registry.open(SessionOptions::new()).await.unwrap();

	registry
		.push(Target::Default, &Expr::assign("x", Expr::list([Expr::Int(4), Expr::Int(5)])))
		.await
		.unwrap();

	let text = registry.print(Target::Default, &Expr::sym("x")).await.unwrap();
	assert_eq!(text, "[1] 4 5");

	let value = registry.query(Target::Default, &Expr::sym("x")).await.unwrap();
	assert_eq!(value, ParsedValue::vector(["4", "5"]));
}

#[tokio::test]
async fn test_query_table_output() {
	let spawner = FakeSpawner::new().with_output(
		"print(m)",
		["     [,1] [,2]", "[1,]    1    3", "[2,]    2    4"],
	);
	let registry = Registry::with_spawner(Arc::new(spawner));
	let alias = registry.open(SessionOptions::new()).await.unwrap();

	let value = registry
		.query(&alias, &Expr::call("print", [Expr::sym("m")]))
		.await
		.unwrap();

	assert_eq!(value.cell("2", "1"), Some("2"));
	assert_eq!(value.cell("1", "2"), Some("3"));
}

#[tokio::test]
async fn test_function_defaults_apply_to_calls() {
	let spawner = FakeSpawner::new().with_output("f(a=1,b=2)", ["[1] 3"]);
	let registry = Registry::with_spawner(Arc::new(spawner.clone()));
	registry.register_default("f", "a", Expr::Int(9));
	registry.register_default("f", "b", Expr::Int(2));
	let alias = registry.open(SessionOptions::new()).await.unwrap();

	let text = registry
		.print(&alias, &Expr::call("f", [Expr::opt("a", Expr::Int(1))]))
		.await
		.unwrap();

	assert_eq!(text, "[1] 3");
	assert_eq!(spawner.commands(0), vec!["f(a=1,b=2)"]);
}

#[tokio::test]
async fn test_history_most_recent_first() {
	let (registry, _) = registry();
	let alias = registry.open(SessionOptions::new()).await.unwrap();

	registry.push(&alias, &raw("x<-1")).await.unwrap();
	registry.push(&alias, &raw("y<-2")).await.unwrap();

	assert_eq!(registry.history(&alias).await.unwrap(), vec!["y<-2", "x<-1"]);
}

#[tokio::test]
async fn test_halt_with_reinstate_replays_history_in_order() {
	let (registry, spawner) = registry();
	let alias = registry.open(with_policy(HaltPolicy::Reinstate)).await.unwrap();

	registry.push(&alias, &raw("x<-1")).await.unwrap();
	registry.push(&alias, &raw("y<-2")).await.unwrap();

	let err = registry.push(&alias, &raw("stop('boom')")).await.unwrap_err();
	match err {
		Error::SlaveHalted { alias: ref a, outcome, ref errors } => {
			assert_eq!(*a, alias);
			assert_eq!(outcome, HaltOutcome::Reinstated);
			assert_eq!(errors, &vec!["Error: boom".to_string()]);
		}
		other => panic!("unexpected error: {other:?}"),
	}

	assert_eq!(spawner.spawn_count(), 2);
	assert_eq!(spawner.commands(1), vec!["x<-1", "y<-2"]);
	assert!(registry.is_open(&alias));
	assert_eq!(registry.history(&alias).await.unwrap(), vec!["y<-2", "x<-1"]);

	// Slave-side state survived.
	assert_eq!(registry.print(&alias, &Expr::sym("y")).await.unwrap(), "[1] 2");
}

#[tokio::test]
async fn test_reinstate_without_history_fails() {
	let (registry, spawner) = registry();
	let alias = registry.open(with_policy(HaltPolicy::Reinstate)).await.unwrap();

	let err = registry.push(&alias, &raw("stop('early')")).await.unwrap_err();

	assert!(matches!(err, Error::ReinstateFailed { .. }), "{err:?}");
	assert!(!registry.is_open(&alias));
	assert_eq!(spawner.spawn_count(), 1);
}

#[tokio::test]
async fn test_fail_policy_closes_session() {
	let (registry, _) = registry();
	let alias = registry.open(with_policy(HaltPolicy::Fail)).await.unwrap();
	registry.push(&alias, &raw("x<-1")).await.unwrap();

	let err = registry.push(&alias, &raw("missing_var")).await.unwrap_err();
	assert_eq!(err.halt_outcome(), Some(HaltOutcome::Failed));
	assert_eq!(err.alias(), Some(alias.as_str()));

	assert!(!registry.is_open(&alias));
	let err = registry.history(&alias).await.unwrap_err();
	assert!(matches!(err, Error::UnknownSessionAlias { .. }));
}

#[tokio::test]
async fn test_restart_starts_fresh() {
	let (registry, spawner) = registry();
	let alias = registry.open(with_policy(HaltPolicy::Restart)).await.unwrap();
	registry.push(&alias, &raw("x<-1")).await.unwrap();

	let err = registry.push(&alias, &raw("stop('x')")).await.unwrap_err();
	assert_eq!(err.halt_outcome(), Some(HaltOutcome::Restarted));

	assert!(registry.is_open(&alias));
	assert!(spawner.commands(1).is_empty());
	assert!(registry.history(&alias).await.unwrap().is_empty());
	// Same options, same arguments.
	assert_eq!(spawner.record(0).unwrap().args, spawner.record(1).unwrap().args);
}

#[tokio::test]
async fn test_restart_keeps_registry_position() {
	let (registry, _) = registry();
	let first = registry.open(with_policy(HaltPolicy::Restart)).await.unwrap();
	let second = registry.open(SessionOptions::new()).await.unwrap();
	assert_eq!(registry.aliases(), vec![second.clone(), first.clone()]);

	registry.push(&first, &raw("stop('x')")).await.unwrap_err();

	assert_eq!(registry.aliases(), vec![second, first]);
}

#[tokio::test]
async fn test_restart_launch_failure_closes_session() {
	let (registry, spawner) = registry();
	let alias = registry.open(with_policy(HaltPolicy::Restart)).await.unwrap();
	spawner.refuse_spawns(true);

	let err = registry.push(&alias, &raw("stop('x')")).await.unwrap_err();

	assert!(matches!(err, Error::LaunchFailed { .. }), "{err:?}");
	assert!(!registry.is_open(&alias));
}

#[tokio::test]
async fn test_halt_leaves_other_sessions_alone() {
	let (registry, _) = registry();
	let doomed = registry.open(SessionOptions::new().alias("doomed")).await.unwrap();
	let other = registry.open(SessionOptions::new().alias("other")).await.unwrap();
	registry.push(&other, &raw("z<-3")).await.unwrap();

	registry.push(&doomed, &raw("stop('x')")).await.unwrap_err();

	assert_eq!(registry.aliases(), vec!["other"]);
	assert_eq!(registry.print(&other, &Expr::sym("z")).await.unwrap(), "[1] 3");
}

#[tokio::test]
async fn test_invoke_hands_streams_to_handler() {
	let (registry, _) = registry();
	let seen: Arc<Mutex<Option<(String, bool, Vec<String>)>>> = Arc::default();
	let sink = Arc::clone(&seen);
	registry.register_halt_handler("capture", move |ctx: HaltContext| {
		let sink = Arc::clone(&sink);
		async move {
			*sink.lock() = Some((ctx.command, ctx.streams.is_some(), ctx.history));
			Ok(())
		}
	});

	let alias = registry
		.open(with_policy(HaltPolicy::Invoke("capture".into())))
		.await
		.unwrap();
	registry.push(&alias, &raw("x<-1")).await.unwrap();

	let eval = registry
		.evaluate(&alias, &raw("print(x); stop('late')"))
		.await
		.unwrap();
	assert_eq!(eval.output, vec!["[1] 1"]);
	assert_eq!(eval.errors, vec!["Error: late"]);

	let (command, had_streams, history) = seen.lock().clone().unwrap();
	assert_eq!(command, "print(x); stop('late')");
	assert!(had_streams);
	assert_eq!(history, vec!["x<-1"]);
	assert!(!registry.is_open(&alias));
}

#[tokio::test]
async fn test_invoke_ground_withholds_streams() {
	let (registry, _) = registry();
	let had_streams = Arc::new(Mutex::new(None));
	let sink = Arc::clone(&had_streams);
	registry.register_halt_handler("ground", move |ctx: HaltContext| {
		let sink = Arc::clone(&sink);
		async move {
			*sink.lock() = Some(ctx.streams.is_some());
			Ok(())
		}
	});

	let alias = registry
		.open(with_policy(HaltPolicy::InvokeGround("ground".into())))
		.await
		.unwrap();
	registry.push(&alias, &raw("stop('x')")).await.unwrap();

	assert_eq!(*had_streams.lock(), Some(false));
}

#[tokio::test]
async fn test_handler_failure_fails_call() {
	let (registry, _) = registry();
	registry.register_halt_handler("refuse", |_ctx: HaltContext| async {
		Err(Error::Config("handler refused".into()))
	});

	let alias = registry
		.open(with_policy(HaltPolicy::Invoke("refuse".into())))
		.await
		.unwrap();
	let err = registry.push(&alias, &raw("stop('x')")).await.unwrap_err();

	assert!(matches!(err, Error::Config(ref m) if m == "handler refused"));
}

#[tokio::test]
async fn test_missing_handler_is_reported() {
	let (registry, _) = registry();
	let alias = registry
		.open(with_policy(HaltPolicy::InvokeGround("nobody".into())))
		.await
		.unwrap();

	let err = registry.push(&alias, &raw("stop('x')")).await.unwrap_err();

	assert!(matches!(err, Error::HaltHandlerMissing { ref handler, .. } if handler == "nobody"));
	assert!(!registry.unregister_halt_handler("nobody"));
}

#[tokio::test]
async fn test_unparseable_binding_is_malformed() {
	let spawner = FakeSpawner::new().with_output("print(pl_Rv_0)", ["[[a]]"]);
	let registry = Registry::with_spawner(Arc::new(spawner));
	let alias = registry.open(SessionOptions::new()).await.unwrap();

	let err = registry
		.evaluate(&alias, &Expr::assign_slot(SlotId(0), Expr::Int(1)))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::MalformedResponse { alias: ref a, .. } if *a == alias));
	// Parse failures do not affect the session.
	assert!(registry.is_open(&alias));
}

#[tokio::test]
async fn test_interactive_session_round_trip() {
	let (registry, spawner) = registry();
	let alias = registry
		.open(SessionOptions::new().interactive(true))
		.await
		.unwrap();

	assert!(spawner.record(0).unwrap().args.iter().any(|a| a == "--interactive"));
	let text = registry
		.print(&alias, &Expr::call("print", [Expr::str("hi")]))
		.await
		.unwrap();
	assert_eq!(text, "[1] \"hi\"");
}

#[tokio::test]
async fn test_transcript_survives_reinstate() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("session.log");
	let (registry, _) = registry();
	let alias = registry
		.open(
			with_policy(HaltPolicy::Reinstate).transcript(rsession_runtime::TranscriptSpec {
				path: Some(path.clone()),
				mode: rsession_runtime::TranscriptMode::Once,
				record: rsession_runtime::Record::Both,
			}),
		)
		.await
		.unwrap();

	registry.push(&alias, &raw("x<-1")).await.unwrap();
	registry.push(&alias, &raw("stop('boom')")).await.unwrap_err();
	registry.push(&alias, &raw("print(x)")).await.unwrap();
	registry.close(&alias).await.unwrap();

	let text = std::fs::read_to_string(&path).unwrap();
	assert!(text.starts_with("> x<-1\n"), "transcript was truncated: {text}");
	assert!(text.contains("> print(x)\n[1] 1\n"), "{text}");
}
