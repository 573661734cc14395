mod support;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use run_pipeline::config::PollingConfig;
use run_pipeline::runtime::TokioRuntime;
use run_pipeline::{PipelineError, PollingFallback};
use serde_json::json;
use shared_types::{RunDetail, RunStatus};
use tokio::task::LocalSet;

use support::{advance, run, FakeApi};

fn collector() -> (Rc<RefCell<Vec<RunDetail>>>, impl Fn(RunDetail) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |detail| sink.borrow_mut().push(detail))
}

#[tokio::test(start_paused = true)]
async fn test_polls_until_terminal_and_complete() {
    LocalSet::new()
        .run_until(async {
            let api = FakeApi::new();
            api.push_run("live", Ok(run("live", RunStatus::InProgress, None)));
            api.push_run("live", Ok(run("live", RunStatus::Completed, None)));
            api.push_run(
                "live",
                Ok(run("live", RunStatus::Completed, Some(json!({"score": 3})))),
            );
            api.push_run("done", Ok(run("done", RunStatus::Failed, None)));

            let polling =
                PollingFallback::new(TokioRuntime::shared(), api.clone(), PollingConfig::default());
            let (seen, on_update) = collector();
            polling.watch(
                &[
                    run("live", RunStatus::InProgress, None),
                    run("done", RunStatus::Failed, None),
                ],
                on_update,
            );
            assert!(polling.is_polling("live"));
            assert!(!polling.is_polling("done"));

            advance(Duration::from_millis(2_900)).await;
            assert_eq!(api.calls("run", "live"), 0);

            advance(Duration::from_millis(200)).await;
            assert_eq!(api.calls("run", "live"), 1);

            // Completed without a summary keeps polling.
            advance(Duration::from_secs(3)).await;
            assert_eq!(api.calls("run", "live"), 2);
            assert!(polling.is_polling("live"));

            advance(Duration::from_secs(3)).await;
            assert_eq!(api.calls("run", "live"), 3);
            assert!(!polling.is_polling("live"));

            advance(Duration::from_secs(30)).await;
            assert_eq!(api.calls("run", "live"), 3);
            assert_eq!(api.calls("run", "done"), 0);

            let statuses: Vec<RunStatus> = seen.borrow().iter().map(|d| d.status).collect();
            assert_eq!(
                statuses,
                vec![RunStatus::InProgress, RunStatus::Completed, RunStatus::Completed]
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_rewatch_cancels_previous_timers() {
    LocalSet::new()
        .run_until(async {
            let api = FakeApi::new();
            api.push_run("a", Ok(run("a", RunStatus::InProgress, None)));
            api.push_run("b", Ok(run("b", RunStatus::Created, None)));

            let polling =
                PollingFallback::new(TokioRuntime::shared(), api.clone(), PollingConfig::default());
            polling.watch(&[run("a", RunStatus::InProgress, None)], |_| {});
            advance(Duration::from_secs(1)).await;
            polling.watch(&[run("b", RunStatus::Created, None)], |_| {});

            advance(Duration::from_secs(7)).await;
            assert_eq!(api.calls("run", "a"), 0);
            assert_eq!(api.calls("run", "b"), 2);
            assert_eq!(polling.polled_ids(), vec!["b".to_string()]);

            polling.stop();
            polling.stop();
            assert!(polling.polled_ids().is_empty());
            advance(Duration::from_secs(10)).await;
            assert_eq!(api.calls("run", "b"), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_fetch_errors_do_not_stop_polling() {
    LocalSet::new()
        .run_until(async {
            let api = FakeApi::new();
            api.push_run(
                "flaky",
                Err(PipelineError::Transport("connection reset".to_string())),
            );
            api.push_run("flaky", Ok(run("flaky", RunStatus::Aborted, None)));

            let polling =
                PollingFallback::new(TokioRuntime::shared(), api.clone(), PollingConfig::default());
            let (seen, on_update) = collector();
            polling.watch(&[run("flaky", RunStatus::InProgress, None)], on_update);

            advance(Duration::from_secs(7)).await;
            assert_eq!(api.calls("run", "flaky"), 2);
            assert_eq!(seen.borrow().len(), 1);
            assert!(!polling.is_polling("flaky"));
        })
        .await;
}
