use dioxus::launch;
use dioxus::prelude::*;

use run_observer_ui::{
    init_logging, use_pipeline_provider, use_prefetch, use_trace_stream, PipelineContext,
};
use run_pipeline::{PipelineConfig, SessionStatus};

const WORKER_SCRIPT: &str = "/assets/compute_worker.js";

fn main() {
    init_logging();
    launch(App);
}

fn selected_run() -> String {
    web_sys::window()
        .and_then(|w| w.location().hash().ok())
        .map(|hash| hash.trim_start_matches('#').to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "latest".to_string())
}

#[component]
fn App() -> Element {
    use_pipeline_provider(|| PipelineContext::browser(PipelineConfig::default(), Some(WORKER_SCRIPT)));
    let run_id = use_signal(selected_run);

    rsx! {
        TraceFeed { run_id: run_id() }
    }
}

#[component]
fn TraceFeed(run_id: String) -> Element {
    let state = use_trace_stream(&run_id);
    let prefetch = use_prefetch();
    let state = state.read();

    let status = match state.status {
        SessionStatus::Connecting => "connecting",
        SessionStatus::Open => "live",
        SessionStatus::Retrying => "reconnecting",
        SessionStatus::Error => "unavailable",
        SessionStatus::Complete => "complete",
        SessionStatus::Closed => "closed",
    };
    let hovered = run_id.clone();
    let summary = format!("{run_id} · {status} · {} traces", state.traces.len());
    let error = state.error.clone();
    let rows: Vec<(&'static str, String)> = state
        .traces
        .iter()
        .map(|trace| {
            let class = if trace.is_system_trace { "trace system" } else { "trace" };
            let line = format!("{} → {}: {}", trace.from.as_str(), trace.to.as_str(), trace.content);
            (class, line)
        })
        .collect();

    rsx! {
        div { class: "trace-feed",
            header {
                onmouseenter: move |_| prefetch.schedule(&hovered),
                "{summary}"
            }
            if let Some(error) = error {
                p { class: "trace-error", "{error}" }
            }
            ul {
                for (class, line) in rows {
                    li { class, "{line}" }
                }
            }
        }
    }
}
