//! Bounded fan-out enrichment of search results.
//!
//! One fetch task per `needs_fetch` item, gated by a semaphore so the cap on
//! simultaneously in-flight fetches is structural rather than advisory. Every
//! task reports through the same event channel in completion order; the
//! `parsing_completed` status is the batch barrier and is emitted only after
//! every launched task has settled.

use answerpipe_core::{
    FetchOutcome, FetchProgress, FetchStatus, SearchResultItem, StreamEvent,
};
use answerpipe_web::FetchEngine;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;

#[derive(Clone)]
pub struct FanOutCoordinator {
    engine: Arc<FetchEngine>,
    max_concurrent: usize,
}

impl FanOutCoordinator {
    pub fn new(engine: Arc<FetchEngine>, max_concurrent: usize) -> Self {
        Self {
            engine,
            // Unbounded fan-out is not expressible; zero would deadlock.
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Fetch-enrich every pending `needs_fetch` item in `items`, mutating the
    /// shared list in place (merge identity is `link`). Emits a
    /// `search_result_update` pair per item (fetching, then terminal), a
    /// progress status after each settled item, and the `parsing_completed`
    /// barrier once the whole batch is done.
    ///
    /// One item's failure never cancels its siblings. A fired `cancel` stops
    /// new fetches; tasks already past the fetch merge silently and emit
    /// nothing further.
    pub async fn enrich(
        &self,
        items: Arc<Mutex<Vec<SearchResultItem>>>,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        // One task per distinct link: duplicate hits (the same page surfaced
        // by two searches) share a single fetch, and the merge below settles
        // every item carrying that link.
        let targets: Vec<String> = {
            let items = items.lock().await;
            let mut seen = HashSet::new();
            items
                .iter()
                .filter(|i| i.needs_fetch && i.fetch_status == FetchStatus::Pending)
                .map(|i| i.link.clone())
                .filter(|link| seen.insert(link.clone()))
                .collect()
        };
        let total = targets.len();
        tracing::info!(total, cap = self.max_concurrent, "starting fetch fan-out");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for link in targets {
            let engine = self.engine.clone();
            let items = items.clone();
            let events = events.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            let completed = completed.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };
                if cancel.is_cancelled() {
                    return;
                }

                let fetching: Vec<SearchResultItem> = {
                    let mut items = items.lock().await;
                    items
                        .iter_mut()
                        .filter(|i| i.link == link)
                        .map(|item| {
                            item.fetch_status = FetchStatus::Fetching;
                            item.clone()
                        })
                        .collect()
                };
                if fetching.is_empty() {
                    return;
                }
                for result in fetching {
                    let _ = events.send(StreamEvent::SearchResultUpdate { result }).await;
                }

                let outcome = engine.fetch(&link).await;

                let terminal: Vec<SearchResultItem> = {
                    let mut items = items.lock().await;
                    items
                        .iter_mut()
                        .filter(|i| i.link == link)
                        .map(|item| {
                            apply_outcome(item, outcome.clone());
                            item.clone()
                        })
                        .collect()
                };
                if cancel.is_cancelled() {
                    return;
                }
                for result in terminal {
                    let _ = events.send(StreamEvent::SearchResultUpdate { result }).await;
                }

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = events
                    .send(StreamEvent::Status {
                        status: "fetching_progress".to_string(),
                        message: format!("Read {done} of {total} pages"),
                        progress: Some(FetchProgress::new(total, done)),
                    })
                    .await;
            });
        }

        while tasks.join_next().await.is_some() {}

        if cancel.is_cancelled() {
            tracing::debug!("fan-out cancelled, skipping barrier event");
            return;
        }
        tracing::info!(
            total,
            settled = completed.load(Ordering::SeqCst),
            "fetch fan-out settled"
        );
        let _ = events
            .send(StreamEvent::status("parsing_completed", "Finished reading pages"))
            .await;
    }
}

/// Merge one fetch outcome into its item: success replaces title, content,
/// and description and flips to `completed`; failure records the diagnostic
/// and flips to `error`. Either way the item ends terminal.
fn apply_outcome(item: &mut SearchResultItem, outcome: FetchOutcome) {
    if outcome.is_success() {
        item.fetch_status = FetchStatus::Completed;
        if !outcome.title.is_empty() {
            item.title = outcome.title;
        }
        if !outcome.content.is_empty() {
            item.content = outcome.content;
        }
        if !outcome.description.is_empty() {
            item.description = Some(outcome.description);
        }
    } else {
        item.fetch_status = FetchStatus::Error;
        item.error = outcome
            .error_detail
            .or_else(|| Some("fetch failed".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use answerpipe_core::OutcomeStatus;
    use answerpipe_web::FetchConfig;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn fast_engine() -> Arc<FetchEngine> {
        Arc::new(FetchEngine::new(
            reqwest::Client::new(),
            FetchConfig {
                retry_count: 2,
                retry_delay: Duration::from_millis(5),
                rate_limit_interval: Duration::from_millis(1),
                max_content_length: 2000,
                request_timeout: Duration::from_secs(5),
                robots_timeout: Duration::from_secs(2),
            },
            None,
        ))
    }

    fn page(text: &str) -> String {
        format!(
            r#"<html><head><title>T</title></head><body><div class="content">{text}</div></body></html>"#
        )
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    #[test]
    fn apply_outcome_success_replaces_fields() {
        let mut item = SearchResultItem::organic("old", "snippet", "https://x.test/");
        apply_outcome(
            &mut item,
            FetchOutcome::success(
                "new title".to_string(),
                "desc".to_string(),
                "fetched body".to_string(),
                1,
                false,
            ),
        );
        assert_eq!(item.fetch_status, FetchStatus::Completed);
        assert_eq!(item.title, "new title");
        assert_eq!(item.content, "fetched body");
        assert_eq!(item.description.as_deref(), Some("desc"));
        assert!(item.error.is_none());
    }

    #[test]
    fn apply_outcome_error_keeps_snippet_and_records_detail() {
        let mut item = SearchResultItem::organic("t", "snippet", "https://x.test/");
        apply_outcome(&mut item, FetchOutcome::error("http status 503".to_string(), 3));
        assert_eq!(item.fetch_status, FetchStatus::Error);
        assert_eq!(item.content, "snippet");
        assert_eq!(item.error.as_deref(), Some("http status 503"));
    }

    #[test]
    fn apply_outcome_empty_success_content_keeps_snippet() {
        let mut item = SearchResultItem::organic("t", "snippet", "https://x.test/");
        let outcome = FetchOutcome::success(String::new(), String::new(), String::new(), 1, false);
        assert_eq!(outcome.status, OutcomeStatus::Success);
        apply_outcome(&mut item, outcome);
        assert_eq!(item.fetch_status, FetchStatus::Completed);
        assert_eq!(item.content, "snippet");
    }

    #[tokio::test]
    async fn batch_settles_every_item_and_ends_with_barrier() {
        let app = Router::new()
            .route(
                "/good",
                get(|| async { ([("content-type", "text/html")], page("good page body")) }),
            )
            .route(
                "/bad",
                get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
            );
        let addr = serve(app).await;

        let items = Arc::new(Mutex::new(vec![
            SearchResultItem::answer_box("box", "direct answer"),
            SearchResultItem::organic("g", "s1", format!("http://{addr}/good")),
            SearchResultItem::organic("b", "s2", format!("http://{addr}/bad")),
        ]));
        let (tx, rx) = mpsc::channel(64);
        let coordinator = FanOutCoordinator::new(fast_engine(), 5);
        coordinator
            .enrich(items.clone(), tx, CancellationToken::new())
            .await;

        let items = items.lock().await;
        for item in items.iter().filter(|i| i.needs_fetch) {
            assert!(item.fetch_status.is_terminal(), "non-terminal: {item:?}");
        }
        let good = items.iter().find(|i| i.link.ends_with("/good")).unwrap();
        assert_eq!(good.fetch_status, FetchStatus::Completed);
        assert!(good.content.contains("good page body"));
        let bad = items.iter().find(|i| i.link.ends_with("/bad")).unwrap();
        assert_eq!(bad.fetch_status, FetchStatus::Error);
        assert!(bad.error.is_some());
        drop(items);

        let events = drain(rx).await;
        // Per fetched item: a fetching update, a terminal update, a progress
        // status. Then the barrier.
        let updates: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::SearchResultUpdate { result } => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 4);
        for link in ["/good", "/bad"] {
            let pair: Vec<_> = updates.iter().filter(|u| u.link.ends_with(link)).collect();
            assert_eq!(pair[0].fetch_status, FetchStatus::Fetching);
            assert!(pair[1].fetch_status.is_terminal());
        }
        match events.last().unwrap() {
            StreamEvent::Status { status, .. } => assert_eq!(status, "parsing_completed"),
            other => panic!("expected barrier, got {other:?}"),
        }
        let last_progress = events
            .iter()
            .rev()
            .find_map(|e| match e {
                StreamEvent::Status { progress: Some(p), .. } => Some(*p),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_progress.completed, 2);
        assert_eq!(last_progress.percentage, 100.0);
    }

    #[tokio::test]
    async fn duplicate_link_items_all_settle_from_one_fetch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/page",
            get(move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    ([("content-type", "text/html")], page("shared page body"))
                }
            }),
        );
        let addr = serve(app).await;

        // The same link can appear twice when two searches surface one page.
        let link = format!("http://{addr}/page");
        let items = Arc::new(Mutex::new(vec![
            SearchResultItem::organic("a", "s1", link.clone()),
            SearchResultItem::organic("b", "s2", link.clone()),
        ]));
        let (tx, rx) = mpsc::channel(64);
        let coordinator = FanOutCoordinator::new(fast_engine(), 5);
        coordinator
            .enrich(items.clone(), tx, CancellationToken::new())
            .await;

        assert_eq!(hits.load(Ordering::SeqCst), 1, "shared link fetched once");
        for item in items.lock().await.iter() {
            assert_eq!(
                item.fetch_status,
                FetchStatus::Completed,
                "needs_fetch item left non-terminal: {item:?}"
            );
            assert!(item.content.contains("shared page body"));
        }

        let events = drain(rx).await;
        let updates = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::SearchResultUpdate { .. }))
            .count();
        // A fetching and a terminal update per item, not per link.
        assert_eq!(updates, 4);
        match events.last().unwrap() {
            StreamEvent::Status { status, .. } => assert_eq!(status, "parsing_completed"),
            other => panic!("expected barrier, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn in_flight_fetches_never_exceed_the_cap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));
        let (inf, hw) = (in_flight.clone(), high_water.clone());
        let app = Router::new().route(
            "/slow",
            get(move || {
                let inf = inf.clone();
                let hw = hw.clone();
                async move {
                    let now = inf.fetch_add(1, Ordering::SeqCst) + 1;
                    hw.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    inf.fetch_sub(1, Ordering::SeqCst);
                    ([("content-type", "text/html")], page("slow"))
                }
            }),
        );
        let addr = serve(app).await;

        // Distinct query strings keep the links distinct for merge identity;
        // the host is shared, so give the limiter a negligible interval.
        let items = Arc::new(Mutex::new(
            (0..8)
                .map(|i| SearchResultItem::organic("t", "s", format!("http://{addr}/slow?i={i}")))
                .collect::<Vec<_>>(),
        ));
        let (tx, rx) = mpsc::channel(128);
        let coordinator = FanOutCoordinator::new(fast_engine(), 3);
        coordinator
            .enrich(items.clone(), tx, CancellationToken::new())
            .await;
        drop(drain(rx).await);

        assert!(
            high_water.load(Ordering::SeqCst) <= 3,
            "cap exceeded: {}",
            high_water.load(Ordering::SeqCst)
        );
        for item in items.lock().await.iter() {
            assert!(item.fetch_status.is_terminal());
        }
    }

    #[tokio::test]
    async fn empty_batch_still_emits_the_barrier() {
        let items = Arc::new(Mutex::new(vec![SearchResultItem::answer_box("b", "a")]));
        let (tx, rx) = mpsc::channel(8);
        let coordinator = FanOutCoordinator::new(fast_engine(), 5);
        coordinator
            .enrich(items, tx, CancellationToken::new())
            .await;
        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Status { status, .. } => assert_eq!(status, "parsing_completed"),
            other => panic!("expected barrier, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pre_cancelled_batch_emits_nothing_and_fetches_nothing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/page",
            get(move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    ([("content-type", "text/html")], page("x"))
                }
            }),
        );
        let addr = serve(app).await;

        let items = Arc::new(Mutex::new(vec![SearchResultItem::organic(
            "t",
            "s",
            format!("http://{addr}/page"),
        )]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, rx) = mpsc::channel(8);
        let coordinator = FanOutCoordinator::new(fast_engine(), 5);
        coordinator.enrich(items, tx, cancel).await;

        assert!(drain(rx).await.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
