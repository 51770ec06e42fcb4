use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::cache::PageSummary;
use crate::error::QueryError;
use crate::operation::PageTarget;
use crate::operation::QueryKey;

const DEFAULT_THRESHOLD_PX: f64 = 200.0;

/// Source of pages for one list view.
#[async_trait]
pub trait PageLoader: Send + Sync {
    /// Key of the result set being paged through. Loads are deduplicated
    /// on it, so it must be the list key the cache remembers, not a shared
    /// slot key.
    fn key(&self) -> QueryKey;

    /// Progress so far; `None` until the first page is in.
    fn summary(&self) -> Option<PageSummary>;

    /// Whether the request gate currently admits a load.
    fn can_request(&self) -> bool;

    async fn load_page(&self, target: PageTarget) -> Result<PageSummary, QueryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadKey {
    pub key: QueryKey,
    pub target: PageTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(PageSummary),
    /// Nothing left to load.
    Exhausted,
    /// Another page of this list is still loading.
    Busy,
    /// The request gate is closed; no request was issued.
    Suppressed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrollSnapshot {
    pub is_loading: bool,
    pub has_more: bool,
    pub total_count: Option<u64>,
    pub current_count: usize,
    pub last_error: Option<QueryError>,
    pub suppressed: bool,
}

impl Default for ScrollSnapshot {
    fn default() -> Self {
        Self {
            is_loading: false,
            has_more: true,
            total_count: None,
            current_count: 0,
            last_error: None,
            suppressed: false,
        }
    }
}

impl ScrollSnapshot {
    fn apply_summary(&mut self, summary: &PageSummary) {
        self.has_more = summary.has_more;
        self.total_count = summary.total_count;
        self.current_count = summary.loaded;
    }
}

/// Scroll position of the list container, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub content_height: f64,
}

impl ScrollMetrics {
    pub fn distance_to_bottom(&self) -> f64 {
        (self.content_height - self.scroll_top - self.viewport_height).max(0.0)
    }
}

type LoadResult = Result<LoadOutcome, QueryError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Debug, Default)]
struct ScrollState {
    snapshot: ScrollSnapshot,
    trigger_pending: bool,
    generation: u64,
}

struct ControllerShared {
    loader: Arc<dyn PageLoader>,
    threshold_px: f64,
    state: Mutex<ScrollState>,
    inflight: Mutex<HashMap<LoadKey, SharedLoad>>,
    snapshot_tx: watch::Sender<ScrollSnapshot>,
}

impl ControllerShared {
    fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut ScrollState),
    {
        let snapshot = {
            let mut state = self.state.lock();
            mutate(&mut state);
            state.snapshot.clone()
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

/// Decides when a list view fetches its next page. Triggers are only
/// recorded; [`InfiniteScrollController::on_frame`] turns at most one of
/// them into a load per frame.
#[derive(Clone)]
pub struct InfiniteScrollController {
    shared: Arc<ControllerShared>,
}

impl InfiniteScrollController {
    pub fn new(loader: Arc<dyn PageLoader>) -> Self {
        Self::with_threshold(loader, DEFAULT_THRESHOLD_PX)
    }

    /// `threshold_px` is the distance from the bottom at which scrolling
    /// triggers a load.
    pub fn with_threshold(loader: Arc<dyn PageLoader>, threshold_px: f64) -> Self {
        let mut snapshot = ScrollSnapshot::default();
        if let Some(summary) = loader.summary() {
            snapshot.apply_summary(&summary);
        }
        let (snapshot_tx, _) = watch::channel(snapshot.clone());
        Self {
            shared: Arc::new(ControllerShared {
                loader,
                threshold_px,
                state: Mutex::new(ScrollState {
                    snapshot,
                    trigger_pending: false,
                    generation: 0,
                }),
                inflight: Mutex::new(HashMap::new()),
                snapshot_tx,
            }),
        }
    }

    pub fn snapshot(&self) -> ScrollSnapshot {
        self.shared.state.lock().snapshot.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScrollSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Sentinel element visibility changed.
    pub fn on_visibility(&self, visible: bool) {
        if visible {
            self.shared.state.lock().trigger_pending = true;
        }
    }

    /// Scroll fallback for hosts without visibility signals.
    pub fn on_scroll(&self, metrics: ScrollMetrics) {
        if metrics.distance_to_bottom() <= self.shared.threshold_px {
            self.shared.state.lock().trigger_pending = true;
        }
    }

    /// Consumes the pending trigger, if any, and loads the next page.
    pub async fn on_frame(&self) -> Option<LoadResult> {
        let triggered = std::mem::take(&mut self.shared.state.lock().trigger_pending);
        if !triggered {
            return None;
        }
        Some(self.load_more().await)
    }

    /// Loads the page after the last one loaded. A call made while the same
    /// page is already loading waits for that load instead of starting one.
    pub async fn load_more(&self) -> LoadResult {
        let pending = {
            let loader = &self.shared.loader;
            if !loader.can_request() {
                debug!("request gate closed; load suppressed");
                self.shared.update(|state| state.snapshot.suppressed = true);
                return Ok(LoadOutcome::Suppressed);
            }

            let target = match loader.summary() {
                None => PageTarget::First,
                Some(summary) => match (&summary.next, summary.has_more) {
                    (Some(target), true) => target.clone(),
                    _ => {
                        self.shared.update(|state| state.snapshot.apply_summary(&summary));
                        return Ok(LoadOutcome::Exhausted);
                    }
                },
            };
            let key = LoadKey {
                key: loader.key(),
                target: target.clone(),
            };

            let mut inflight = self.shared.inflight.lock();
            if let Some(pending) = inflight.get(&key) {
                debug!(key = %key.key, target = %key.target, "joining in-flight load");
                pending.clone()
            } else {
                let generation = {
                    let state = self.shared.state.lock();
                    if state.snapshot.is_loading {
                        return Ok(LoadOutcome::Busy);
                    }
                    state.generation
                };
                let pending = self.start_load(key.clone(), target, generation);
                inflight.insert(key, pending.clone());
                drop(inflight);
                self.shared.update(|state| {
                    state.snapshot.is_loading = true;
                    state.snapshot.suppressed = false;
                });
                pending
            }
        };
        pending.await
    }

    fn start_load(&self, key: LoadKey, target: PageTarget, generation: u64) -> SharedLoad {
        let shared = Arc::clone(&self.shared);
        async move {
            debug!(key = %key.key, target = %target, "loading page");
            let result = shared.loader.load_page(target).await;
            shared.inflight.lock().remove(&key);
            shared.update(|state| {
                if state.generation != generation {
                    return;
                }
                state.snapshot.is_loading = false;
                match &result {
                    Ok(summary) => {
                        state.snapshot.apply_summary(summary);
                        state.snapshot.last_error = None;
                        state.snapshot.suppressed = false;
                    }
                    Err(err) => {
                        state.snapshot.suppressed = err.is_blocking();
                        state.snapshot.last_error = Some(err.clone());
                    }
                }
            });
            result.map(LoadOutcome::Loaded)
        }
        .boxed()
        .shared()
    }

    /// Forgets all progress, typically after the list's cache entry was
    /// invalidated. Loads still in flight no longer update the snapshot.
    pub fn reset(&self) {
        self.shared.inflight.lock().clear();
        self.shared.update(|state| {
            state.generation += 1;
            state.trigger_pending = false;
            state.snapshot = ScrollSnapshot::default();
        });
    }
}

impl std::fmt::Debug for InfiniteScrollController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfiniteScrollController")
            .field("snapshot", &self.snapshot())
            .field("threshold_px", &self.shared.threshold_px)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::KeyScope;
    use futures::future::join;
    use pretty_assertions::assert_eq;
    use serde_json::Map;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    /// Two pages of two items each, served after a short delay.
    struct FakeLoader {
        loaded_pages: Mutex<u32>,
        calls: AtomicUsize,
        gate_open: AtomicBool,
        fail: AtomicBool,
    }

    impl FakeLoader {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                loaded_pages: Mutex::new(0),
                calls: AtomicUsize::new(0),
                gate_open: AtomicBool::new(true),
                fail: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn summary_for(pages: u32) -> PageSummary {
            PageSummary {
                loaded: pages as usize * 2,
                total_count: Some(4),
                has_more: pages < 2,
                next: (pages < 2).then(|| PageTarget::Page(pages + 1)),
            }
        }
    }

    #[async_trait]
    impl PageLoader for FakeLoader {
        fn key(&self) -> QueryKey {
            QueryKey::derive(KeyScope::Field("signals".into()), &Map::new(), None)
        }

        fn summary(&self) -> Option<PageSummary> {
            let pages = *self.loaded_pages.lock();
            (pages > 0).then(|| Self::summary_for(pages))
        }

        fn can_request(&self) -> bool {
            self.gate_open.load(Ordering::SeqCst)
        }

        async fn load_page(&self, target: PageTarget) -> Result<PageSummary, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(QueryError::Offline);
            }
            let page = match target {
                PageTarget::First => 1,
                PageTarget::Page(page) => page,
                PageTarget::After(_) => unreachable!("offset loader"),
            };
            *self.loaded_pages.lock() = page;
            Ok(Self::summary_for(page))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_load_more_issues_one_request() {
        let loader = FakeLoader::new();
        let controller = InfiniteScrollController::new(loader.clone());

        let (a, b) = join(controller.load_more(), controller.load_more()).await;

        assert_eq!(loader.calls(), 1);
        assert_eq!(a, b);
        assert_eq!(a, Ok(LoadOutcome::Loaded(FakeLoader::summary_for(1))));
        let snapshot = controller.snapshot();
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.current_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_list_is_a_no_op() {
        let loader = FakeLoader::new();
        let controller = InfiniteScrollController::new(loader.clone());
        controller.load_more().await.expect("page 1");
        controller.load_more().await.expect("page 2");

        let outcome = controller.load_more().await;

        assert_eq!(outcome, Ok(LoadOutcome::Exhausted));
        assert_eq!(loader.calls(), 2);
        assert!(!controller.snapshot().has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_within_one_frame_cause_one_load() {
        let loader = FakeLoader::new();
        let controller = InfiniteScrollController::new(loader.clone());

        controller.on_visibility(true);
        controller.on_scroll(ScrollMetrics {
            scroll_top: 900.0,
            viewport_height: 800.0,
            content_height: 1800.0,
        });
        controller.on_visibility(true);

        assert!(controller.on_frame().await.is_some());
        assert!(controller.on_frame().await.is_none());
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scrolling_far_from_bottom_does_not_trigger() {
        let loader = FakeLoader::new();
        let controller = InfiniteScrollController::new(loader.clone());

        controller.on_scroll(ScrollMetrics {
            scroll_top: 0.0,
            viewport_height: 800.0,
            content_height: 5000.0,
        });
        controller.on_visibility(false);

        assert!(controller.on_frame().await.is_none());
        assert_eq!(loader.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_gate_suppresses_load() {
        let loader = FakeLoader::new();
        loader.gate_open.store(false, Ordering::SeqCst);
        let controller = InfiniteScrollController::new(loader.clone());
        let rx = controller.subscribe();

        let outcome = controller.load_more().await;

        assert_eq!(outcome, Ok(LoadOutcome::Suppressed));
        assert_eq!(loader.calls(), 0);
        assert!(rx.borrow().suppressed);
        assert!(!rx.borrow().is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_surface_in_snapshot_without_retry() {
        let loader = FakeLoader::new();
        loader.fail.store(true, Ordering::SeqCst);
        let controller = InfiniteScrollController::new(loader.clone());

        let outcome = controller.load_more().await;

        assert_eq!(outcome, Err(QueryError::Offline));
        assert_eq!(loader.calls(), 1);
        let snapshot = controller.snapshot();
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.last_error, Some(QueryError::Offline));
        assert!(snapshot.suppressed);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forgets_progress() {
        let loader = FakeLoader::new();
        let controller = InfiniteScrollController::new(loader.clone());
        controller.load_more().await.expect("page 1");
        assert_eq!(controller.snapshot().current_count, 2);

        controller.reset();

        assert_eq!(controller.snapshot(), ScrollSnapshot::default());
    }
}
