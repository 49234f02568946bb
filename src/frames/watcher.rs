//! Navigation lifecycle watcher.
//!
//! A [`LifecycleWatcher`] answers "has frame F reached milestones M?". It
//! subscribes to its [`FrameManager`] and re-evaluates the completion
//! predicate from the current tree on every published event:
//!
//! - every required milestone fired in the frame and in every frame
//!   currently attached below it
//! - new document: the frame's loader differs from the one seen at creation
//! - same document: loader unchanged, and a same-document navigation of the
//!   frame was observed
//!
//! Four sources race: completion, frame detach, client disconnect, and the
//! deadline. The watcher is consumed by [`wait_for`](LifecycleWatcher::wait_for),
//! so it resolves at most once; dropping it unregisters its subscription.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::Subscription;
use crate::identifiers::{FrameKey, LoaderId};

use super::lifecycle::{LifecycleMilestone, protocol_names};
use super::manager::{FrameEvent, FrameManager};

// ============================================================================
// Outcomes
// ============================================================================

/// Kind of navigation a wait accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Either kind.
    Any,
    /// Loader must change.
    NewDocument,
    /// Loader must stay and a same-document navigation must be seen.
    SameDocument,
}

/// How a successful wait completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Fragment or history API navigation.
    SameDocument,
    /// A new document committed and reached the milestones.
    NewDocument,
}

/// Non-terminal wake-up vs. terminal failure.
enum Signal {
    Changed,
    Failed(Error),
}

// ============================================================================
// LifecycleWatcher
// ============================================================================

/// Single-shot wait for a frame's navigation milestones.
pub struct LifecycleWatcher {
    manager: FrameManager,
    frame: FrameKey,
    milestones: Vec<LifecycleMilestone>,
    expected: Vec<&'static str>,
    initial_loader: LoaderId,
    timeout: Duration,
    deadline: Option<Instant>,
    events: Subscription<FrameEvent>,
    closed: watch::Receiver<bool>,
    same_document: bool,
}

impl fmt::Debug for LifecycleWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleWatcher")
            .field("frame", &self.frame)
            .field("milestones", &self.milestones)
            .field("initial_loader", &self.initial_loader)
            .field("timeout", &self.timeout)
            .field("same_document", &self.same_document)
            .finish()
    }
}

impl LifecycleWatcher {
    /// Starts watching `frame`.
    ///
    /// The frame's current loader is the baseline for new-document
    /// detection. A zero `timeout` disables the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NavigationTerminated`] if the frame is not attached.
    pub fn new(
        manager: &FrameManager,
        frame: FrameKey,
        milestones: &[LifecycleMilestone],
        timeout: Duration,
    ) -> Result<Self> {
        // Subscribe before the snapshot so no mutation falls in between.
        let events = manager.subscribe();

        let initial_loader = manager
            .loader_of(frame)
            .ok_or_else(|| Error::navigation_terminated("Navigating frame was detached"))?;

        Ok(Self {
            manager: manager.clone(),
            frame,
            milestones: milestones.to_vec(),
            expected: protocol_names(milestones),
            initial_loader,
            timeout,
            deadline: (!timeout.is_zero()).then(|| Instant::now() + timeout),
            events,
            closed: manager.client().closed(),
            same_document: false,
        })
    }

    /// Returns the watched frame.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> FrameKey {
        self.frame
    }

    /// Awaits `future`, failing early if the watcher terminates or times out
    /// first.
    ///
    /// Events seen meanwhile still count toward the later
    /// [`wait_for`](Self::wait_for).
    ///
    /// # Errors
    ///
    /// The future's error, or the watcher's terminal error.
    pub async fn race<T, F>(&mut self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::pin!(future);

        loop {
            let signal = tokio::select! {
                biased;
                result = &mut future => return result,
                signal = self.next_signal() => signal,
            };

            if let Signal::Failed(error) = signal {
                return Err(error);
            }
        }
    }

    /// Waits until the navigation completes as `expectation` requires.
    ///
    /// # Errors
    ///
    /// - [`Error::NavigationTimeout`] naming the outstanding milestones
    /// - [`Error::NavigationTerminated`] on frame detach or disconnect
    pub async fn wait_for(mut self, expectation: Expectation) -> Result<NavigationOutcome> {
        loop {
            if let Some(outcome) = self.check(expectation)? {
                debug!(frame = %self.frame, ?outcome, "Navigation complete");
                return Ok(outcome);
            }

            if let Signal::Failed(error) = self.next_signal().await {
                return Err(error);
            }
        }
    }

    /// Evaluates the completion predicate against the current tree.
    fn check(&self, expectation: Expectation) -> Result<Option<NavigationOutcome>> {
        self.manager.with_tree(|tree| {
            let Some(node) = tree.get(self.frame) else {
                return Err(Error::navigation_terminated("Navigating frame was detached"));
            };

            if !tree.subtree_satisfies(self.frame, &self.expected) {
                return Ok(None);
            }

            let new_document = node.loader_id != self.initial_loader;
            let same_document = self.same_document && !new_document;

            Ok(match expectation {
                Expectation::NewDocument | Expectation::Any if new_document => {
                    Some(NavigationOutcome::NewDocument)
                }
                Expectation::SameDocument | Expectation::Any if same_document => {
                    Some(NavigationOutcome::SameDocument)
                }
                _ => None,
            })
        })
    }

    /// Waits for the next event, disconnect, or the deadline.
    async fn next_signal(&mut self) -> Signal {
        enum Woken {
            Disconnected,
            Event(Option<FrameEvent>),
            Deadline,
        }

        let deadline = self.deadline;
        let woken = tokio::select! {
            biased;
            _ = self.closed.wait_for(|closed| *closed) => Woken::Disconnected,
            event = self.events.recv() => Woken::Event(event),
            () = sleep_until_deadline(deadline) => Woken::Deadline,
        };

        match woken {
            Woken::Disconnected => Signal::Failed(Error::navigation_terminated(
                "Navigation failed because browser has disconnected",
            )),
            Woken::Event(None) => Signal::Failed(Error::navigation_terminated(
                "Frame manager was dropped",
            )),
            Woken::Event(Some(FrameEvent::FrameDetached(info))) if info.key == self.frame => {
                Signal::Failed(Error::navigation_terminated("Navigating frame was detached"))
            }
            Woken::Event(Some(FrameEvent::NavigatedWithinDocument(info)))
                if info.key == self.frame =>
            {
                self.same_document = true;
                Signal::Changed
            }
            Woken::Event(Some(_)) => Signal::Changed,
            Woken::Deadline => Signal::Failed(self.timeout_error()),
        }
    }

    fn timeout_error(&self) -> Error {
        let mut outstanding: Vec<String> = self.manager.with_tree(|tree| {
            self.milestones
                .iter()
                .filter(|m| !tree.subtree_satisfies(self.frame, &[m.protocol_name()]))
                .map(|m| m.as_str().to_string())
                .collect()
        });
        if outstanding.is_empty() {
            outstanding.push("navigation".to_string());
        }

        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        debug!(frame = %self.frame, timeout_ms, ?outstanding, "Navigation timed out");
        Error::navigation_timeout(timeout_ms, outstanding)
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use serde_json::json;
    use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready};

    use crate::test_support::{StubChannel, StubReply};
    use crate::transport::CommandChannel;

    const LOAD: &[LifecycleMilestone] = &[LifecycleMilestone::Load];
    const LONG: Duration = Duration::from_secs(30);

    fn navigated(channel: &StubChannel, id: &str, parent: Option<&str>, loader: &str) {
        let mut frame = json!({ "id": id, "loaderId": loader, "url": "https://site.test/" });
        if let Some(parent) = parent {
            frame["parentId"] = json!(parent);
        }
        channel.emit("Page.frameNavigated", json!({ "frame": frame }));
    }

    fn lifecycle(channel: &StubChannel, id: &str, loader: &str, name: &str) {
        channel.emit(
            "Page.lifecycleEvent",
            json!({ "frameId": id, "loaderId": loader, "name": name, "timestamp": 1.0 }),
        );
    }

    fn detach(channel: &StubChannel, id: &str) {
        channel.emit("Page.frameDetached", json!({ "frameId": id, "reason": "remove" }));
    }

    fn setup() -> (Arc<StubChannel>, FrameManager, FrameKey) {
        let channel = StubChannel::new();
        let manager = FrameManager::new(channel.clone());
        navigated(&channel, "main", None, "L1");
        let main = manager.main_frame().expect("main").key;
        (channel, manager, main)
    }

    #[tokio::test]
    async fn test_resolves_only_after_load() {
        let (channel, manager, main) = setup();
        let watcher = assert_ok!(LifecycleWatcher::new(&manager, main, LOAD, LONG));
        let mut wait = tokio_test::task::spawn(watcher.wait_for(Expectation::NewDocument));

        navigated(&channel, "main", None, "L2");
        lifecycle(&channel, "main", "L2", "DOMContentLoaded");
        assert_pending!(wait.poll());

        lifecycle(&channel, "main", "L2", "load");
        let outcome = assert_ok!(assert_ready!(wait.poll()));
        assert_eq!(outcome, NavigationOutcome::NewDocument);
    }

    #[tokio::test]
    async fn test_child_attached_mid_wait_blocks_until_detached() {
        let (channel, manager, main) = setup();
        let watcher = assert_ok!(LifecycleWatcher::new(&manager, main, LOAD, LONG));
        let mut wait = tokio_test::task::spawn(watcher.wait_for(Expectation::NewDocument));

        navigated(&channel, "main", None, "L2");
        channel.emit("Page.frameAttached", json!({ "frameId": "ad", "parentFrameId": "main" }));
        lifecycle(&channel, "main", "L2", "load");
        assert_pending!(wait.poll());

        detach(&channel, "ad");
        let outcome = assert_ok!(assert_ready!(wait.poll()));
        assert_eq!(outcome, NavigationOutcome::NewDocument);
    }

    #[tokio::test]
    async fn test_child_milestones_count() {
        let (channel, manager, main) = setup();
        let watcher = assert_ok!(LifecycleWatcher::new(&manager, main, LOAD, LONG));
        let mut wait = tokio_test::task::spawn(watcher.wait_for(Expectation::Any));

        navigated(&channel, "main", None, "L2");
        navigated(&channel, "child", Some("main"), "C1");
        // Child may finish before its parent.
        lifecycle(&channel, "child", "C1", "load");
        assert_pending!(wait.poll());

        lifecycle(&channel, "main", "L2", "load");
        assert_eq!(
            assert_ok!(assert_ready!(wait.poll())),
            NavigationOutcome::NewDocument
        );
    }

    #[tokio::test]
    async fn test_stale_load_of_previous_loader_is_ignored() {
        let (channel, manager, main) = setup();
        let watcher = assert_ok!(LifecycleWatcher::new(&manager, main, LOAD, LONG));
        let mut wait = tokio_test::task::spawn(watcher.wait_for(Expectation::NewDocument));

        navigated(&channel, "main", None, "L2");
        lifecycle(&channel, "main", "L1", "load");
        assert_pending!(wait.poll());
        assert!(!manager.main_frame().expect("main").has_lifecycle_event("load"));

        lifecycle(&channel, "main", "L2", "load");
        assert_ok!(assert_ready!(wait.poll()));
    }

    #[tokio::test]
    async fn test_timeout_reports_outstanding_and_cleans_up() {
        let (_channel, manager, main) = setup();
        let milestones = [LifecycleMilestone::Load, LifecycleMilestone::NetworkIdle0];
        let started = Instant::now();
        let watcher = assert_ok!(LifecycleWatcher::new(
            &manager,
            main,
            &milestones,
            Duration::from_millis(50)
        ));
        assert_eq!(manager.listener_count(), 1);

        let err = assert_err!(watcher.wait_for(Expectation::NewDocument).await);

        assert!(started.elapsed() >= Duration::from_millis(50));
        match err {
            Error::NavigationTimeout {
                timeout_ms,
                outstanding,
            } => {
                assert_eq!(timeout_ms, 50);
                assert_eq!(outstanding, ["load", "networkidle0"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(manager.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_with_milestones_met_reports_navigation() {
        let (channel, manager, main) = setup();
        lifecycle(&channel, "main", "L1", "load");

        let watcher = assert_ok!(LifecycleWatcher::new(
            &manager,
            main,
            LOAD,
            Duration::from_millis(20)
        ));
        let err = assert_err!(watcher.wait_for(Expectation::NewDocument).await);

        assert!(matches!(
            err,
            Error::NavigationTimeout { ref outstanding, .. } if outstanding == &["navigation"]
        ));
    }

    #[tokio::test]
    async fn test_detach_of_ancestor_terminates() {
        let (channel, manager, _main) = setup();
        navigated(&channel, "child", Some("main"), "C1");
        navigated(&channel, "grand", Some("child"), "G1");
        let grand = manager.frame(&"grand".into()).expect("grand").key;

        let watcher = assert_ok!(LifecycleWatcher::new(&manager, grand, LOAD, LONG));
        let mut wait = tokio_test::task::spawn(watcher.wait_for(Expectation::NewDocument));
        assert_pending!(wait.poll());

        detach(&channel, "child");
        let err = assert_err!(assert_ready!(wait.poll()));
        assert!(matches!(err, Error::NavigationTerminated { .. }));
        assert!(err.to_string().contains("detached"));
    }

    #[tokio::test]
    async fn test_disconnect_terminates() {
        let (channel, manager, main) = setup();
        let watcher = assert_ok!(LifecycleWatcher::new(&manager, main, LOAD, LONG));
        let mut wait = tokio_test::task::spawn(watcher.wait_for(Expectation::NewDocument));
        assert_pending!(wait.poll());

        channel.disconnect();
        let err = assert_err!(assert_ready!(wait.poll()));
        assert!(err.to_string().contains("disconnected"));
    }

    #[tokio::test]
    async fn test_same_document_navigation() {
        let (channel, manager, main) = setup();
        lifecycle(&channel, "main", "L1", "load");

        let watcher = assert_ok!(LifecycleWatcher::new(&manager, main, LOAD, LONG));
        let mut wait = tokio_test::task::spawn(watcher.wait_for(Expectation::Any));
        assert_pending!(wait.poll());

        channel.emit(
            "Page.navigatedWithinDocument",
            json!({ "frameId": "main", "url": "https://site.test/#b" }),
        );
        assert_eq!(
            assert_ok!(assert_ready!(wait.poll())),
            NavigationOutcome::SameDocument
        );
    }

    #[tokio::test]
    async fn test_same_document_signal_does_not_satisfy_new_document() {
        let (channel, manager, main) = setup();
        lifecycle(&channel, "main", "L1", "load");

        let watcher = assert_ok!(LifecycleWatcher::new(&manager, main, LOAD, LONG));
        let mut wait = tokio_test::task::spawn(watcher.wait_for(Expectation::NewDocument));

        channel.emit(
            "Page.navigatedWithinDocument",
            json!({ "frameId": "main", "url": "https://site.test/#b" }),
        );
        assert_pending!(wait.poll());
    }

    #[tokio::test]
    async fn test_empty_milestones_resolve_at_commit() {
        let (channel, manager, main) = setup();
        let watcher = assert_ok!(LifecycleWatcher::new(&manager, main, &[], LONG));
        let mut wait = tokio_test::task::spawn(watcher.wait_for(Expectation::NewDocument));
        assert_pending!(wait.poll());

        navigated(&channel, "main", None, "L2");
        assert_ok!(assert_ready!(wait.poll()));
    }

    #[tokio::test]
    async fn test_race_returns_future_result_and_keeps_events() {
        let (channel, manager, main) = setup();
        channel.reply("Page.navigate", StubReply::Value(json!({ "loaderId": "L2" })));
        let mut watcher = assert_ok!(LifecycleWatcher::new(&manager, main, LOAD, LONG));

        navigated(&channel, "main", None, "L2");
        lifecycle(&channel, "main", "L2", "load");

        let response = assert_ok!(
            watcher
                .race(channel.send("Page.navigate", json!({ "url": "https://site.test/" })))
                .await
        );
        assert_eq!(response["loaderId"], "L2");
        assert_eq!(
            assert_ok!(watcher.wait_for(Expectation::NewDocument).await),
            NavigationOutcome::NewDocument
        );
    }

    #[tokio::test]
    async fn test_race_fails_on_disconnect() {
        let (channel, manager, main) = setup();
        channel.reply("Page.navigate", StubReply::Hang);
        let mut watcher = assert_ok!(LifecycleWatcher::new(&manager, main, LOAD, LONG));
        channel.disconnect();

        let err = assert_err!(
            watcher
                .race(channel.send("Page.navigate", json!({})))
                .await
        );
        assert!(matches!(err, Error::NavigationTerminated { .. }));
    }

    #[test]
    fn test_new_on_unknown_frame_fails() {
        let channel = StubChannel::new();
        let manager = FrameManager::new(channel);

        let result = LifecycleWatcher::new(&manager, FrameKey::new(42), LOAD, LONG);
        assert!(matches!(result, Err(Error::NavigationTerminated { .. })));
        assert_eq!(manager.listener_count(), 0);
    }
}
