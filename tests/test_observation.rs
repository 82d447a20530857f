// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025-2026 Sendstate Contributors

//! Observation surfaces: snapshots, watch channels, and the
//! action-occurred stream.

use std::time::Duration;

use sendstate::{ExecError, Executor, MachineAction, MachineState, Transition};
use tokio::sync::broadcast;

#[derive(Clone, Debug, PartialEq)]
enum Page {
    Home,
    Loading,
    Article,
}

impl MachineState for Page {
    fn initial() -> Self {
        Page::Home
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Go {
    Open,
    Back,
    Blocked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum GoKey {
    Open,
    Back,
    Blocked,
}

impl MachineAction for Go {
    type Key = GoKey;

    fn key(&self) -> GoKey {
        match self {
            Go::Open => GoKey::Open,
            Go::Back => GoKey::Back,
            Go::Blocked => GoKey::Blocked,
        }
    }
}

fn executor() -> Executor<Page, Go> {
    Executor::new(|action, _state| match action {
        Go::Open => Transition::to(Page::Article).via(Page::Loading),
        Go::Back => Transition::to(Page::Home),
        // Never eligible: Loading is not a state this can start from.
        Go::Blocked => Transition::none().required([Page::Loading]),
    })
}

#[tokio::test]
async fn watch_state_observes_both_commits() {
    let exec = executor();
    exec.add_handler(GoKey::Open, |_: Go| async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(())
    });

    let mut watcher = exec.watch_state();
    assert_eq!(*watcher.borrow(), Page::Home);

    exec.dispatch(Go::Open);
    watcher.changed().await.unwrap();
    assert_eq!(*watcher.borrow_and_update(), Page::Loading);
    watcher.changed().await.unwrap();
    assert_eq!(*watcher.borrow_and_update(), Page::Article);
}

#[tokio::test]
async fn watch_error_observes_recorded_failures() {
    let exec = executor();
    exec.add_handler(GoKey::Open, |_: Go| async {
        Err(ExecError::handler("404"))
    });

    let mut errors = exec.watch_error();
    assert!(errors.borrow().is_none());

    exec.dispatch(Go::Open);
    errors
        .wait_for(|err| *err == Some(ExecError::Handler("404".into())))
        .await
        .unwrap();
}

#[tokio::test]
async fn action_stream_sees_dropped_dispatches() {
    let exec = executor();
    exec.add_handler(GoKey::Blocked, |_: Go| async { Ok(()) });

    let mut actions = exec.subscribe_actions();

    // The guard drops this dispatch, but the stream still carries it.
    exec.send(Go::Blocked).await;
    assert_eq!(exec.state(), Page::Home);
    assert_eq!(actions.recv().await.unwrap(), Go::Blocked);

    // So does a dispatch with no handlers at all.
    exec.send(Go::Back).await;
    assert_eq!(actions.recv().await.unwrap(), Go::Back);
}

#[tokio::test]
async fn slow_action_subscribers_lag_rather_than_stall() {
    let exec: Executor<Page, Go> =
        Executor::with_action_capacity(|_, _| Transition::to(Page::Home), 1);
    exec.add_handler(GoKey::Back, |_: Go| async { Ok(()) });

    let mut actions = exec.subscribe_actions();
    for _ in 0..4 {
        exec.send(Go::Back).await;
    }

    // Capacity 1: this subscriber missed three actions and is told so
    // instead of blocking dispatch.
    assert!(matches!(
        actions.recv().await,
        Err(broadcast::error::RecvError::Lagged(3))
    ));
    assert_eq!(actions.recv().await.unwrap(), Go::Back);
}

#[tokio::test]
async fn in_flight_inspection_follows_dispatch_lifecycle() {
    let exec = executor();
    exec.add_handler(GoKey::Open, |_: Go| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    });

    assert!(!exec.is_in_flight(GoKey::Open));
    assert_eq!(exec.in_flight_count(), 0);

    exec.dispatch(Go::Open);
    assert!(exec.is_in_flight(GoKey::Open));
    assert_eq!(exec.in_flight_count(), 1);

    let mut watcher = exec.watch_state();
    watcher
        .wait_for(|state| *state == Page::Article)
        .await
        .unwrap();
    assert!(!exec.is_in_flight(GoKey::Open));
    assert_eq!(exec.in_flight_count(), 0);
}

#[tokio::test]
async fn snapshots_are_readable_from_inside_handlers() {
    let exec = executor();
    let observer = exec.clone();
    exec.add_handler(GoKey::Open, move |_: Go| {
        let observer = observer.clone();
        async move {
            // Reads are watch-backed and never touch the dispatch lock.
            if observer.state() == Page::Loading {
                Ok(())
            } else {
                Err(ExecError::handler("intermediate not visible"))
            }
        }
    });

    exec.send(Go::Open).await;
    assert_eq!(exec.state(), Page::Article);
    assert!(exec.last_error().is_none());
}

#[tokio::test]
async fn clones_share_one_machine() {
    let exec = executor();
    let other = exec.clone();
    exec.add_handler(GoKey::Back, |_: Go| async { Ok(()) });
    exec.add_handler(GoKey::Open, |_: Go| async { Ok(()) });

    other.send(Go::Open).await;
    assert_eq!(exec.state(), Page::Article);

    exec.send(Go::Back).await;
    assert_eq!(other.state(), Page::Home);
}
