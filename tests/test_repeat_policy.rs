//! Same-kind collision handling: preempt by default, drop under Ignore.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sendstate::{Executor, MachineAction, MachineState, RepeatPolicy, Transition};

#[derive(Clone, Debug, PartialEq)]
enum Feed {
    Ready,
}

impl MachineState for Feed {
    fn initial() -> Self {
        Feed::Ready
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Refresh {
    Pull,
    Push,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RefreshKey {
    Pull,
    Push,
}

impl MachineAction for Refresh {
    type Key = RefreshKey;

    fn key(&self) -> RefreshKey {
        match self {
            Refresh::Pull => RefreshKey::Pull,
            Refresh::Push => RefreshKey::Push,
        }
    }
}

struct Counters {
    started: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

fn slow_counting(exec: &Executor<Feed, Refresh>, key: RefreshKey, work: Duration) -> Counters {
    let started = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let s = started.clone();
    let c = completed.clone();
    exec.add_handler(key, move |_: Refresh| {
        let s = s.clone();
        let c = c.clone();
        async move {
            s.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(work).await;
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    Counters { started, completed }
}

fn executor() -> Executor<Feed, Refresh> {
    Executor::new(|action, _state| match action {
        Refresh::Pull => Transition::none(),
        Refresh::Push => Transition::none().on_repeat(RepeatPolicy::Ignore),
    })
}

#[tokio::test]
async fn default_policy_preempts_in_flight_dispatch() {
    let exec = executor();
    let counters = slow_counting(&exec, RefreshKey::Pull, Duration::from_millis(100));

    exec.dispatch(Refresh::Pull);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(counters.started.load(Ordering::SeqCst), 1);

    // Redispatch aborts the sleeping first run and starts over.
    exec.send(Refresh::Pull).await;

    assert_eq!(counters.started.load(Ordering::SeqCst), 2);
    assert_eq!(counters.completed.load(Ordering::SeqCst), 1);
    assert_eq!(exec.in_flight_count(), 0);
}

#[tokio::test]
async fn ignore_policy_drops_the_newcomer() {
    let exec = executor();
    let counters = slow_counting(&exec, RefreshKey::Push, Duration::from_millis(80));

    exec.dispatch(Refresh::Push);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // This one is dropped; the first run keeps its task.
    exec.send(Refresh::Push).await;
    assert!(exec.is_in_flight(RefreshKey::Push));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    assert_eq!(counters.completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn distinct_kinds_do_not_collide() {
    let exec = executor();
    let pulls = slow_counting(&exec, RefreshKey::Pull, Duration::from_millis(50));
    let pushes = slow_counting(&exec, RefreshKey::Push, Duration::from_millis(50));

    exec.dispatch(Refresh::Pull);
    exec.dispatch(Refresh::Push);
    assert_eq!(exec.in_flight_count(), 2);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(pulls.completed.load(Ordering::SeqCst), 1);
    assert_eq!(pushes.completed.load(Ordering::SeqCst), 1);
    assert_eq!(exec.in_flight_count(), 0);
}
