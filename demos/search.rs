//! Type-ahead search demo.
//!
//! Run with:
//!
//! ```text
//! RUST_LOG=sendstate=debug cargo run --example search
//! ```
//!
//! Simulates a user typing into a catalog search box. Each keystroke
//! dispatches a debounced query action, so only the final spelling reaches
//! the (fake) backend; a background reindex runs alongside without ever
//! touching the visible screen state.

use std::sync::Arc;
use std::time::Duration;

use sendstate::{ActionRole, Executor, MachineAction, MachineState, Transition};
use tokio::sync::RwLock;
use tracing::info;

#[derive(Clone, Debug, PartialEq)]
enum Screen {
    Browse,
    Searching,
}

impl MachineState for Screen {
    fn initial() -> Self {
        Screen::Browse
    }
}

#[derive(Clone, Debug)]
enum Input {
    Query(String),
    Reindex,
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum InputKey {
    Query,
    Reindex,
    Clear,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Activity {
    Indexing,
}

impl MachineAction for Input {
    type Key = InputKey;

    fn key(&self) -> InputKey {
        match self {
            Input::Query(_) => InputKey::Query,
            Input::Reindex => InputKey::Reindex,
            Input::Clear => InputKey::Clear,
        }
    }

    fn role(&self) -> ActionRole {
        match self {
            Input::Clear => ActionRole::Cancel,
            _ => ActionRole::Normal,
        }
    }
}

const CATALOG: &[&str] = &[
    "The Rust Programming Language",
    "Programming Rust",
    "Rust for Rustaceans",
    "Async programming in practice",
    "Zero To Production",
];

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sendstate=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let results: Arc<RwLock<Vec<String>>> = Arc::new(RwLock::new(Vec::new()));

    let executor: Executor<Screen, Input, Activity> =
        Executor::new(|action, _state| match action {
            Input::Query(_) => {
                Transition::looping(Screen::Searching).debounce(Duration::from_millis(150))
            }
            Input::Reindex => Transition::background(Activity::Indexing),
            Input::Clear => Transition::to(Screen::Browse),
        });

    let store = results.clone();
    executor.add_handler(InputKey::Query, move |action: Input| {
        let store = store.clone();
        async move {
            let Input::Query(text) = action else { return Ok(()) };
            info!("searching catalog for {:?}", text);
            // Stand-in for backend latency.
            tokio::time::sleep(Duration::from_millis(80)).await;

            let needle = text.to_lowercase();
            let mut matches: Vec<String> = CATALOG
                .iter()
                .filter(|title| title.to_lowercase().contains(&needle))
                .map(|title| title.to_string())
                .collect();
            matches.sort();
            *store.write().await = matches;
            Ok(())
        }
    });

    executor.add_handler(InputKey::Reindex, |_: Input| async {
        info!("reindexing catalog");
        tokio::time::sleep(Duration::from_millis(400)).await;
        info!("reindex finished");
        Ok(())
    });

    // Print every visible screen change as a frontend would. Commits of an
    // unchanged value (each keystroke re-enters Searching) are skipped.
    let mut screens = executor.watch_state();
    tokio::spawn(async move {
        let mut shown = screens.borrow_and_update().clone();
        while screens.changed().await.is_ok() {
            let screen = screens.borrow_and_update().clone();
            if screen != shown {
                println!("screen: {:?}", screen);
                shown = screen;
            }
        }
    });

    // A reindex kicked off in the background; the screen stays on Browse.
    executor.dispatch_background(Input::Reindex);
    println!("active markers: {:?}", executor.active_markers());

    // The user types "rust", one keystroke at a time. Every keystroke
    // lands inside the previous one's debounce window, so only the last
    // spelling is ever sent to the backend.
    for keystroke in ["r", "ru", "rus", "rust"] {
        executor.dispatch(Input::Query(keystroke.to_string()));
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    executor.send(Input::Query("rust".to_string())).await;
    println!("results for \"rust\":");
    for title in results.read().await.iter() {
        println!("  - {}", title);
    }

    // Escape cancels anything still running and returns to browsing.
    executor.send(Input::Clear).await;
    println!("final screen: {:?}", executor.state());
}
