//! Foldstore Counter - command-line counter backed by a record log.
//!
//! Each argument is dispatched to a store in order. The store's history is a
//! JSON-lines file, so the counter picks up where the previous run stopped.
//!
//! ```text
//! foldstore-counter add add subtract reset-negative show
//! ```

mod config;
mod error;
mod file_log;
mod logic;

use crate::config::Config;
use crate::error::AppError;
use crate::file_log::FileRepository;
use crate::logic::{Command, Counter, Outcome};
use foldstore_engine::{Store, StoreOptions};
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// One command-line argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Dispatch(Command),
    /// Print a JSON snapshot of the store
    Show,
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "show" => Ok(Action::Show),
            other => other.parse().map(Action::Dispatch),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foldstore_counter=info,foldstore_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "Counter failed");
        return Err(err.into());
    }

    Ok(())
}

async fn run() -> error::Result<()> {
    let config = Config::from_env()?;
    let actions = std::env::args()
        .skip(1)
        .map(|arg| arg.parse::<Action>())
        .collect::<error::Result<Vec<_>>>()?;

    let repository = FileRepository::<Command, Outcome>::load(&config.log_path)?;
    tracing::info!(
        path = %repository.path().display(),
        records = repository.len(),
        "Opened record log"
    );

    let store = Store::with_options(
        Counter::new(config.step),
        |command: Option<&Command>, state: &i64| match command {
            Some(command) => tracing::info!(?command, state, "Applied"),
            None => tracing::debug!(state, "Replayed record log"),
        },
        move |listener| repository.watch(listener),
        StoreOptions::named("counter"),
    );

    for action in actions {
        match action {
            Action::Dispatch(command) => {
                let id = store.dispatch(command).await?;
                tracing::debug!(record_id = %id, "Committed");
            }
            Action::Show => println!("{}", store.snapshot().await?.to_json()?),
        }
    }

    println!("{}", store.state().await?);
    store.close().await?;

    Ok(())
}
