//! Tracing setup
//!
//! The engine only emits `tracing` events; installing a subscriber is the
//! embedding application's choice. `init_tracing` installs a formatting
//! subscriber filtered by `RUST_LOG` (e.g. `RUST_LOG=tally_engine=debug`).

/// Install a `RUST_LOG`-filtered fmt subscriber.
///
/// Safe to call more than once; calls after the first global subscriber is
/// installed are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
