//! Demonstrates the service registry's distributed lock recipe against the
//! in-memory reference store: attempts to acquire `<lock_name>`, holds it
//! for a short window while logging its holder tag, then releases it.
//!
//! This binary is a demo, not a production lock client — there's no real
//! ZooKeeper ensemble behind it, just the same process's in-memory store.

use std::time::Duration;

use clap::Parser;
use registry_errors::RegistryError;
use rf_contrib_registry::{Frame, MemoryStore};

const DEPARTMENT: &str = "cmd";
const SERVICE: &str = "registry-lock";
const HOLD_WINDOW: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "registry-lock", about = "Acquire and hold a named distributed lock", version)]
struct Args {
    /// Name of the lock to acquire (becomes /cmd/registry-lock/lock_<name>).
    lock_name: String,

    /// Seconds to wait for acquisition; 0 attempts once and returns immediately.
    #[arg(default_value_t = 3)]
    seconds: u64,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> std::process::ExitCode {
    init_logging();
    let args = Args::parse();

    let store = MemoryStore::new();
    let (client, events) = store.open_session();
    let frame = match Frame::new(std::sync::Arc::new(client), events, "dc1") {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct frame");
            return exit_code_for(&e);
        }
    };

    tracing::info!(holder = %frame.holder_tag(), lock = %args.lock_name, timeout_s = args.seconds, "attempting to acquire lock");

    match frame.try_lock(DEPARTMENT, SERVICE, &args.lock_name, args.seconds) {
        Ok(true) => {
            tracing::info!(holder = %frame.holder_tag(), "lock acquired, holding for demonstration window");
            std::thread::sleep(HOLD_WINDOW);
            match frame.unlock(DEPARTMENT, SERVICE, &args.lock_name) {
                Ok(true) => tracing::info!("lock released"),
                Ok(false) => tracing::warn!("lock was no longer held at release time"),
                Err(e) => tracing::error!(error = %e, "failed to release lock"),
            }
            std::process::ExitCode::SUCCESS
        }
        Ok(false) => {
            tracing::warn!(lock = %args.lock_name, "failed to acquire lock within the timeout");
            std::process::ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "lock acquisition errored");
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(error: &RegistryError) -> std::process::ExitCode {
    std::process::ExitCode::from((error.code() % 256) as u8)
}
