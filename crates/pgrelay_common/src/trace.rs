//! Wire-level debug dumps, gated by the `DEBUG_PG_SERVER` env var.
//!
//! When enabled, every decoded command and every emitted response is
//! logged with its code name and a compact field dump. The flag is read
//! once per process.

use std::sync::OnceLock;

static WIRE_DEBUG: OnceLock<bool> = OnceLock::new();

/// Whether `DEBUG_PG_SERVER=true` (or `1`) is set.
pub fn wire_debug_enabled() -> bool {
    *WIRE_DEBUG.get_or_init(|| {
        matches!(
            std::env::var("DEBUG_PG_SERVER").ok().as_deref(),
            Some("true") | Some("1")
        )
    })
}

/// Dump one decoded/emitted message. `direction` reads like "client→",
/// "→client", "→upstream".
pub fn log_message(direction: &str, session_id: i32, name: &str, detail: &dyn std::fmt::Debug) {
    if wire_debug_enabled() {
        tracing::info!(
            target: "pgrelay::wire",
            "[session {}] {} {}: {:?}",
            session_id,
            direction,
            name,
            detail
        );
    }
}
