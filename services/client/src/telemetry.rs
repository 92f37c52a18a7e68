//! Tracing subscriber setup for hosts that do not install their own.

use tracing::Level;

/// Installs a fmt subscriber with local RFC 3339 timestamps and `level` as the
/// maximum level.
///
/// Returns `false` if a global subscriber was already set, which is not an error.
pub fn init_tracing(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing(Level::DEBUG);
        assert!(!init_tracing(Level::INFO));
    }
}
