//! # Process Execution Environment
//!
//! Process-wide defaults consulted by the unit engine. There is exactly
//! one tunable: the default byte-order conversion applied to unformatted
//! connections whose `CONVERT=` was left `Unknown`, read once from the
//! `RECIO_CONVERT` environment variable.
//!
//! ## Recognized Values
//!
//! | `RECIO_CONVERT` | Effect |
//! |-----------------|--------|
//! | `UNKNOWN` | native order |
//! | `NATIVE` | native order |
//! | `LITTLE_ENDIAN` | swap on big-endian hosts |
//! | `BIG_ENDIAN` | swap on little-endian hosts |
//! | `SWAP` | swap unconditionally |
//!
//! An unrecognized value is reported once through `tracing` and treated
//! as `UNKNOWN`. The variable is sampled on first use and cached for the
//! life of the process; connections resolve their swap bit at `OPEN`
//! time, so changing the variable afterwards has no effect.

use once_cell::sync::Lazy;
use tracing::warn;

use crate::types::Convert;

/// Host byte order, fixed at compile time.
pub const HOST_LITTLE_ENDIAN: bool = cfg!(target_endian = "little");

/// Environment variable naming the default conversion mode.
pub const CONVERT_ENV_VAR: &str = "RECIO_CONVERT";

static DEFAULT_CONVERSION: Lazy<Convert> = Lazy::new(|| {
    match std::env::var(CONVERT_ENV_VAR) {
        Ok(value) => Convert::parse(&value).unwrap_or_else(|| {
            warn!(
                var = CONVERT_ENV_VAR,
                value = value.as_str(),
                "unrecognized conversion mode, using native byte order"
            );
            Convert::Unknown
        }),
        Err(_) => Convert::Unknown,
    }
});

/// The process-wide conversion default for `Convert::Unknown` connections.
pub fn default_conversion() -> Convert {
    *DEFAULT_CONVERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_conversion_is_stable_across_calls() {
        assert_eq!(default_conversion(), default_conversion());
    }

    #[test]
    fn host_order_matches_target_endianness() {
        assert_eq!(HOST_LITTLE_ENDIAN, cfg!(target_endian = "little"));
    }
}
