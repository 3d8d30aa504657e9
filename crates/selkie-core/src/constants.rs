//! TigerStyle constants for selkie
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Object Identity Limits
// =============================================================================

/// Maximum length of an object identity in bytes
pub const OBJECT_ID_LENGTH_BYTES_MAX: usize = 1024;

/// Length of a system-assigned object identity in bytes
/// (adapter ordinal u32 + sequence u32, both big-endian)
pub const SYSTEM_OBJECT_ID_LENGTH_BYTES: usize = 8;

// =============================================================================
// Adapter Limits
// =============================================================================

/// Maximum length of an adapter name in bytes
pub const ADAPTER_NAME_LENGTH_BYTES_MAX: usize = 128;

/// Maximum number of concurrently active objects per adapter
pub const ADAPTER_OBJECTS_COUNT_MAX: usize = 1_000_000;

/// Maximum number of adapters governed by a single manager
pub const MANAGER_ADAPTERS_COUNT_MAX: usize = 10_000;

// =============================================================================
// Observability - Metric Names (TigerStyle: explicit, with units)
// =============================================================================

/// Metric: Total number of object activations (counter)
pub const METRIC_NAME_OBJECTS_ACTIVATED_TOTAL: &str = "selkie_objects_activated_total";

/// Metric: Total number of object deactivations (counter)
pub const METRIC_NAME_OBJECTS_DEACTIVATED_TOTAL: &str = "selkie_objects_deactivated_total";

/// Metric: Total number of servant resolutions (counter, labels: outcome)
pub const METRIC_NAME_RESOLUTIONS_TOTAL: &str = "selkie_resolutions_total";

/// Metric: Total number of admission decisions (counter, labels: outcome)
pub const METRIC_NAME_ADMISSIONS_TOTAL: &str = "selkie_admissions_total";

// Compile-time assertions for constant validity
const _: () = {
    assert!(OBJECT_ID_LENGTH_BYTES_MAX >= 64);
    assert!(SYSTEM_OBJECT_ID_LENGTH_BYTES == 8);
    assert!(SYSTEM_OBJECT_ID_LENGTH_BYTES <= OBJECT_ID_LENGTH_BYTES_MAX);
    assert!(ADAPTER_NAME_LENGTH_BYTES_MAX >= 16);
    assert!(ADAPTER_OBJECTS_COUNT_MAX >= 1024);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_have_units_in_names() {
        // This test documents the naming convention:
        // byte limits end in _BYTES(_MAX), counts in _COUNT_MAX.
        let _: usize = OBJECT_ID_LENGTH_BYTES_MAX;
        let _: usize = SYSTEM_OBJECT_ID_LENGTH_BYTES;
        let _: usize = ADAPTER_OBJECTS_COUNT_MAX;
    }
}
