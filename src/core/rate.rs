//! Instantaneous throughput from cumulative counters.
//!
//! Speeds are byte deltas per snapshot interval. All previous values are
//! supplied by the caller; nothing here keeps history. A counter that goes
//! backwards (upstream reset) yields a speed of 0 rather than a negative one.

use serde::Serialize;

use super::snapshot::ConnectionRecord;

/// Download/upload byte delta over one snapshot interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Speed {
    pub download: u64,
    pub upload: u64,
}

/// Aggregate speed for one direction. Always 0 on the first snapshot of a session.
pub fn derive_aggregate_speed(prev_total: u64, curr_total: u64, is_first_snapshot: bool) -> u64 {
    if is_first_snapshot {
        return 0;
    }
    clamped_delta(prev_total, curr_total)
}

/// Per-connection speed against the previous observation with the same id.
pub fn derive_connection_speed(prev: Option<&ConnectionRecord>, curr: &ConnectionRecord) -> Speed {
    match prev {
        None => Speed::default(),
        Some(prev) => {
            if curr.download < prev.download || curr.upload < prev.upload {
                tracing::debug!(
                    "Counter regression on connection {}: dl {} -> {}, ul {} -> {}",
                    curr.id,
                    prev.download,
                    curr.download,
                    prev.upload,
                    curr.upload
                );
            }
            Speed {
                download: clamped_delta(prev.download, curr.download),
                upload: clamped_delta(prev.upload, curr.upload),
            }
        }
    }
}

fn clamped_delta(prev: u64, curr: u64) -> u64 {
    curr.saturating_sub(prev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::tests::make_record;

    #[test]
    fn test_aggregate_speed_first_snapshot_is_zero() {
        assert_eq!(derive_aggregate_speed(0, 1_000_000, true), 0);
        assert_eq!(derive_aggregate_speed(500, 1_000_000, true), 0);
    }

    #[test]
    fn test_aggregate_speed_is_delta() {
        assert_eq!(derive_aggregate_speed(1000, 1500, false), 500);
        assert_eq!(derive_aggregate_speed(1500, 1500, false), 0);
    }

    #[test]
    fn test_aggregate_speed_regression_clamps_to_zero() {
        assert_eq!(derive_aggregate_speed(2000, 100, false), 0);
    }

    #[test]
    fn test_connection_speed_new_connection_is_zero() {
        let curr = make_record("y", 42, 7);
        assert_eq!(derive_connection_speed(None, &curr), Speed::default());
    }

    #[test]
    fn test_connection_speed_is_delta() {
        let prev = make_record("x", 100, 10);
        let curr = make_record("x", 150, 35);
        assert_eq!(
            derive_connection_speed(Some(&prev), &curr),
            Speed {
                download: 50,
                upload: 25
            }
        );
    }

    #[test]
    fn test_connection_speed_regression_clamps_per_direction() {
        let prev = make_record("x", 500, 10);
        let curr = make_record("x", 20, 30);
        assert_eq!(
            derive_connection_speed(Some(&prev), &curr),
            Speed {
                download: 0,
                upload: 20
            }
        );
    }
}
