//! Segment count selection: deterministic formula, not adaptive
//! telemetry. Supersedes host-throughput stepping heuristic
//! (`host_policy::state::adaptive`), which is kept only as advisory stats.

const MIB: u64 = 1024 * 1024;
const SMALL_FILE_THRESHOLD: u64 = 100 * MIB;

/// Given a file size `size_bytes` and a user ceiling `c_max` in `[1, 8]`,
/// returns the number of segments to use. The ceiling is a hard upper bound:
/// the heuristic may return fewer but never more.
pub fn select_segment_count(size_bytes: u64, c_max: u32) -> u32 {
    let c_max = c_max.clamp(1, 8);
    if size_bytes < SMALL_FILE_THRESHOLD {
        return 1;
    }
    let k = (size_bytes / (50 * MIB)) as u32;
    let k = k.max(1);
    let capped = if size_bytes <= 500 * MIB {
        k.min(4)
    } else if size_bytes <= 1024 * MIB {
        k.min(8)
    } else {
        k
    };
    capped.clamp(1, c_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_100mib_is_single_segment() {
        assert_eq!(select_segment_count(50 * MIB, 8), 1);
        assert_eq!(select_segment_count(99 * MIB, 8), 1);
    }

    #[test]
    fn zero_bytes_is_single_segment() {
        assert_eq!(select_segment_count(0, 8), 1);
    }

    #[test]
    fn ceiling_is_a_hard_upper_bound() {
        assert_eq!(select_segment_count(10 * 1024 * MIB, 1), 1);
        assert_eq!(select_segment_count(10 * 1024 * MIB, 3), 3);
    }

    #[test]
    fn eight_hundred_mib_with_ceiling_eight_is_eight_segments() {
        // 800 MiB / 50 MiB = 16, capped to 8 for size <= 1 GiB, clamped to ceiling 8.
        assert_eq!(select_segment_count(800 * MIB, 8), 8);
    }

    #[test]
    fn five_hundred_mib_boundary_caps_at_four() {
        assert_eq!(select_segment_count(500 * MIB, 8), 4);
    }

    #[test]
    fn over_one_gib_can_exceed_eight_before_ceiling_clamp() {
        // 2 GiB / 50 MiB = 40, no size-based cap beyond 1 GiB, but ceiling still wins.
        assert_eq!(select_segment_count(2048 * MIB, 8), 8);
    }

    #[test]
    fn ceiling_out_of_range_is_clamped_to_one_to_eight() {
        assert_eq!(select_segment_count(800 * MIB, 0), 1);
        assert_eq!(select_segment_count(800 * MIB, 99), 8);
    }
}
