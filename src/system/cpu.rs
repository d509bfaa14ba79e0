//! CPU topology probing
//!
//! Recommends an inference thread count from the live core layout. Mobile
//! SoCs are heterogeneous, so cores whose maximum clock clears a fixed
//! threshold are treated as "big" cores and preferred for token generation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

use serde::Serialize;

const CPU_SYSFS_PATH: &str = "/sys/devices/system/cpu";

/// A core counts as high-performance at 2.0 GHz and above.
const BIG_CORE_THRESHOLD_KHZ: u64 = 2_000_000;

static CPU_DIR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^cpu\d+$").unwrap());

/// Recommended threading for one model load. Recomputed per load, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThreadConfig {
    /// Threads to hand to the native engine, always in `[1, total_cores]`.
    pub threads: usize,
    /// Logical processors available to the process.
    pub total_cores: usize,
    /// Cores at or above the big-core frequency threshold.
    pub high_performance_cores: usize,
    /// True when the recommendation pins to the big cores only.
    pub used_high_performance_only: bool,
}

/// Probe the host and recommend a thread configuration.
///
/// Never fails: an unreadable topology degrades to `total_cores` threads
/// with zero detected high-performance cores.
pub fn recommended_config() -> ThreadConfig {
    let total_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let config = recommended_config_at(total_cores, Path::new(CPU_SYSFS_PATH));
    tracing::debug!(
        threads = config.threads,
        total = config.total_cores,
        big = config.high_performance_cores,
        "CPU profile"
    );
    config
}

fn recommended_config_at(total_cores: usize, sysfs_root: &Path) -> ThreadConfig {
    let total_cores = total_cores.max(1);
    let high_performance_cores =
        detect_high_performance_cores(sysfs_root).min(total_cores);
    let threads = preferred_threads(total_cores, high_performance_cores);
    let used_high_performance_only =
        high_performance_cores >= 2 && threads <= high_performance_cores;

    ThreadConfig {
        threads,
        total_cores,
        high_performance_cores,
        used_high_performance_only,
    }
}

/// Thread choice: pin to big cores when there are at least two, otherwise
/// leave headroom on larger hosts so the UI thread keeps breathing.
fn preferred_threads(total_cores: usize, high_performance_cores: usize) -> usize {
    let preferred = if high_performance_cores >= 2 {
        high_performance_cores
    } else if total_cores >= 8 {
        total_cores - 2
    } else if total_cores >= 4 {
        total_cores - 1
    } else {
        total_cores
    };
    preferred.clamp(1, total_cores)
}

/// Count cores whose `cpuinfo_max_freq` clears the big-core threshold.
///
/// Per-entry best effort: unreadable or missing frequency files are skipped,
/// never treated as errors, and the whole scan never fails.
fn detect_high_performance_cores(sysfs_root: &Path) -> usize {
    let entries = match fs::read_dir(sysfs_root) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut count = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !CPU_DIR_PATTERN.is_match(name) {
            continue;
        }

        let freq_file = entry.path().join("cpufreq").join("cpuinfo_max_freq");
        let Ok(text) = fs::read_to_string(&freq_file) else {
            continue;
        };
        let Ok(freq_khz) = text.trim().parse::<u64>() else {
            continue;
        };

        if freq_khz >= BIG_CORE_THRESHOLD_KHZ {
            count += 1;
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_core(root: &Path, index: usize, max_freq_khz: Option<&str>) {
        let cpufreq = root.join(format!("cpu{}", index)).join("cpufreq");
        fs::create_dir_all(&cpufreq).unwrap();
        if let Some(freq) = max_freq_khz {
            fs::write(cpufreq.join("cpuinfo_max_freq"), freq).unwrap();
        }
    }

    #[test]
    fn test_preferred_threads_table() {
        // No big cores detected: leave headroom on larger hosts.
        assert_eq!(preferred_threads(8, 0), 6);
        assert_eq!(preferred_threads(4, 0), 3);
        assert_eq!(preferred_threads(3, 0), 3);
        assert_eq!(preferred_threads(1, 0), 1);

        // Two or more big cores: pin to them.
        assert_eq!(preferred_threads(8, 4), 4);
        assert_eq!(preferred_threads(8, 2), 2);

        // A single big core does not trigger pinning.
        assert_eq!(preferred_threads(8, 1), 6);
    }

    #[test]
    fn test_threads_always_in_bounds() {
        for total in 1..=16 {
            for perf in 0..=total {
                let threads = preferred_threads(total, perf);
                assert!(threads >= 1 && threads <= total);
            }
        }
    }

    #[test]
    fn test_detects_big_cores_from_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        write_core(dir.path(), 0, Some("1800000"));
        write_core(dir.path(), 1, Some("1800000"));
        write_core(dir.path(), 2, Some("2400000\n"));
        write_core(dir.path(), 3, Some("2800000"));

        assert_eq!(detect_high_performance_cores(dir.path()), 2);

        let config = recommended_config_at(4, dir.path());
        assert_eq!(config.threads, 2);
        assert_eq!(config.high_performance_cores, 2);
        assert!(config.used_high_performance_only);
    }

    #[test]
    fn test_unreadable_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_core(dir.path(), 0, Some("2600000"));
        write_core(dir.path(), 1, None); // no frequency file
        write_core(dir.path(), 2, Some("not-a-number"));
        fs::create_dir_all(dir.path().join("cpufreq")).unwrap(); // not a cpuN entry

        assert_eq!(detect_high_performance_cores(dir.path()), 1);
    }

    #[test]
    fn test_missing_sysfs_degrades_to_total_cores() {
        let config =
            recommended_config_at(3, Path::new("/nonexistent/sysfs/root"));
        assert_eq!(config.high_performance_cores, 0);
        assert_eq!(config.threads, 3);
        assert!(!config.used_high_performance_only);
    }

    #[test]
    fn test_perf_core_count_clamped_to_total() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            write_core(dir.path(), i, Some("3000000"));
        }

        // Process sees fewer cores than sysfs lists.
        let config = recommended_config_at(4, dir.path());
        assert_eq!(config.high_performance_cores, 4);
        assert_eq!(config.threads, 4);
    }

    #[test]
    fn test_live_recommendation_in_bounds() {
        let config = recommended_config();
        assert!(config.threads >= 1);
        assert!(config.threads <= config.total_cores);
        assert!(config.high_performance_cores <= config.total_cores);
    }
}
