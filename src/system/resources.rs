//! System resource monitoring
//!
//! Best-effort RAM snapshot, logged before a model load so failure reports
//! carry memory context.

/// System memory usage
#[derive(Debug, Clone, Default)]
pub struct ResourceUsage {
    pub ram_used_mb: u64,
    pub ram_total_mb: u64,
}

/// Get system memory usage (best effort)
///
/// Reads `/proc/meminfo`; returns zeros when the file is missing or malformed.
pub fn get_resource_usage() -> ResourceUsage {
    match std::fs::read_to_string("/proc/meminfo") {
        Ok(contents) => parse_meminfo(&contents),
        Err(_) => ResourceUsage::default(),
    }
}

fn parse_meminfo(contents: &str) -> ResourceUsage {
    let mut total_kb: Option<u64> = None;
    let mut available_kb: Option<u64> = None;

    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = parse_kb_value(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = parse_kb_value(rest);
        }
        if total_kb.is_some() && available_kb.is_some() {
            break;
        }
    }

    match (total_kb, available_kb) {
        (Some(total), Some(available)) if total > 0 => ResourceUsage {
            ram_used_mb: total.saturating_sub(available) / 1024,
            ram_total_mb: total / 1024,
        },
        _ => ResourceUsage::default(),
    }
}

/// Parse the numeric part of a meminfo line like `   16303632 kB`
fn parse_kb_value(rest: &str) -> Option<u64> {
    rest.split_whitespace().next()?.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meminfo() {
        let sample = "MemTotal:       16303632 kB\n\
                      MemFree:         1029940 kB\n\
                      MemAvailable:    8237520 kB\n\
                      Buffers:          563400 kB\n";
        let usage = parse_meminfo(sample);
        assert_eq!(usage.ram_total_mb, 16303632 / 1024);
        assert_eq!(usage.ram_used_mb, (16303632 - 8237520) / 1024);
    }

    #[test]
    fn test_malformed_meminfo_defaults_to_zero() {
        let usage = parse_meminfo("MemTotal: lots\n");
        assert_eq!(usage.ram_total_mb, 0);
        assert_eq!(usage.ram_used_mb, 0);
    }

    #[test]
    fn test_missing_available_defaults_to_zero() {
        let usage = parse_meminfo("MemTotal: 1024 kB\n");
        assert_eq!(usage.ram_total_mb, 0);
    }
}
