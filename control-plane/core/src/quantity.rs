//! Parsing for the subset of Kubernetes resource quantities that apps may
//! request.

/// Milli-cpu cap for any single container.
pub const MAX_CPU_MILLIS: u64 = 500;

/// Memory cap for any single container (1Gi).
pub const MAX_MEMORY_BYTES: u64 = 1 << 30;

const BINARY_SUFFIXES: &[(&str, u64)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
];

const DECIMAL_SUFFIXES: &[(&str, u64)] = &[
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
];

/// Parses a cpu quantity (`250m`, `0.5`, `1`) into milli-cpus.
pub fn cpu_millis(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(millis) = s.strip_suffix('m') {
        return parse_scaled(millis, 1);
    }
    parse_scaled(s, 1_000)
}

/// Parses a memory quantity (`128Mi`, `1G`, `1048576`) into bytes.
pub fn memory_bytes(s: &str) -> Option<u64> {
    let s = s.trim();
    for (suffix, scale) in BINARY_SUFFIXES.iter().chain(DECIMAL_SUFFIXES) {
        if let Some(value) = s.strip_suffix(suffix) {
            return parse_scaled(value, *scale);
        }
    }
    parse_scaled(s, 1)
}

fn parse_scaled(value: &str, scale: u64) -> Option<u64> {
    if value.is_empty()
        || !value.chars().all(|c| c.is_ascii_digit() || c == '.')
        || value.chars().filter(|c| *c == '.').count() > 1
    {
        return None;
    }

    match value.split_once('.') {
        None => value.parse::<u64>().ok()?.checked_mul(scale),
        Some((whole, fraction)) => {
            let whole = if whole.is_empty() {
                0
            } else {
                whole.parse::<u64>().ok()?
            };
            let fraction = format!("0.{}", if fraction.is_empty() { "0" } else { fraction })
                .parse::<f64>()
                .ok()?;
            let scaled = whole.checked_mul(scale)?;
            // Kubernetes rounds fractional quantities up to the smallest unit.
            Some(scaled + (fraction * scale as f64).ceil() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpu() {
        assert_eq!(cpu_millis("100m"), Some(100));
        assert_eq!(cpu_millis("500m"), Some(500));
        assert_eq!(cpu_millis("0.5"), Some(500));
        assert_eq!(cpu_millis("1"), Some(1_000));
        assert_eq!(cpu_millis(".25"), Some(250));
        assert_eq!(cpu_millis(""), None);
        assert_eq!(cpu_millis("m"), None);
        assert_eq!(cpu_millis("-1"), None);
        assert_eq!(cpu_millis("1.2.3"), None);
    }

    #[test]
    fn parses_memory() {
        assert_eq!(memory_bytes("128Mi"), Some(128 << 20));
        assert_eq!(memory_bytes("1Gi"), Some(MAX_MEMORY_BYTES));
        assert_eq!(memory_bytes("0.5Gi"), Some(512 << 20));
        assert_eq!(memory_bytes("512M"), Some(512_000_000));
        assert_eq!(memory_bytes("1048576"), Some(1 << 20));
        assert_eq!(memory_bytes("12Qi"), None);
        assert_eq!(memory_bytes("Mi"), None);
    }
}
