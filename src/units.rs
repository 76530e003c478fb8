//! Command line quantities: byte sizes and durations with unit suffixes.

fn split_suffix(input: &str) -> (&str, Option<char>) {
    let input = input.trim();
    match input.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&input[..input.len() - 1], Some(c)),
        _ => (input, None),
    }
}

fn scaled(number: &str, factor: u64, input: &str) -> Result<u64, String> {
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid number in '{input}'"))?;
    value
        .checked_mul(factor)
        .ok_or_else(|| format!("'{input}' is too large"))
}

/// Bytes, with an optional `b`, `k`, `m` or `g` suffix (powers of 1024).
pub fn parse_size(input: &str) -> Result<u64, String> {
    let (number, suffix) = split_suffix(input);
    let factor = match suffix.map(|c| c.to_ascii_lowercase()) {
        None | Some('b') => 1,
        Some('k') => 1 << 10,
        Some('m') => 1 << 20,
        Some('g') => 1 << 30,
        Some(c) => return Err(format!("unknown size suffix '{c}' in '{input}'")),
    };
    scaled(number, factor, input)
}

/// Seconds, with an optional `s`, `m`, `h`, `d` or `y` suffix.
pub fn parse_duration(input: &str) -> Result<u64, String> {
    let (number, suffix) = split_suffix(input);
    let factor = match suffix.map(|c| c.to_ascii_lowercase()) {
        None | Some('s') => 1,
        Some('m') => 60,
        Some('h') => 60 * 60,
        Some('d') => 24 * 60 * 60,
        Some('y') => 365 * 24 * 60 * 60,
        Some(c) => return Err(format!("unknown time suffix '{c}' in '{input}'")),
    };
    scaled(number, factor, input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("12b"), Ok(12));
        assert_eq!(parse_size("4k"), Ok(4096));
        assert_eq!(parse_size("256M"), Ok(256 * 1024 * 1024));
        assert_eq!(parse_size("1g"), Ok(1 << 30));
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("10"), Ok(10));
        assert_eq!(parse_duration("10s"), Ok(10));
        assert_eq!(parse_duration("2m"), Ok(120));
        assert_eq!(parse_duration("1h"), Ok(3600));
        assert_eq!(parse_duration("1d"), Ok(86_400));
        assert_eq!(parse_duration("1y"), Ok(31_536_000));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("12q").is_err());
        assert!(parse_size("k").is_err());
        assert!(parse_size("-1k").is_err());
        assert!(parse_duration("5w").is_err());
        assert!(parse_size("99999999999999999g").is_err());
    }
}
