//! Environment driven configuration knobs.
//!
//! Sizes accept an optional `K`, `M` or `G` suffix, optionally followed by `B`
//! (`FULLGC_HEAP_SIZE=64M`, `FULLGC_REGION_SIZE=256kb`).

fn split_size_suffix(value: &str) -> (&str, usize) {
    let value = value.trim();
    let value = match value.strip_suffix(|c: char| c == 'b' || c == 'B') {
        Some(rest) if !rest.is_empty() && !rest.ends_with(|c: char| c.is_ascii_digit()) => rest,
        _ => value,
    };

    match value.chars().last() {
        Some('g') | Some('G') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        Some('m') | Some('M') => (&value[..value.len() - 1], 1024 * 1024),
        Some('k') | Some('K') => (&value[..value.len() - 1], 1024),
        _ => (value, 1),
    }
}

fn parse_float_and_factor(value: &str) -> Option<(f64, usize)> {
    if value.is_empty() {
        return None;
    }
    let (number, factor) = split_size_suffix(value);
    number.parse::<f64>().ok().map(|x| (x, factor))
}

pub fn parse_uint(value: &str) -> Option<usize> {
    let (value, factor) = parse_float_and_factor(value)?;
    if value < 0.0 {
        return None;
    }
    Some((value * factor as f64) as usize)
}

pub fn read_uint_from_env(var: &str) -> Option<usize> {
    std::env::var(var).ok().and_then(|value| parse_uint(&value))
}

pub fn read_string_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

pub fn read_bool_from_env(var: &str) -> Option<bool> {
    let value = read_string_from_env(var)?;
    match value.trim() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
