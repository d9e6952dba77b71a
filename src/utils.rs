use std::fmt;

/// Human readable byte count, rendered as `B`, `K`, `M` or `G`.
#[derive(Clone, Copy, PartialEq)]
pub struct FormattedSize {
    pub size: f64,
}

impl fmt::Display for FormattedSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const K: f64 = 1024.0;

        if self.size < K {
            return write!(f, "{}B", self.size);
        }
        if self.size < K * K {
            return write!(f, "{:.1}K", self.size / K);
        }
        if self.size < 8.0 * K * K * K {
            return write!(f, "{:.1}M", self.size / (K * K));
        }
        write!(f, "{:.1}G", self.size / (K * K * K))
    }
}

impl fmt::Debug for FormattedSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

pub fn formatted_size(size: usize) -> FormattedSize {
    FormattedSize { size: size as f64 }
}

/// Percentage of `part` in `total`, 0 when `total` is 0.
pub fn percent_of(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes() {
        assert_eq!(formatted_size(512).to_string(), "512B");
        assert_eq!(formatted_size(2048).to_string(), "2.0K");
        assert_eq!(formatted_size(3 * 1024 * 1024).to_string(), "3.0M");
        assert_eq!(formatted_size(16 * 1024 * 1024 * 1024).to_string(), "16.0G");
    }
}
