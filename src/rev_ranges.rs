//! Revision ranges, as written in rule attributes like `Revs="5,12-20"`.
//!
//! A range list is kept normalized: sorted by start, with overlapping and
//! adjacent ranges merged.

use crate::errors::ConfigError;

/// A normalized, inclusive list of revision ranges.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RevRanges {
    ranges: Vec<(u32, u32)>,
}

impl RevRanges {
    /// Parse a comma-separated list of `N` and `N-M` items.
    pub fn parse(text: &str) -> Result<RevRanges, ConfigError> {
        let mut ranges = Vec::new();

        for item in text.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            let (start, end) = match item.split_once('-') {
                Some((a, b)) => (parse_rev(a, text)?, parse_rev(b, text)?),
                None => {
                    let n = parse_rev(item, text)?;
                    (n, n)
                }
            };

            if start > end {
                return Err(ConfigError::BadRevRange {
                    text: text.to_string(),
                });
            }

            ranges.push((start, end));
        }

        Ok(RevRanges {
            ranges: normalize(ranges),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// True if `rev` falls inside any range.
    pub fn contains(&self, rev: u32) -> bool {
        self.ranges
            .iter()
            .any(|&(start, end)| rev >= start && rev <= end)
    }

    pub fn to_text(&self) -> String {
        let items: Vec<String> = self
            .ranges
            .iter()
            .map(|&(start, end)| {
                if start == end {
                    format!("{}", start)
                } else if start + 1 == end {
                    format!("{},{}", start, end)
                } else {
                    format!("{}-{}", start, end)
                }
            })
            .collect();
        items.join(",")
    }
}

fn parse_rev(item: &str, whole: &str) -> Result<u32, ConfigError> {
    item.trim().parse().map_err(|_| ConfigError::BadRevRange {
        text: whole.to_string(),
    })
}

fn normalize(mut ranges: Vec<(u32, u32)>) -> Vec<(u32, u32)> {
    ranges.sort_unstable();

    let mut result: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match result.last_mut() {
            Some(prev) if start <= prev.1.saturating_add(1) => {
                if end > prev.1 {
                    prev.1 = end;
                }
            }
            _ => result.push((start, end)),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_revision() {
        let r = RevRanges::parse("5").unwrap();
        assert!(r.contains(5));
        assert!(!r.contains(4));
        assert!(!r.contains(6));
        assert_eq!(r.to_text(), "5");
    }

    #[test]
    fn merges_overlapping() {
        let r = RevRanges::parse("10-20,15-25,3").unwrap();
        assert_eq!(r.to_text(), "3,10-25");
        assert!(r.contains(3));
        assert!(r.contains(10));
        assert!(r.contains(25));
        assert!(!r.contains(9));
        assert!(!r.contains(26));
    }

    #[test]
    fn merges_adjacent() {
        let r = RevRanges::parse("1-3,4-6").unwrap();
        assert_eq!(r.to_text(), "1-6");
    }

    #[test]
    fn two_wide_range_prints_as_pair() {
        let r = RevRanges::parse("7-8").unwrap();
        assert_eq!(r.to_text(), "7,8");
    }

    #[test]
    fn empty_text() {
        let r = RevRanges::parse("").unwrap();
        assert!(r.is_empty());
        assert!(!r.contains(1));
    }

    #[test]
    fn rejects_garbage() {
        assert!(RevRanges::parse("abc").is_err());
        assert!(RevRanges::parse("5-").is_err());
        assert!(RevRanges::parse("9-3").is_err());
    }
}
