use std::fmt::Display;

/// Half open address range `[start, end)` within a bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:#06X}, {:#06X})", self.start, self.end)
    }
}

impl Range {
    pub fn new(start: usize, size: usize) -> Self {
        Self {
            start,
            end: start + size,
        }
    }

    pub fn length(&self) -> usize {
        self.end - self.start
    }

    /// Whether the range lies completely within a bank of the given size
    pub fn fits(&self, size: usize) -> bool {
        self.end <= size
    }
}

#[cfg(test)]
mod tests {
    use super::Range;

    #[test]
    fn ut_range_new() {
        let range = Range::new(123, 45);
        assert_eq!(range.start, 123);
        assert_eq!(range.end, 168);
        assert_eq!(range.length(), 45);
    }

    #[test]
    fn ut_range_fits() {
        assert!(Range::new(0, 1000).fits(1000));
        assert!(Range::new(999, 1).fits(1000));
        assert!(!Range::new(999, 2).fits(1000));
        assert!(Range::new(1000, 0).fits(1000));
        assert!(!Range::new(0, 1).fits(0));
    }

    #[test]
    fn ut_range_display() {
        assert_eq!(Range::new(16, 2).to_string(), "[0x0010, 0x0012)");
    }
}
