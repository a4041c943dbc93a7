use std::fmt;

use crate::LeakReport;

/// First line of the analysis block.
pub const ANALYSIS_HEADER: &str = "===== Analysis =====";

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", ANALYSIS_HEADER)?;
        writeln!(f, "Total allocated size: {}B", self.total_allocated)?;
        writeln!(f, "Total deallocated size (at least): {}B", self.total_freed)?;
        writeln!(f, "Total leaked size (at most): {}B", self.leaked_bytes())?;
        writeln!(f, "Total leaked count: {}", self.leaked_count())?;
        for leak in &self.confirmed {
            writeln!(f, "Confirmed leaked array: {}B in {}", leak.size, leak.location)?;
        }
        for leak in &self.possible {
            writeln!(f, "Possible leaked object: {}B in {}", leak.size, leak.location)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::analyze;
    use leak_track_types::{AllocationEvent, AllocationKind, FreeKind, SourceLocation};

    #[test]
    fn renders_labeled_block() {
        let events = vec![
            AllocationEvent::allocation(
                SourceLocation::new("src/main.rs", "main", 4),
                AllocationKind::Scalar,
                10,
                0xA,
            ),
            AllocationEvent::allocation(
                SourceLocation::new("src/main.rs", "fill", 9),
                AllocationKind::Array,
                30,
                0xC,
            ),
            AllocationEvent::allocation(
                SourceLocation::new("src/main.rs", "main", 6),
                AllocationKind::Scalar,
                20,
                0xB,
            ),
            AllocationEvent::free(SourceLocation::new("src/main.rs", "main", 7), FreeKind::Scalar),
        ];
        let expected = "\
===== Analysis =====
Total allocated size: 60B
Total deallocated size (at least): 20B
Total leaked size (at most): 40B
Total leaked count: 2
Confirmed leaked array: 30B in fill in src/main.rs:9
Possible leaked object: 10B in main in src/main.rs:4
";
        assert_eq!(analyze(&events).to_string(), expected);
    }

    #[test]
    fn no_leak_lines_when_balanced() {
        let events = vec![
            AllocationEvent::allocation(
                SourceLocation::new("a.rs", "f", 1),
                AllocationKind::Array,
                8,
                0x1,
            ),
            AllocationEvent::free(SourceLocation::new("a.rs", "f", 2), FreeKind::Array(0x1)),
        ];
        let rendered = analyze(&events).to_string();
        assert!(rendered.ends_with("Total leaked count: 0\n"));
    }
}
