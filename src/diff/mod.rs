//! Unified diff helpers.
//!
//! Used to sanity-check report comments against the lines a PR actually
//! touches, and to style-check only the added lines of a patch.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

/// Represents the type of a line in a diff patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    /// Line added in the new version (starts with +)
    Added,
    /// Line removed from the old version (starts with -)
    Removed,
    /// Context line, unchanged (starts with space)
    Context,
    /// Hunk header (@@ ... @@)
    Header,
    /// Metadata lines (diff --, +++, index, etc.)
    Meta,
}

/// Classify a line and strip its diff prefix
pub fn classify_line(line: &str) -> (LineType, &str) {
    if line.starts_with("@@") {
        (LineType::Header, line)
    } else if line.starts_with("+++")
        || line.starts_with("---")
        || line.starts_with("diff ")
        || line.starts_with("index ")
        || line.starts_with("new file mode")
        || line.starts_with("deleted file mode")
        || line.starts_with("similarity index")
        || line.starts_with("rename ")
        || line.starts_with("\\ No newline")
    {
        (LineType::Meta, line)
    } else if let Some(content) = line.strip_prefix('+') {
        (LineType::Added, content)
    } else if let Some(content) = line.strip_prefix('-') {
        (LineType::Removed, content)
    } else if let Some(content) = line.strip_prefix(' ') {
        (LineType::Context, content)
    } else {
        (LineType::Context, line)
    }
}

/// New-file start line from `@@ -a,b +c,d @@`
pub fn parse_hunk_header(line: &str) -> Option<u32> {
    parse_hunk_range(line).map(|range| range.new_start)
}

/// Line counts of a hunk, from `@@ -a,b +c,d @@`. An omitted count is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkRange {
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
}

pub fn parse_hunk_range(line: &str) -> Option<HunkRange> {
    let mut parts = line.strip_prefix("@@")?.split_whitespace();
    let (_, old_count) = parse_range(parts.next()?.strip_prefix('-')?)?;
    let (new_start, new_count) = parse_range(parts.next()?.strip_prefix('+')?)?;
    Some(HunkRange {
        old_count,
        new_start,
        new_count,
    })
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Classify a line inside a hunk body by its first character only, so
/// `+++x` is an added line and `--x` a removed one.
fn classify_hunk_line(line: &str) -> (LineType, &str) {
    match line.as_bytes().first() {
        Some(b'+') => (LineType::Added, &line[1..]),
        Some(b'-') => (LineType::Removed, &line[1..]),
        Some(b' ') => (LineType::Context, &line[1..]),
        Some(b'\\') => (LineType::Meta, line),
        // some tools strip the space of empty context lines
        _ => (LineType::Context, line),
    }
}

/// Walk a patch and yield `(new_line_number, line_type, content)` for every
/// line on the new side or removed from the old side.
fn walk_patch(patch: &str) -> impl Iterator<Item = (Option<u32>, LineType, &str)> {
    let mut next_new: Option<u32> = None;
    // lines still expected in the current hunk, (old, new)
    let mut remaining = (0u32, 0u32);
    patch.lines().filter_map(move |line| {
        if line.starts_with("diff ") {
            // a new file starts even if the last hunk came up short
            remaining = (0, 0);
        }
        let in_hunk = remaining != (0, 0);
        let (line_type, content) = if in_hunk {
            classify_hunk_line(line)
        } else {
            classify_line(line)
        };
        match line_type {
            LineType::Header => {
                let range = parse_hunk_range(line);
                next_new = range.map(|r| r.new_start);
                remaining = range.map_or((0, 0), |r| (r.old_count, r.new_count));
                None
            }
            LineType::Meta => None,
            LineType::Removed => {
                remaining.0 = remaining.0.saturating_sub(1);
                Some((None, line_type, content))
            }
            LineType::Added | LineType::Context => {
                if line_type == LineType::Context {
                    remaining.0 = remaining.0.saturating_sub(1);
                }
                remaining.1 = remaining.1.saturating_sub(1);
                let current = next_new?;
                next_new = Some(current + 1);
                Some((Some(current), line_type, content))
            }
        }
    })
}

/// Added lines with their line number in the new file
pub fn added_lines(patch: &str) -> Vec<(u32, &str)> {
    walk_patch(patch)
        .filter_map(|(n, t, content)| match (n, t) {
            (Some(n), LineType::Added) => Some((n, content)),
            _ => None,
        })
        .collect()
}

/// Every new-file line number visible in the patch (added or context)
pub fn new_side_lines(patch: &str) -> BTreeSet<u32> {
    walk_patch(patch).filter_map(|(n, _, _)| n).collect()
}

/// Split a unified diff (`git diff`, GitHub `.diff`) into per-file patches,
/// keyed by the new filename without `a/` / `b/` prefixes.
pub fn parse_unified_diff(unified_diff: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let lines: Vec<&str> = unified_diff.lines().collect();

    let mut start: Option<usize> = None;
    let mut filename: Option<String> = None;
    let mut old_filename: Option<String> = None;

    let mut flush = |start: Option<usize>, filename: Option<String>, end: usize| {
        if let (Some(start), Some(name)) = (start, filename) {
            result.insert(name, lines[start..end].join("\n"));
        }
    };

    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("diff --git ") {
            flush(start, filename.take(), i);
            start = Some(i);
            filename = filename_from_git_header(line);
            old_filename = None;
        } else if filename.is_none() && start.is_some() {
            // Header was ambiguous; fall back to ---/+++ lines
            if let Some(rest) = line.strip_prefix("--- ") {
                old_filename = strip_diff_prefix(rest);
            } else if let Some(rest) = line.strip_prefix("+++ ") {
                filename = strip_diff_prefix(rest).or_else(|| old_filename.take());
            }
        }
    }
    flush(start, filename, lines.len());

    result
}

/// Strip a single-char diff prefix (`a/`, `b/`, `w/`, ...). `/dev/null` yields `None`.
fn strip_diff_prefix(path: &str) -> Option<String> {
    let path = path.trim_end();
    if path == "/dev/null" {
        return None;
    }
    match path.as_bytes() {
        [_, b'/', ..] => Some(path[2..].to_string()),
        _ => Some(path.to_string()),
    }
}

/// New filename from `diff --git a/x b/y`.
///
/// Returns `None` when a path containing ` b/` makes the split ambiguous;
/// the caller then reads the `+++` line.
fn filename_from_git_header(line: &str) -> Option<String> {
    let content = line.strip_prefix("diff --git ")?;
    let bytes = content.as_bytes();
    if bytes.len() < 2 || bytes[1] != b'/' {
        debug!(line, "unrecognised diff header");
        return None;
    }

    // Unrenamed file: "X/path Y/path" with both halves equal
    let rest = &content[2..];
    if rest.len() >= 3 && (rest.len() - 3) % 2 == 0 {
        let half = (rest.len() - 3) / 2;
        if rest.is_char_boundary(half) && rest.is_char_boundary(half + 3) {
            let (old, new) = (&rest[..half], &rest[half + 3..]);
            if old == new && rest.as_bytes()[half] == b' ' {
                return Some(new.to_string());
            }
        }
    }

    // Renamed file: exactly one " Y/" separator must exist
    let second = match bytes[0] {
        b'a' => " b/",
        b'c' | b'i' | b'o' => " w/",
        _ => return None,
    };
    let mut matches = rest.match_indices(second);
    match (matches.next(), matches.next()) {
        (Some((idx, _)), None) if idx + 3 < rest.len() => Some(rest[idx + 3..].to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FILES: &str = "\
diff --git a/src/app.py b/src/app.py
index 83db48f..bf269f4 100644
--- a/src/app.py
+++ b/src/app.py
@@ -10,3 +10,4 @@ def main():
     setup()
-    run()
+    run(fast=True)
+    report()
     teardown()
diff --git a/README.md b/README.md
new file mode 100644
--- /dev/null
+++ b/README.md
@@ -0,0 +1,2 @@
+# Title
+Body
";

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("+added"), (LineType::Added, "added"));
        assert_eq!(classify_line("-removed"), (LineType::Removed, "removed"));
        assert_eq!(classify_line(" ctx"), (LineType::Context, "ctx"));
        assert_eq!(classify_line("+++ b/x").0, LineType::Meta);
        assert_eq!(classify_line("@@ -1 +1 @@").0, LineType::Header);
        assert_eq!(classify_line("").0, LineType::Context);
    }

    #[test]
    fn test_parse_hunk_range() {
        assert_eq!(
            parse_hunk_range("@@ -10,4 +12,5 @@ fn x()"),
            Some(HunkRange {
                old_count: 4,
                new_start: 12,
                new_count: 5
            })
        );
        assert_eq!(
            parse_hunk_range("@@ -1 +1 @@"),
            Some(HunkRange {
                old_count: 1,
                new_start: 1,
                new_count: 1
            })
        );
        assert_eq!(parse_hunk_range("@@ garbage @@"), None);
    }

    #[test]
    fn test_added_line_starting_with_plus_plus() {
        let patch = "@@ -1,1 +1,3 @@\n a\n+++counter;\n+b\n";
        assert_eq!(added_lines(patch), vec![(2, "++counter;"), (3, "b")]);
    }

    #[test]
    fn test_removed_line_starting_with_dash_dash() {
        let patch = "@@ -1,4 +1,3 @@\n a\n--- old sql comment\n-x\n+y\n c\n";
        assert_eq!(added_lines(patch), vec![(2, "y")]);
        assert_eq!(new_side_lines(patch), BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn test_file_headers_after_hunk_are_meta() {
        let diff = "@@ -1 +1 @@\n-a\n+b\n--- a/next.rs\n+++ b/next.rs\n@@ -0,0 +1 @@\n+c\n";
        assert_eq!(added_lines(diff), vec![(1, "b"), (1, "c")]);
    }

    #[test]
    fn test_parse_hunk_header() {
        assert_eq!(parse_hunk_header("@@ -10,4 +12,5 @@ fn x()"), Some(12));
        assert_eq!(parse_hunk_header("@@ -1 +1 @@"), Some(1));
        assert_eq!(parse_hunk_header("@@ -0,0 +1,2 @@"), Some(1));
        assert_eq!(parse_hunk_header("not a header"), None);
    }

    #[test]
    fn test_parse_unified_diff_splits_files() {
        let files = parse_unified_diff(TWO_FILES);
        assert_eq!(files.len(), 2);
        assert!(files["src/app.py"].contains("+    run(fast=True)"));
        assert!(!files["src/app.py"].contains("README"));
        assert!(files["README.md"].contains("+# Title"));
    }

    #[test]
    fn test_parse_unified_diff_empty() {
        assert!(parse_unified_diff("").is_empty());
    }

    #[test]
    fn test_parse_unified_diff_renamed() {
        let diff = "diff --git a/old name.rs b/new name.rs\nsimilarity index 90%\nrename from old name.rs\nrename to new name.rs\n";
        let files = parse_unified_diff(diff);
        assert!(files.contains_key("new name.rs"));
    }

    #[test]
    fn test_parse_unified_diff_ambiguous_header_falls_back() {
        // " b/" appears inside the path, so the header alone can't be split
        let diff = "diff --git a/x b/y.rs b/x b/z.rs\n--- a/x b/y.rs\n+++ b/x b/z.rs\n@@ -1 +1 @@\n-a\n+b\n";
        let files = parse_unified_diff(diff);
        assert!(files.contains_key("x b/z.rs"), "{:?}", files.keys());
    }

    #[test]
    fn test_parse_unified_diff_deleted_file_uses_old_name() {
        let diff = "diff --git a/x b/y.rs b/x b/y.rs2\n--- a/gone.rs\n+++ /dev/null\n@@ -1 +0,0 @@\n-a\n";
        let files = parse_unified_diff(diff);
        assert!(files.contains_key("gone.rs"), "{:?}", files.keys());
    }

    #[test]
    fn test_added_lines_numbers() {
        let files = parse_unified_diff(TWO_FILES);
        let added = added_lines(&files["src/app.py"]);
        assert_eq!(added, vec![(11, "    run(fast=True)"), (12, "    report()")]);

        let readme = added_lines(&files["README.md"]);
        assert_eq!(readme, vec![(1, "# Title"), (2, "Body")]);
    }

    #[test]
    fn test_new_side_lines() {
        let files = parse_unified_diff(TWO_FILES);
        let lines = new_side_lines(&files["src/app.py"]);
        assert_eq!(lines.into_iter().collect::<Vec<_>>(), vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_filename_from_git_header_mnemonic_prefix() {
        assert_eq!(
            filename_from_git_header("diff --git c/src/foo.rs w/src/foo.rs"),
            Some("src/foo.rs".to_string())
        );
        assert_eq!(
            filename_from_git_header("diff --git a/file with spaces.rs b/file with spaces.rs"),
            Some("file with spaces.rs".to_string())
        );
        assert_eq!(filename_from_git_header("diff --git nonsense"), None);
    }
}
