//! Lightweight style checks backing the `check_style` tool.
//!
//! Line rules apply to every language; python gets a few extra rules.
//! Python and brace languages also get a delimiter balance check that skips
//! string literals and comments.

use std::path::Path;

use serde::Serialize;

use crate::diff::added_lines;

pub const MAX_LINE_LENGTH: usize = 120;
const TODO_MARKERS: &[&str] = &["TODO", "FIXME", "HACK", "XXX"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StyleRule {
    LineTooLong,
    TrailingWhitespace,
    BareExcept,
    TodoComment,
    Tabs,
    SyntaxError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleIssue {
    pub line: usize,
    pub rule: StyleRule,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleStatus {
    Clean,
    IssuesFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleReport {
    pub status: StyleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    pub issues: Vec<StyleIssue>,
}

impl StyleReport {
    fn from_issues(issues: Vec<StyleIssue>) -> Self {
        if issues.is_empty() {
            Self {
                status: StyleStatus::Clean,
                count: None,
                issues,
            }
        } else {
            Self {
                status: StyleStatus::IssuesFound,
                count: Some(issues.len()),
                issues,
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.status == StyleStatus::Clean
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quotes {
    /// `'x'` is a char literal; a lone `'` (Rust lifetimes) is ignored
    CharLiteral,
    /// `'...'` is a string
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Python,
    Brace { quotes: Quotes, backticks: bool, raw_strings: bool },
    Other,
}

fn family(language: &str) -> Family {
    match language.trim().to_ascii_lowercase().as_str() {
        "python" | "py" | "pyi" => Family::Python,
        "rust" | "rs" => Family::Brace {
            quotes: Quotes::CharLiteral,
            backticks: false,
            raw_strings: true,
        },
        "go" | "golang" => Family::Brace {
            quotes: Quotes::CharLiteral,
            backticks: true,
            raw_strings: false,
        },
        "c" | "h" | "cpp" | "c++" | "cc" | "cxx" | "hpp" | "java" | "kotlin" | "kt" | "scala"
        | "csharp" | "c#" | "cs" | "swift" => Family::Brace {
            quotes: Quotes::CharLiteral,
            backticks: false,
            raw_strings: false,
        },
        "javascript" | "js" | "jsx" | "mjs" | "cjs" | "typescript" | "ts" | "tsx" => {
            Family::Brace {
                quotes: Quotes::String,
                backticks: true,
                raw_strings: false,
            }
        }
        _ => Family::Other,
    }
}

/// Language name from a file extension, for when the caller gives none.
pub fn infer_language(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    let language = match ext.as_str() {
        "py" | "pyi" => "python",
        "rs" => "rust",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "java" => "java",
        "kt" => "kotlin",
        "scala" => "scala",
        "cs" => "csharp",
        "swift" => "swift",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        _ => return None,
    };
    Some(language)
}

fn resolve_family(language: Option<&str>, filename: Option<&str>) -> Family {
    language
        .filter(|l| !l.trim().is_empty())
        .or_else(|| filename.and_then(infer_language))
        .map(family)
        .unwrap_or(Family::Other)
}

/// Check a whole snippet or file.
pub fn check_style(code: &str, language: Option<&str>, filename: Option<&str>) -> StyleReport {
    let family = resolve_family(language, filename);
    let mut issues: Vec<StyleIssue> = code
        .split('\n')
        .enumerate()
        .flat_map(|(i, line)| line_issues(i + 1, line, family))
        .collect();
    if let Some(issue) = check_delimiters(code, family) {
        issues.push(issue);
    }
    StyleReport::from_issues(issues)
}

/// Check only the lines a patch adds, numbered as in the new file.
///
/// Fragments of a file can't be balance-checked, so `syntax-error` is skipped.
pub fn check_patch(patch: &str, language: Option<&str>, filename: Option<&str>) -> StyleReport {
    let family = resolve_family(language, filename);
    let issues = added_lines(patch)
        .into_iter()
        .flat_map(|(n, line)| line_issues(n as usize, line, family))
        .collect();
    StyleReport::from_issues(issues)
}

fn line_issues(line_no: usize, line: &str, family: Family) -> Vec<StyleIssue> {
    let mut issues = Vec::new();
    let issue = |rule, message: String| StyleIssue {
        line: line_no,
        rule,
        message,
    };

    let len = line.chars().count();
    if len > MAX_LINE_LENGTH {
        issues.push(issue(
            StyleRule::LineTooLong,
            format!("Line is {} chars (max {})", len, MAX_LINE_LENGTH),
        ));
    }
    if line != line.trim_end() {
        issues.push(issue(
            StyleRule::TrailingWhitespace,
            "Trailing whitespace".to_string(),
        ));
    }

    if family == Family::Python {
        let stripped = line.trim();
        if stripped == "except:" || stripped.starts_with("except :") {
            issues.push(issue(
                StyleRule::BareExcept,
                "Bare except clause, catch specific exceptions".to_string(),
            ));
        }
        let upper = line.to_uppercase();
        if TODO_MARKERS.iter().any(|marker| upper.contains(marker)) {
            issues.push(issue(
                StyleRule::TodoComment,
                "Contains TODO/FIXME/HACK marker".to_string(),
            ));
        }
        let indent = &line[..line.len() - line.trim_start().len()];
        if indent.contains('\t') {
            issues.push(issue(
                StyleRule::Tabs,
                "Indentation contains tabs".to_string(),
            ));
        }
    }

    issues
}

fn syntax_error(line: usize, message: String) -> StyleIssue {
    StyleIssue {
        line,
        rule: StyleRule::SyntaxError,
        message: format!("Syntax error: {}", message),
    }
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// First unbalanced `()[]{}` outside strings and comments, if any.
fn check_delimiters(code: &str, family: Family) -> Option<StyleIssue> {
    if family == Family::Other {
        return None;
    }

    let chars: Vec<char> = code.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => line += 1,
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => match stack.pop() {
                None => return Some(syntax_error(line, format!("unmatched '{}'", c))),
                Some((open, _)) if closer_for(open) != c => {
                    return Some(syntax_error(
                        line,
                        format!(
                            "closing '{}' does not match opening '{}'",
                            c, open
                        ),
                    ))
                }
                Some(_) => {}
            },
            _ => {}
        }

        let skipped = match family {
            Family::Python => skip_python(&chars, i, &mut line),
            Family::Brace {
                quotes,
                backticks,
                raw_strings,
            } => skip_brace(&chars, i, &mut line, quotes, backticks, raw_strings),
            Family::Other => Ok(None),
        };
        match skipped {
            Ok(Some(next)) => i = next,
            Ok(None) => i += 1,
            Err(issue) => return Some(issue),
        }
    }

    stack
        .pop()
        .map(|(open, at)| syntax_error(at, format!("'{}' was never closed", open)))
}

fn starts_with_at(chars: &[char], i: usize, pat: &str) -> bool {
    let mut idx = i;
    for p in pat.chars() {
        if chars.get(idx) != Some(&p) {
            return false;
        }
        idx += 1;
    }
    true
}

/// Index just past a quoted literal starting at `i`. Backslash escapes are
/// honoured; `multiline` decides whether a newline ends it unterminated.
fn skip_quoted(
    chars: &[char],
    i: usize,
    delim: &str,
    multiline: bool,
    line: &mut usize,
) -> Result<usize, usize> {
    let start_line = *line;
    let mut j = i + delim.chars().count();
    while j < chars.len() {
        if starts_with_at(chars, j, delim) {
            return Ok(j + delim.chars().count());
        }
        match chars[j] {
            '\\' => {
                if chars.get(j + 1) == Some(&'\n') {
                    *line += 1;
                }
                j += 2;
                continue;
            }
            '\n' if !multiline => return Err(start_line),
            '\n' => *line += 1,
            _ => {}
        }
        j += 1;
    }
    Err(start_line)
}

type Skip = Result<Option<usize>, StyleIssue>;

fn skip_python(chars: &[char], i: usize, line: &mut usize) -> Skip {
    match chars[i] {
        '#' => {
            let end = chars[i..]
                .iter()
                .position(|&c| c == '\n')
                .map_or(chars.len(), |p| i + p);
            Ok(Some(end))
        }
        '"' | '\'' => {
            let triple: String = std::iter::repeat(chars[i]).take(3).collect();
            if starts_with_at(chars, i, &triple) {
                skip_quoted(chars, i, &triple, true, line).map(Some).map_err(|at| {
                    syntax_error(at, "unterminated triple-quoted string literal".to_string())
                })
            } else {
                let delim = chars[i].to_string();
                skip_quoted(chars, i, &delim, false, line)
                    .map(Some)
                    .map_err(|at| syntax_error(at, "unterminated string literal".to_string()))
            }
        }
        _ => Ok(None),
    }
}

fn skip_brace(
    chars: &[char],
    i: usize,
    line: &mut usize,
    quotes: Quotes,
    backticks: bool,
    raw_strings: bool,
) -> Skip {
    let unterminated = |at| syntax_error(at, "unterminated string literal".to_string());
    match chars[i] {
        '/' if chars.get(i + 1) == Some(&'/') => {
            let end = chars[i..]
                .iter()
                .position(|&c| c == '\n')
                .map_or(chars.len(), |p| i + p);
            Ok(Some(end))
        }
        '/' if chars.get(i + 1) == Some(&'*') => {
            let start_line = *line;
            let mut j = i + 2;
            while j < chars.len() {
                if starts_with_at(chars, j, "*/") {
                    return Ok(Some(j + 2));
                }
                if chars[j] == '\n' {
                    *line += 1;
                }
                j += 1;
            }
            Err(syntax_error(start_line, "unterminated block comment".to_string()))
        }
        'r' if raw_strings && !is_ident_char(i.checked_sub(1).map(|p| chars[p])) => {
            let hashes = chars[i + 1..].iter().take_while(|&&c| c == '#').count();
            if chars.get(i + 1 + hashes) != Some(&'"') {
                return Ok(None);
            }
            let closing: String = std::iter::once('"')
                .chain(std::iter::repeat('#').take(hashes))
                .collect();
            let start_line = *line;
            let mut j = i + 2 + hashes;
            while j < chars.len() {
                if starts_with_at(chars, j, &closing) {
                    return Ok(Some(j + closing.len()));
                }
                if chars[j] == '\n' {
                    *line += 1;
                }
                j += 1;
            }
            Err(unterminated(start_line))
        }
        '"' => skip_quoted(chars, i, "\"", true, line)
            .map(Some)
            .map_err(unterminated),
        '`' if backticks => skip_quoted(chars, i, "`", true, line)
            .map(Some)
            .map_err(unterminated),
        '\'' => match quotes {
            Quotes::String => skip_quoted(chars, i, "'", false, line)
                .map(Some)
                .map_err(unterminated),
            Quotes::CharLiteral => Ok(char_literal_end(chars, i)),
        },
        _ => Ok(None),
    }
}

fn is_ident_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// End of a char literal at `i` (`'x'`, `'\n'`, `'\u{1F600}'`), or `None`
/// when the quote is a lifetime or label marker.
fn char_literal_end(chars: &[char], i: usize) -> Option<usize> {
    match chars.get(i + 1)? {
        '\\' => chars
            .get(i + 3..)?
            .iter()
            .take(12)
            .position(|&c| c == '\'')
            .map(|p| i + 4 + p),
        '\n' => None,
        _ if chars.get(i + 2) == Some(&'\'') => Some(i + 3),
        _ => None,
    }
}
