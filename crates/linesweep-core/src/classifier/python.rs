//! Heuristic, line-oriented classifier for Python source.
//!
//! Rules are tried in priority order and the first match wins. Everything
//! here is surface syntax only: no tokenizer, no AST. The only cross-line
//! state is whether a triple-quoted string is still open, which is derived
//! from the delimiter counts of all earlier lines.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::classifier::LineClassifier;
use crate::models::{LineCategory, LineInfo};

// ---------------------------------------------------------------------------
// Regex patterns (compiled once via LazyLock)
// ---------------------------------------------------------------------------

static DEFINITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:async\s+def|def|class)\s+[A-Za-z_]").unwrap());

static FROM_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^from\s+([A-Za-z0-9_\.]+)\s+import\b").unwrap());

static CLOSING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\)\]\}]+[,;]?$").unwrap());

static RETURN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^return\b").unwrap());

static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:async\s+)?(?:if|elif|else|for|while|try|except|finally|with)\b").unwrap()
});

static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\(").unwrap());

const DOUBLE_TRIPLE: &str = "\"\"\"";
const SINGLE_TRIPLE: &str = "'''";

/// Keywords that can sit right before `(` without being a call.
fn is_call_keyword(name: &str) -> bool {
    matches!(
        name,
        "if" | "elif"
            | "while"
            | "for"
            | "return"
            | "and"
            | "or"
            | "not"
            | "in"
            | "is"
            | "lambda"
            | "with"
            | "assert"
            | "yield"
            | "await"
            | "del"
            | "except"
            | "raise"
            | "import"
            | "from"
            | "def"
            | "class"
    )
}

// ---------------------------------------------------------------------------
// Triple-quote tracking
// ---------------------------------------------------------------------------

/// Open/closed state of the two triple-quote styles, tracked independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TripleQuoteState {
    double_open: bool,
    single_open: bool,
}

impl TripleQuoteState {
    /// State after scanning `lines` from the top of the file.
    pub fn scan<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut state = Self::default();
        for line in lines {
            state.advance(line);
        }
        state
    }

    pub fn advance(&mut self, line: &str) {
        if line.matches(DOUBLE_TRIPLE).count() % 2 == 1 {
            self.double_open = !self.double_open;
        }
        if line.matches(SINGLE_TRIPLE).count() % 2 == 1 {
            self.single_open = !self.single_open;
        }
    }

    pub fn is_open(&self) -> bool {
        self.double_open || self.single_open
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct PythonLineClassifier;

impl PythonLineClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one line given the triple-quote state of everything above it.
    pub fn classify_with_state(
        &self,
        file: &Path,
        line_number: u32,
        line: &str,
        before: TripleQuoteState,
    ) -> LineInfo {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            return LineInfo::new(file, line_number, line, LineCategory::Empty);
        }
        if trimmed.starts_with('#') {
            return LineInfo::new(file, line_number, line, LineCategory::Comment);
        }
        if before.is_open() || trimmed.contains(DOUBLE_TRIPLE) || trimmed.contains(SINGLE_TRIPLE) {
            return LineInfo::new(file, line_number, line, LineCategory::Docstring);
        }
        if trimmed.starts_with('@') {
            return LineInfo::new(file, line_number, line, LineCategory::Decorator);
        }
        if DEFINITION_RE.is_match(trimmed) {
            return LineInfo::new(file, line_number, line, LineCategory::Definition);
        }
        if let Some(modules) = import_modules(trimmed) {
            let mut info = LineInfo::new(file, line_number, line, LineCategory::Import);
            info.imports = Some(modules);
            return info;
        }
        if trimmed.ends_with('\\') {
            return LineInfo::new(file, line_number, line, LineCategory::Continuation);
        }
        if CLOSING_RE.is_match(trimmed) {
            return LineInfo::new(file, line_number, line, LineCategory::ClosingBracket);
        }

        let calls = extract_calls(trimmed);
        let category = if RETURN_RE.is_match(trimmed) {
            LineCategory::Return
        } else if CONTROL_RE.is_match(trimmed) {
            LineCategory::Control
        } else if has_assignment(trimmed) {
            LineCategory::Assignment
        } else if !calls.is_empty() {
            LineCategory::FunctionCall
        } else {
            LineCategory::Other
        };

        let mut info = LineInfo::new(file, line_number, line, category);
        if !calls.is_empty() {
            info.calls = Some(calls);
        }
        info
    }
}

impl LineClassifier for PythonLineClassifier {
    fn classify(&self, file: &Path, line_number: u32, line: &str, all_lines: &[&str]) -> LineInfo {
        let prior = (line_number as usize).saturating_sub(1).min(all_lines.len());
        let before = TripleQuoteState::scan(all_lines[..prior].iter().copied());
        self.classify_with_state(file, line_number, line, before)
    }

    fn classify_source(&self, file: &Path, source: &str) -> Vec<LineInfo> {
        let mut state = TripleQuoteState::default();
        let mut infos = Vec::new();
        for (idx, line) in source.lines().enumerate() {
            infos.push(self.classify_with_state(file, idx as u32 + 1, line, state));
            state.advance(line);
        }
        infos
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Module names for `import a, b as c` and `from x import y` lines.
fn import_modules(trimmed: &str) -> Option<Vec<String>> {
    if let Some(rest) = trimmed.strip_prefix("import ") {
        let modules: Vec<String> = rest
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .map(|name| name.to_string())
            .collect();
        return Some(modules);
    }
    if trimmed.starts_with("from ") {
        if let Some(caps) = FROM_IMPORT_RE.captures(trimmed) {
            return Some(vec![caps[1].to_string()]);
        }
    }
    None
}

/// Call targets in source order, deduplicated, keywords removed.
pub fn extract_calls(trimmed: &str) -> Vec<String> {
    let mut calls: Vec<String> = Vec::new();
    for caps in CALL_RE.captures_iter(trimmed) {
        let name = &caps[1];
        if is_call_keyword(name) || calls.iter().any(|c| c == name) {
            continue;
        }
        calls.push(name.to_string());
    }
    calls
}

/// True when a bare `=` appears outside brackets and string literals.
///
/// Comparison operators (`==`, `!=`, `<=`, `>=`) and keyword arguments
/// inside a call do not count; augmented assignment (`+=`) does.
fn has_assignment(trimmed: &str) -> bool {
    let chars: Vec<char> = trimmed.chars().collect();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '#' => return false,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '=' => {
                let next = chars.get(i + 1).copied();
                if next == Some('=') {
                    i += 2;
                    continue;
                }
                let prev = if i > 0 { Some(chars[i - 1]) } else { None };
                let comparison = matches!(prev, Some('!' | '<' | '>' | '=' | ':'));
                if depth <= 0 && !comparison {
                    return true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_all(source: &str) -> Vec<LineInfo> {
        PythonLineClassifier::new().classify_source(Path::new("/repo/app.py"), source)
    }

    fn categories(source: &str) -> Vec<LineCategory> {
        classify_all(source).into_iter().map(|i| i.category).collect()
    }

    #[test]
    fn test_import_then_statements() {
        let infos = classify_all("import os\nx = 1\nprint(x)\n");
        assert_eq!(infos[0].category, LineCategory::Import);
        assert_eq!(infos[0].imports.as_deref(), Some(&["os".to_string()][..]));
        assert_eq!(infos[1].category, LineCategory::Assignment);
        assert_eq!(infos[2].category, LineCategory::FunctionCall);
        assert_eq!(infos[2].calls.as_deref(), Some(&["print".to_string()][..]));
        let executable: Vec<u32> = infos
            .iter()
            .filter(|i| i.is_executable())
            .map(|i| i.line_number)
            .collect();
        assert_eq!(executable, vec![2, 3]);
    }

    #[test]
    fn test_import_module_extraction() {
        let infos = classify_all("import numpy as np, os.path\nfrom datetime import datetime\n");
        assert_eq!(
            infos[0].imports,
            Some(vec!["numpy".to_string(), "os.path".to_string()])
        );
        assert_eq!(infos[1].imports, Some(vec!["datetime".to_string()]));
    }

    #[test]
    fn test_non_executable_structure() {
        let source = "\n   \n# comment\n@decorator\ndef foo(a):\nasync def bar():\nclass Baz(Base):\nx = foo(1, \\\n)\n],\n";
        assert_eq!(
            categories(source),
            vec![
                LineCategory::Empty,
                LineCategory::Empty,
                LineCategory::Comment,
                LineCategory::Decorator,
                LineCategory::Definition,
                LineCategory::Definition,
                LineCategory::Definition,
                LineCategory::Continuation,
                LineCategory::ClosingBracket,
                LineCategory::ClosingBracket,
            ]
        );
    }

    #[test]
    fn test_docstring_spans() {
        let source = "def f():\n    \"\"\"Start\n    middle = 1\n    end\"\"\"\n    y = 2\n";
        assert_eq!(
            categories(source),
            vec![
                LineCategory::Definition,
                LineCategory::Docstring,
                LineCategory::Docstring,
                LineCategory::Docstring,
                LineCategory::Assignment,
            ]
        );
    }

    #[test]
    fn test_single_line_docstring_does_not_open_span() {
        let source = "def f():\n    \"\"\"One liner.\"\"\"\n    return 1\n";
        assert_eq!(
            categories(source),
            vec![
                LineCategory::Definition,
                LineCategory::Docstring,
                LineCategory::Return,
            ]
        );
    }

    #[test]
    fn test_quote_styles_tracked_independently() {
        // Paired ''' inside an open """ span leave it open.
        let source = "\"\"\"\nit's '''quoted'''\nx = 1\n\"\"\"\ny = 2\n";
        assert_eq!(
            categories(source),
            vec![
                LineCategory::Docstring,
                LineCategory::Docstring,
                LineCategory::Docstring,
                LineCategory::Docstring,
                LineCategory::Assignment,
            ]
        );
    }

    #[test]
    fn test_executable_subcategories() {
        let source = "return x\nif a == b:\nelif ready():\nelse:\nfor i in range(3):\nwith open(p) as f:\ntotal += 1\nfoo(a=1)\ncalc.add(1, 2)\npass\n";
        assert_eq!(
            categories(source),
            vec![
                LineCategory::Return,
                LineCategory::Control,
                LineCategory::Control,
                LineCategory::Control,
                LineCategory::Control,
                LineCategory::Control,
                LineCategory::Assignment,
                LineCategory::FunctionCall,
                LineCategory::FunctionCall,
                LineCategory::Other,
            ]
        );
    }

    #[test]
    fn test_comparisons_are_not_assignments() {
        assert!(!has_assignment("a == b"));
        assert!(!has_assignment("a != b"));
        assert!(!has_assignment("a <= b"));
        assert!(!has_assignment("a >= b"));
        assert!(!has_assignment("print(\"x = 1\")"));
        assert!(has_assignment("x = 1"));
        assert!(has_assignment("x += 1"));
        assert!(has_assignment("self.history = []"));
    }

    #[test]
    fn test_call_extraction_skips_keywords() {
        let calls = extract_calls("if not (x) and isinstance(x, int) or while_(y):");
        assert_eq!(calls, vec!["isinstance".to_string(), "while_".to_string()]);
        let calls = extract_calls("return fibonacci(n - 1) + fibonacci(n - 2)");
        assert_eq!(calls, vec!["fibonacci".to_string()]);
    }

    #[test]
    fn test_assignment_with_call_keeps_targets() {
        let infos = classify_all("result = divide(x, y)\n");
        assert_eq!(infos[0].category, LineCategory::Assignment);
        assert_eq!(infos[0].calls, Some(vec!["divide".to_string()]));
    }

    #[test]
    fn test_per_line_matches_whole_file() {
        let source = "import math\n\"\"\"doc\nstill doc\n\"\"\"\ndef area(r):\n    '''x'''\n    return math.pi * r ** 2\nprint(area(2))\n";
        let classifier = PythonLineClassifier::new();
        let path = Path::new("/repo/area.py");
        let lines: Vec<&str> = source.lines().collect();
        let per_line: Vec<LineInfo> = lines
            .iter()
            .enumerate()
            .map(|(i, l)| classifier.classify(path, i as u32 + 1, l, &lines))
            .collect();
        assert_eq!(per_line, classifier.classify_source(path, source));
    }

    #[test]
    fn test_deterministic() {
        let source = "x = 1\nif x:\n    print(x)\n";
        assert_eq!(classify_all(source), classify_all(source));
    }
}
