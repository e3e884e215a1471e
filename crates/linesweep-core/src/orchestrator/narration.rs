//! Spoken-progress text for narrated validation runs.
//!
//! Speech output itself is somebody else's job: the engine hands finished
//! sentences to a [`Narrator`]. The default sink writes them to the
//! `linesweep::narration` tracing target.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::debug::DebugBackend;
use crate::models::{LineCategory, LineInfo, ValidationError};

static CALL_ARGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*\(([^()]*)\)").unwrap());

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

pub trait Narrator: Send + Sync {
    fn speak(&self, text: &str, rate: Option<u32>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNarrator;

impl Narrator for TracingNarrator {
    fn speak(&self, text: &str, rate: Option<u32>) {
        info!(target: "linesweep::narration", rate, "{text}");
    }
}

/// Sentence describing what `info` is about to do.
pub fn describe_line(info: &LineInfo, values: &[(String, String)]) -> String {
    let code = info.content.trim();
    let mut text = match info.category {
        LineCategory::Assignment => {
            let target = code
                .split('=')
                .next()
                .unwrap_or(code)
                .trim_end_matches(['+', '-', '*', '/']);
            format!("Line {}: assigning {}", info.line_number, target.trim())
        }
        LineCategory::Return => {
            let expr = code.trim_start_matches("return").trim();
            if expr.is_empty() {
                format!("Line {}: returning", info.line_number)
            } else {
                format!("Line {}: returning {}", info.line_number, expr)
            }
        }
        LineCategory::Control => {
            let keyword = code
                .split(|c: char| !c.is_ascii_alphabetic())
                .next()
                .unwrap_or(code);
            format!("Line {}: {} statement", info.line_number, keyword)
        }
        LineCategory::FunctionCall => {
            let calls = info.calls.as_deref().unwrap_or_default().join(", ");
            format!("Line {}: calling {}", info.line_number, calls)
        }
        _ => format!("Line {}: {}", info.line_number, code),
    };

    if !values.is_empty() {
        let rendered: Vec<String> = values
            .iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect();
        text.push_str(" with ");
        text.push_str(&rendered.join(", "));
    }
    text
}

pub fn describe_error(error: &ValidationError) -> String {
    format!("Error on line {}: {}", error.line, error.message)
}

/// Plain identifiers passed as call arguments on `code`, in order.
///
/// Keyword arguments contribute their value side when it is an identifier.
pub fn call_argument_names(code: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in CALL_ARGS_RE.captures_iter(code) {
        for arg in caps[1].split(',') {
            let arg = arg.trim();
            let candidate = arg.rsplit('=').next().unwrap_or(arg).trim();
            if IDENT_RE.is_match(candidate) && !names.iter().any(|n| n == candidate) {
                names.push(candidate.to_string());
            }
        }
    }
    names
}

/// Look `names` up in the scopes of `frame_id`. Best-effort: lookup
/// failures yield fewer values, never an error.
pub fn resolve_argument_values(
    backend: &dyn DebugBackend,
    session_id: &str,
    frame_id: i64,
    names: &[String],
) -> Vec<(String, String)> {
    if names.is_empty() {
        return Vec::new();
    }
    let scopes = match backend.scopes(session_id, frame_id) {
        Ok(scopes) => scopes,
        Err(e) => {
            debug!(session_id, frame_id, "scope lookup failed: {e}");
            return Vec::new();
        }
    };

    let mut found: Vec<(String, String)> = Vec::new();
    for scope in scopes {
        let variables = match backend.variables(session_id, scope.variables_reference) {
            Ok(vars) => vars,
            Err(e) => {
                debug!(session_id, scope = %scope.name, "variable lookup failed: {e}");
                continue;
            }
        };
        for var in variables {
            if names.contains(&var.name) && !found.iter().any(|(n, _)| *n == var.name) {
                found.push((var.name, var.value));
            }
        }
    }
    found.sort_by_key(|(name, _)| names.iter().position(|n| n == name));
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn info(line: u32, content: &str, category: LineCategory, calls: &[&str]) -> LineInfo {
        let mut info = LineInfo::new(Path::new("/repo/app.py"), line, content, category);
        if !calls.is_empty() {
            info.calls = Some(calls.iter().map(|c| c.to_string()).collect());
        }
        info
    }

    #[test]
    fn describes_each_category() {
        assert_eq!(
            describe_line(&info(2, "x = 1", LineCategory::Assignment, &[]), &[]),
            "Line 2: assigning x"
        );
        assert_eq!(
            describe_line(&info(3, "    total += n", LineCategory::Assignment, &[]), &[]),
            "Line 3: assigning total"
        );
        assert_eq!(
            describe_line(&info(4, "return area", LineCategory::Return, &[]), &[]),
            "Line 4: returning area"
        );
        assert_eq!(
            describe_line(&info(5, "for n in nums:", LineCategory::Control, &[]), &[]),
            "Line 5: for statement"
        );
        assert_eq!(
            describe_line(&info(6, "print(x)", LineCategory::FunctionCall, &["print"]), &[]),
            "Line 6: calling print"
        );
        assert_eq!(
            describe_line(&info(7, "pass", LineCategory::Other, &[]), &[]),
            "Line 7: pass"
        );
    }

    #[test]
    fn appends_argument_values() {
        let values = vec![
            ("x".to_string(), "10".to_string()),
            ("y".to_string(), "0".to_string()),
        ];
        let text = describe_line(
            &info(9, "result = divide(x, y)", LineCategory::Assignment, &["divide"]),
            &values,
        );
        assert_eq!(text, "Line 9: assigning result with x = 10, y = 0");
    }

    #[test]
    fn extracts_identifier_arguments() {
        assert_eq!(
            call_argument_names("result = divide(x, y)"),
            vec!["x".to_string(), "y".to_string()]
        );
        assert_eq!(
            call_argument_names("calc.add(10, total, key=name)"),
            vec!["total".to_string(), "name".to_string()]
        );
        assert!(call_argument_names("print(\"hello\")").is_empty());
    }
}
