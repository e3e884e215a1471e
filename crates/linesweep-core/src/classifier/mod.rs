//! Line classification: which lines of a source file are breakpoint targets.

pub mod python;

use std::path::Path;

use crate::errors::{LineSweepError, LineSweepResult};
use crate::models::LineInfo;

pub use python::PythonLineClassifier;

/// Decides, per line, whether a line is executable and what kind it is.
///
/// Implementations are pure: the only input is the text handed in.
pub trait LineClassifier: Send + Sync {
    /// Classify line `line_number` (1-based) of a file whose full contents
    /// are `all_lines`.
    fn classify(&self, file: &Path, line_number: u32, line: &str, all_lines: &[&str]) -> LineInfo;

    /// Classify every line of `source`.
    fn classify_source(&self, file: &Path, source: &str) -> Vec<LineInfo> {
        let lines: Vec<&str> = source.lines().collect();
        lines
            .iter()
            .enumerate()
            .map(|(idx, line)| self.classify(file, idx as u32 + 1, line, &lines))
            .collect()
    }
}

/// Read `path` and classify all of its lines.
pub fn classify_file(
    classifier: &dyn LineClassifier,
    path: &Path,
) -> LineSweepResult<Vec<LineInfo>> {
    let source =
        std::fs::read_to_string(path).map_err(|e| LineSweepError::source_read(path, e))?;
    Ok(classifier.classify_source(path, &source))
}

/// Line numbers of the executable entries, in file order.
pub fn executable_lines(infos: &[LineInfo]) -> Vec<u32> {
    infos
        .iter()
        .filter(|info| info.is_executable())
        .map(|info| info.line_number)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn classify_file_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "import os\nx = 1\nprint(x)").unwrap();
        let infos = classify_file(&PythonLineClassifier::new(), file.path()).unwrap();
        assert_eq!(infos.len(), 3);
        assert_eq!(executable_lines(&infos), vec![2, 3]);
    }

    #[test]
    fn classify_file_missing_is_source_read_error() {
        let err = classify_file(&PythonLineClassifier::new(), Path::new("/no/such/file.py"))
            .unwrap_err();
        assert!(matches!(err, LineSweepError::SourceRead { .. }));
    }

    #[test]
    fn zero_executable_lines() {
        let infos = PythonLineClassifier::new()
            .classify_source(Path::new("/repo/empty.py"), "# only\n\n\"\"\"doc\"\"\"\n");
        assert!(executable_lines(&infos).is_empty());
    }
}
