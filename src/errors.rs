// File: src/errors.rs
//
// Error handling and reporting for the Lumen scripting language.
// Provides structured diagnostics with source location information
// and pretty-printed messages, plus the runtime Exception payload that
// travels through the VM's handler chain.

use colored::Colorize;
use std::fmt;

/// Source location information for tracking where code appears in a file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub file: Option<String>,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column, file: None }
    }

    pub fn with_file(line: usize, column: usize, file: String) -> Self {
        Self { line, column, file: Some(file) }
    }

    pub fn unknown() -> Self {
        Self { line: 0, column: 0, file: None }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:{}:{}", file, self.line, self.column)
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

/// The four error kinds: syntax and compile errors are reported through the
/// same diagnostic channel and abort compilation; runtime exceptions
/// propagate through the handler chain as language values; unrecoverable
/// errors abort the VM outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Compile,
    Runtime,
    Unrecoverable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Syntax => write!(f, "Syntax Error"),
            ErrorKind::Compile => write!(f, "Compile Error"),
            ErrorKind::Runtime => write!(f, "Runtime Error"),
            ErrorKind::Unrecoverable => write!(f, "Unrecoverable Error"),
        }
    }
}

/// A structured diagnostic with location information, rendered the way the
/// CLI prints syntax and compile errors.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub location: SourceLocation,
    pub source_line: Option<String>,
    pub help: Option<String>,
    pub note: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            kind,
            message: message.into(),
            location,
            source_line: None,
            help: None,
            note: None,
        }
    }

    pub fn with_source(mut self, source_line: String) -> Self {
        self.source_line = Some(source_line);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn syntax(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Syntax, message, location)
    }

    pub fn compile(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Compile, message, location)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind_str = format!("{}", self.kind);
        writeln!(f, "{}: {}", kind_str.red().bold(), self.message.bold())?;
        writeln!(f, "{}", format!("  --> {}", self.location).bright_blue())?;

        if let Some(ref source) = self.source_line {
            let col = self.location.column;
            writeln!(f, "   {}", "|".bright_blue())?;
            writeln!(
                f,
                "{} {} {}",
                format!("{:3}", self.location.line).bright_blue(),
                "|".bright_blue(),
                source
            )?;
            writeln!(
                f,
                "   {} {}{}",
                "|".bright_blue(),
                " ".repeat(col.saturating_sub(1)),
                "^".red().bold()
            )?;
        }

        if let Some(ref help) = self.help {
            writeln!(f, "   {} {}", "=".bright_yellow(), format!("help: {}", help).bright_yellow())?;
        }
        if let Some(ref note) = self.note {
            writeln!(f, "   {} {}", "=".bright_cyan(), format!("note: {}", note).bright_cyan())?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Runtime exception payload: not an error type in the Rust sense, a handle
/// to the language-level Exception Instance that is being unwound. The VM
/// converts between this and `Value`/`Instance` at the handler boundary;
/// kept separate so embedding-facade call sites can check "did this call
/// raise" with `Result<Value, RaisedException>` instead of reaching into VM
/// internals.
#[derive(Debug, Clone, Copy)]
pub struct RaisedException;

/// Unrecoverable VM failure: heap exhaustion or an internal invariant
/// violation. This cannot be caught by language-level `try`/`except`.
#[derive(Debug, Clone)]
pub struct Fatal(pub String);

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "fatal: {}", self.0)
    }
}

impl std::error::Error for Fatal {}

/// Computes the Levenshtein distance between two strings, used for
/// "did you mean?" suggestions on undefined-name compile errors.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();
    let (len1, len2) = (s1_chars.len(), s2_chars.len());

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0usize; len2 + 1]; len1 + 1];
    for (i, row) in matrix.iter_mut().enumerate().take(len1 + 1) {
        row[0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = std::cmp::min(
                std::cmp::min(matrix[i - 1][j] + 1, matrix[i][j - 1] + 1),
                matrix[i - 1][j - 1] + cost,
            );
        }
    }

    matrix[len1][len2]
}

/// Finds the closest match from a list of candidates, for "did you mean"
/// hints. Returns `None` when nothing is within edit distance 3.
pub fn find_closest_match<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best: Option<(&str, usize)> = None;
    for candidate in candidates {
        let distance = levenshtein_distance(target, candidate);
        if distance <= 3 && best.map(|(_, d)| distance < d).unwrap_or(true) {
            best = Some((candidate.as_str(), distance));
        }
    }
    best.map(|(s, _)| s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_have_zero_distance() {
        assert_eq!(levenshtein_distance("hello", "hello"), 0);
    }

    #[test]
    fn finds_close_typo() {
        let candidates = vec!["length".to_string(), "append".to_string()];
        assert_eq!(find_closest_match("lenght", &candidates), Some("length"));
    }

    #[test]
    fn no_match_when_too_far() {
        let candidates = vec!["zzzzzz".to_string()];
        assert_eq!(find_closest_match("abc", &candidates), None);
    }
}
