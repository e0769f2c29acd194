//! Immutable parameterized statements and placeholder arity checks.

use super::error::{DbError, DbResult};
use super::value::Value;

/// One SQL instruction plus its positionally bound values.
///
/// Construction counts the placeholders in `text` and refuses a parameter
/// list of a different length, so an arity mistake never reaches the
/// engine. Text without placeholders is passed through unchanged; no
/// escaping or rewriting happens at this layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    text: String,
    params: Vec<Value>,
}

impl Statement {
    /// Builds a statement, validating placeholder arity.
    ///
    /// # Errors
    ///
    /// Returns [`DbErrorKind::BindingArity`](super::DbErrorKind::BindingArity)
    /// if the number of placeholders in `text` differs from `params.len()`.
    pub fn new(text: impl Into<String>, params: impl Into<Vec<Value>>) -> DbResult<Self> {
        let text = text.into();
        let params = params.into();
        let expected = placeholder_count(&text);
        if expected != params.len() {
            return Err(DbError::binding_arity(expected, params.len()));
        }
        Ok(Self { text, params })
    }

    /// Builds a statement that binds no parameters.
    ///
    /// # Errors
    ///
    /// Returns an arity error if `text` contains placeholders.
    pub fn literal(text: impl Into<String>) -> DbResult<Self> {
        Self::new(text, Vec::new())
    }

    /// Returns the statement text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the bound parameters in placeholder order.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Counts the parameters `SQLite` would allocate for `sql`.
///
/// Numbering follows the engine: `?` takes the next index, `?NNN` takes
/// `NNN`, and each distinct `:name`, `@name` or `$name` takes the next index
/// on first use. The result is the highest index. Placeholders inside string
/// literals, quoted identifiers and comments are ignored.
#[must_use]
pub fn placeholder_count(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut highest = 0usize;
    let mut named: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => i = skip_quoted(bytes, i + 1, quote),
            b'[' => i = skip_past(bytes, i + 1, b"]"),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_past(bytes, i + 2, b"\n"),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_past(bytes, i + 2, b"*/"),
            b'?' => {
                let start = i + 1;
                let end = scan_while(bytes, start, |b| b.is_ascii_digit());
                if end == start {
                    highest += 1;
                } else {
                    let index = sql[start..end].parse::<usize>().unwrap_or(usize::MAX);
                    highest = highest.max(index);
                }
                i = end;
            }
            b':' | b'@' | b'$' if bytes.get(i + 1).is_some_and(|b| is_ident_start(*b)) => {
                let end = scan_while(bytes, i + 1, is_ident_char);
                let name = &sql[i..end];
                if !named.contains(&name) {
                    named.push(name);
                    highest += 1;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    highest
}

/// Skips a quoted run starting just after the opening quote. A doubled
/// quote is an escaped quote character.
fn skip_quoted(bytes: &[u8], mut i: usize, quote: u8) -> usize {
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

/// Returns the index just past the next occurrence of `terminator`, or the
/// end of input.
fn skip_past(bytes: &[u8], start: usize, terminator: &[u8]) -> usize {
    bytes[start.min(bytes.len())..]
        .windows(terminator.len())
        .position(|window| window == terminator)
        .map_or(bytes.len(), |offset| start + offset + terminator.len())
}

fn scan_while(bytes: &[u8], mut i: usize, pred: impl Fn(u8) -> bool) -> usize {
    while i < bytes.len() && pred(bytes[i]) {
        i += 1;
    }
    i
}

const fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

const fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbErrorKind;

    #[test]
    fn test_counts_anonymous_placeholders() {
        assert_eq!(
            placeholder_count("INSERT INTO Employees (name, office, department) VALUES (?,?,?);"),
            3
        );
        assert_eq!(placeholder_count("SELECT 1 FROM Version LIMIT 1"), 0);
    }

    #[test]
    fn test_ignores_quoted_and_commented_markers() {
        assert_eq!(placeholder_count("SELECT '?', \"a?b\", `c?` FROM t"), 0);
        assert_eq!(placeholder_count("SELECT 'it''s ?' , ? FROM t"), 1);
        assert_eq!(placeholder_count("SELECT [weird?col] FROM t WHERE id = ?"), 1);
        assert_eq!(placeholder_count("SELECT 1 -- what?\n, ?"), 1);
        assert_eq!(placeholder_count("SELECT /* ? ? */ ?"), 1);
    }

    #[test]
    fn test_numbered_and_named_placeholders() {
        assert_eq!(placeholder_count("SELECT ?1, ?2, ?1"), 2);
        assert_eq!(placeholder_count("SELECT ?3"), 3);
        assert_eq!(placeholder_count("SELECT :a, @b, :a, $c"), 3);
        assert_eq!(placeholder_count("SELECT ?, ?5, ?"), 6);
    }

    #[test]
    fn test_arity_mismatch_is_rejected_before_dispatch() {
        let err = Statement::new(
            "INSERT INTO Employees (name, office, department) VALUES (?,?,?)",
            vec![Value::from("Elvis Presley"), Value::from(2)],
        )
        .expect_err("arity mismatch");
        assert_eq!(
            err.kind,
            DbErrorKind::BindingArity {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_literal_text_passes_through() {
        let text = "INSERT INTO Departments (name) VALUES ('Shipping');";
        let stmt = Statement::literal(text).expect("literal statement");
        assert_eq!(stmt.text(), text);
        assert!(stmt.params().is_empty());
    }
}
