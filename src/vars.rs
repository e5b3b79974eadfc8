//! Named variable bindings and `$Name` expansion.
//!
//! Variable values may themselves reference other variables; references are
//! resolved recursively at expansion time with a visited set, so a circular
//! definition is reported instead of looping.

use std::collections::HashMap;

use crate::errors::ConfigError;

/// A scope's variable bindings.
///
/// Numeric references (`$1`, `${2}`) are not variables; expansion leaves them
/// in place for the pattern capture substitution to consume.
#[derive(Clone, Debug, Default)]
pub struct VarMap {
    vars: HashMap<String, String>,
}

impl VarMap {
    pub fn new() -> VarMap {
        VarMap::default()
    }

    /// Bind `name` to a raw (unexpanded) value, replacing any prior binding.
    pub fn set(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    /// Expand every `$Name`, `${Name}` and `$(Name)` reference in `text`.
    ///
    /// `$$` produces a literal `$`. Unknown names and circular definitions
    /// are configuration errors.
    pub fn expand(&self, text: &str) -> Result<String, ConfigError> {
        let mut visited = Vec::new();
        self.expand_inner(text, &mut visited)
    }

    fn expand_inner(&self, text: &str, visited: &mut Vec<String>) -> Result<String, ConfigError> {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(pos) = rest.find('$') {
            result.push_str(&rest[..pos]);
            rest = &rest[pos + 1..];

            let mut chars = rest.chars();
            match chars.next() {
                Some('$') => {
                    result.push('$');
                    rest = &rest[1..];
                }
                Some('{') | Some('(') => {
                    let open = rest.chars().next().unwrap();
                    let close = if open == '{' { '}' } else { ')' };
                    let body = &rest[1..];
                    let end = body.find(close).ok_or_else(|| ConfigError::UndefinedVariable {
                        name: body.to_string(),
                    })?;
                    let name = &body[..end];
                    rest = &body[end + 1..];

                    if name.chars().all(|c| c.is_ascii_digit()) {
                        // Capture reference, not ours to expand.
                        result.push('$');
                        result.push(open);
                        result.push_str(name);
                        result.push(close);
                    } else {
                        result.push_str(&self.lookup(name, visited)?);
                    }
                }
                Some(c) if c.is_ascii_digit() => {
                    result.push('$');
                }
                Some(c) if c.is_alphanumeric() || c == '_' => {
                    let end = rest
                        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                        .unwrap_or(rest.len());
                    let name = &rest[..end];
                    rest = &rest[end..];
                    result.push_str(&self.lookup(name, visited)?);
                }
                _ => {
                    result.push('$');
                }
            }
        }

        result.push_str(rest);
        Ok(result)
    }

    fn lookup(&self, name: &str, visited: &mut Vec<String>) -> Result<String, ConfigError> {
        if visited.iter().any(|v| v == name) {
            return Err(ConfigError::CircularVariable {
                name: name.to_string(),
            });
        }

        let value = self
            .vars
            .get(name)
            .ok_or_else(|| ConfigError::UndefinedVariable {
                name: name.to_string(),
            })?;

        visited.push(name.to_string());
        let expanded = self.expand_inner(value, visited)?;
        visited.pop();

        Ok(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> VarMap {
        let mut m = VarMap::new();
        for (k, v) in pairs {
            m.set(k, v);
        }
        m
    }

    #[test]
    fn plain_text_unchanged() {
        let m = VarMap::new();
        assert_eq!(m.expand("refs/heads/main").unwrap(), "refs/heads/main");
    }

    #[test]
    fn all_reference_forms() {
        let m = map(&[("Trunk", "trunk")]);
        assert_eq!(m.expand("**/$Trunk").unwrap(), "**/trunk");
        assert_eq!(m.expand("**/${Trunk}").unwrap(), "**/trunk");
        assert_eq!(m.expand("**/$(Trunk)").unwrap(), "**/trunk");
    }

    #[test]
    fn nested_expansion() {
        let m = map(&[("A", "x/$B"), ("B", "y")]);
        assert_eq!(m.expand("$A").unwrap(), "x/y");
    }

    #[test]
    fn redefinition_wins() {
        let mut m = map(&[("A", "one")]);
        m.set("A", "two");
        assert_eq!(m.expand("$A").unwrap(), "two");
    }

    #[test]
    fn dollar_escape() {
        let m = VarMap::new();
        assert_eq!(m.expand("a$$b").unwrap(), "a$b");
    }

    #[test]
    fn capture_references_left_alone() {
        let m = map(&[("Trunk", "trunk")]);
        assert_eq!(m.expand("refs/heads/$1").unwrap(), "refs/heads/$1");
        assert_eq!(m.expand("refs/heads/${2}").unwrap(), "refs/heads/${2}");
        assert_eq!(m.expand("x/$(10)").unwrap(), "x/$(10)");
    }

    #[test]
    fn circular_reference_is_fatal() {
        let m = map(&[("A", "$B"), ("B", "$A")]);
        match m.expand("$A").unwrap_err() {
            ConfigError::CircularVariable { name } => assert_eq!(name, "A"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn self_reference_is_fatal() {
        let m = map(&[("A", "x$A")]);
        assert!(matches!(
            m.expand("$A").unwrap_err(),
            ConfigError::CircularVariable { .. }
        ));
    }

    #[test]
    fn unknown_variable_is_fatal() {
        let m = VarMap::new();
        assert!(matches!(
            m.expand("$Nope").unwrap_err(),
            ConfigError::UndefinedVariable { .. }
        ));
    }
}
