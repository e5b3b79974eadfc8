//! Validation of git ref names produced by the mapper.
//!
//! The rules here are the subset of `git check-ref-format` that matters for
//! generated names; the full set of platform quirks is left to git itself
//! when the ref is finally written.

use thiserror::Error;

/// Reasons a generated ref name cannot be accepted.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum RefnameError {
    #[error("empty ref name")]
    Empty,

    #[error("component starts or ends with a forbidden character")]
    BadComponentEdge,

    #[error("contains an empty path component")]
    EmptyComponent,

    #[error("contains a forbidden character or sequence")]
    BadCharacter,
}

/// Check a full ref name (`refs/...`).
pub fn check(refname: &str) -> Result<(), RefnameError> {
    if refname.is_empty() {
        return Err(RefnameError::Empty);
    }
    if refname.starts_with('/') || refname.ends_with('/') {
        return Err(RefnameError::EmptyComponent);
    }
    if refname.ends_with(".lock") || refname.contains("..") || refname.contains("@{") {
        return Err(RefnameError::BadCharacter);
    }

    for component in refname.split('/') {
        if component.is_empty() {
            return Err(RefnameError::EmptyComponent);
        }
        if component.starts_with('.') || component.ends_with('.') {
            return Err(RefnameError::BadComponentEdge);
        }
        for c in component.chars() {
            match c {
                '\0'..='\x1f' | '\x7f' => return Err(RefnameError::BadCharacter),
                ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\' => {
                    return Err(RefnameError::BadCharacter)
                }
                _ => (),
            }
        }
    }

    Ok(())
}

/// Replace characters git refuses with `_`, so that label texts and branch
/// directory names survive as ref components. Slashes are kept; everything
/// else invalid becomes a single underscore.
pub fn scrub(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '\0'..='\x1f' | '\x7f' => out.push('_'),
            ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\' => out.push('_'),
            _ => out.push(c),
        }
    }

    // Collapse the sequences the component rules forbid.
    let out = out.replace("..", "__").replace("@{", "@_");
    let out = out.trim_matches('/');

    out.split('/')
        .map(|component| component.trim_matches('.'))
        .filter(|component| !component.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_refs() {
        assert!(check("refs/heads/main").is_ok());
        assert!(check("refs/heads/users/kim/feat").is_ok());
        assert!(check("refs/tags/v1.0").is_ok());
        assert!(check("refs/heads/exp_deleted@r20").is_ok());
    }

    #[test]
    fn rejects_bad_refs() {
        assert_eq!(check("").unwrap_err(), RefnameError::Empty);
        assert_eq!(check("refs//heads").unwrap_err(), RefnameError::EmptyComponent);
        assert_eq!(check("/refs/heads/x").unwrap_err(), RefnameError::EmptyComponent);
        assert_eq!(check("refs/heads/x/").unwrap_err(), RefnameError::EmptyComponent);
        assert_eq!(
            check("refs/heads/.hidden").unwrap_err(),
            RefnameError::BadComponentEdge
        );
        assert_eq!(
            check("refs/heads/a..b").unwrap_err(),
            RefnameError::BadCharacter
        );
        assert_eq!(
            check("refs/heads/a b").unwrap_err(),
            RefnameError::BadCharacter
        );
        assert_eq!(
            check("refs/heads/x.lock").unwrap_err(),
            RefnameError::BadCharacter
        );
        assert_eq!(
            check("refs/heads/a@{1}").unwrap_err(),
            RefnameError::BadCharacter
        );
    }

    #[test]
    fn scrub_makes_labels_usable() {
        assert_eq!(scrub("Release 1.0"), "Release_1.0");
        assert_eq!(scrub("a:b*c"), "a_b_c");
        assert_eq!(scrub("weird..name"), "weird__name");
        assert_eq!(scrub("/leading/and/trailing/"), "leading/and/trailing");
        assert!(check(&format!("refs/tags/{}", scrub("Release 1.0"))).is_ok());
    }
}
