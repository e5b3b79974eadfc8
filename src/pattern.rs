//! Wildcard pattern matching for VSS paths and ref names.
//!
//! Patterns follow git wildmatch conventions: `?` matches one character
//! except `/`, `*` a run of characters except `/`, `**` anything including
//! `/`, and `**/` whole directory components (possibly none). `{a,b,c}`
//! alternation nests and may contain wildcards. `[...]` ranges are not
//! supported. A pattern without `/` matches at any depth; a trailing `/`
//! restricts the pattern to directories.
//!
//! Each explicit wildcard captures the substring it matched, addressable in
//! substitution templates as `$1`, `$2`, ... in source order, or by `*`/`**`
//! markers which consume captures of the same kind in order.

use regex::Regex;

use crate::errors::ConfigError;
use crate::vars::VarMap;

/// What kind of wildcard produced a capture.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WildKind {
    Question,
    Star,
    DoubleStar,
}

/// A compiled wildcard pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    regex: Regex,
    kinds: Vec<WildKind>,
    dir_only: bool,
}

/// Capture strings from a successful match, indexed from 1 as `$1`.
#[derive(Clone, Debug, Default)]
pub struct MatchCaptures {
    caps: Vec<String>,
    kinds: Vec<WildKind>,
}

impl MatchCaptures {
    /// The `$n` capture; empty for a wildcard in an alternation branch that
    /// did not participate in the match, or for an out-of-range index.
    pub fn get(&self, n: usize) -> &str {
        if n == 0 || n > self.caps.len() {
            ""
        } else {
            &self.caps[n - 1]
        }
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    fn nth_of_kind(&self, kind: WildKind, ordinal: usize) -> Option<usize> {
        self.kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == kind)
            .map(|(i, _)| i + 1)
            .nth(ordinal)
    }
}

impl Pattern {
    /// Compile a pattern string.
    pub fn compile(pattern: &str) -> Result<Pattern, ConfigError> {
        let mut source = pattern;

        let mut dir_only = false;
        if source.ends_with('/') && source.len() > 1 {
            dir_only = true;
            source = &source[..source.len() - 1];
        }
        let rooted_prefix = source.starts_with('/');
        let source = source.trim_start_matches('/');

        if source.is_empty() {
            return Err(ConfigError::BadPattern {
                pattern: pattern.to_string(),
                detail: "empty pattern".to_string(),
            });
        }

        let mut kinds = Vec::new();
        let chars: Vec<char> = source.chars().collect();
        let body = compile_part(&chars, &mut 0, false, &mut kinds).map_err(|detail| {
            ConfigError::BadPattern {
                pattern: pattern.to_string(),
                detail,
            }
        })?;

        // A pattern with no slash matches at any depth, per gitignore rules.
        let anchored = rooted_prefix || source.contains('/');
        let full = if anchored {
            format!("^{}$", body)
        } else {
            format!("^(?:[^/]+/)*{}$", body)
        };

        let regex = Regex::new(&full).map_err(|err| ConfigError::BadPattern {
            pattern: pattern.to_string(),
            detail: err.to_string(),
        })?;

        Ok(Pattern {
            source: pattern.to_string(),
            regex,
            kinds,
            dir_only,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_dir_only(&self) -> bool {
        self.dir_only
    }

    /// Match `path` (no leading slash), returning captures on success.
    pub fn matches(&self, path: &str, is_dir: bool) -> Option<MatchCaptures> {
        if self.dir_only && !is_dir {
            return None;
        }

        let m = self.regex.captures(path)?;
        let caps = (1..=self.kinds.len())
            .map(|i| m.get(i).map(|g| g.as_str().to_string()).unwrap_or_default())
            .collect();

        Some(MatchCaptures {
            caps,
            kinds: self.kinds.clone(),
        })
    }
}

/// Compiles pattern characters into regex source, stopping at a top-level
/// `,` or `}` when `in_group` is set.
fn compile_part(
    chars: &[char],
    pos: &mut usize,
    in_group: bool,
    kinds: &mut Vec<WildKind>,
) -> Result<String, String> {
    let mut out = String::new();

    while *pos < chars.len() {
        let c = chars[*pos];
        match c {
            ',' | '}' if in_group => break,
            '{' => {
                *pos += 1;
                let mut branches = Vec::new();
                loop {
                    branches.push(compile_part(chars, pos, true, kinds)?);
                    match chars.get(*pos) {
                        Some(',') => {
                            *pos += 1;
                        }
                        Some('}') => {
                            *pos += 1;
                            break;
                        }
                        _ => return Err("unterminated `{` group".to_string()),
                    }
                }
                out.push_str("(?:");
                out.push_str(&branches.join("|"));
                out.push(')');
            }
            '?' => {
                *pos += 1;
                kinds.push(WildKind::Question);
                out.push_str("([^/])");
            }
            '*' => {
                if chars.get(*pos + 1) == Some(&'*') {
                    *pos += 2;
                    kinds.push(WildKind::DoubleStar);
                    if chars.get(*pos) == Some(&'/') {
                        // `**/` spans whole components, possibly none; the
                        // capture keeps each component's trailing slash.
                        *pos += 1;
                        out.push_str("((?:[^/]+/)*)");
                    } else {
                        out.push_str("(.*)");
                    }
                } else {
                    *pos += 1;
                    kinds.push(WildKind::Star);
                    out.push_str("([^/]*)");
                }
            }
            '[' => return Err("`[...]` ranges are not supported".to_string()),
            _ => {
                *pos += 1;
                out.push_str(&regex::escape(&c.to_string()));
            }
        }
    }

    Ok(out)
}

/// A semicolon-separated list of subpatterns, tested in order.
///
/// A `!` prefix negates a subpattern. The first matching subpattern decides
/// the outcome: a negative match means no-match. When nothing matches and
/// every subpattern is negative, the combined pattern matches (as if an
/// implicit trailing `**` were present).
#[derive(Clone, Debug)]
pub struct CombinedPattern {
    source: String,
    subs: Vec<(bool, Pattern)>,
}

impl CombinedPattern {
    pub fn compile(text: &str) -> Result<CombinedPattern, ConfigError> {
        let mut subs = Vec::new();

        for part in text.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (negated, body) = match part.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, part),
            };
            subs.push((negated, Pattern::compile(body)?));
        }

        if subs.is_empty() {
            return Err(ConfigError::BadPattern {
                pattern: text.to_string(),
                detail: "empty pattern list".to_string(),
            });
        }

        Ok(CombinedPattern {
            source: text.to_string(),
            subs,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str, is_dir: bool) -> Option<MatchCaptures> {
        for (negated, pattern) in &self.subs {
            if let Some(caps) = pattern.matches(path, is_dir) {
                return if *negated { None } else { Some(caps) };
            }
        }

        if self.subs.iter().all(|(negated, _)| *negated) {
            Some(MatchCaptures::default())
        } else {
            None
        }
    }
}

/// Expand a substitution template against captures and variables.
///
/// `$N`, `${N}` and `$(N)` insert the N-th capture. Bare `*` and `**`
/// markers consume captures of the same wildcard kind in source order.
/// `$Name` forms are resolved against `vars`.
pub fn substitute(
    template: &str,
    caps: &MatchCaptures,
    vars: &VarMap,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut pos = 0;
    let mut star_ordinal = 0;
    let mut dstar_ordinal = 0;

    while pos < chars.len() {
        match chars[pos] {
            '*' => {
                let kind = if chars.get(pos + 1) == Some(&'*') {
                    pos += 2;
                    let ord = dstar_ordinal;
                    dstar_ordinal += 1;
                    (WildKind::DoubleStar, ord)
                } else {
                    pos += 1;
                    let ord = star_ordinal;
                    star_ordinal += 1;
                    (WildKind::Star, ord)
                };
                if let Some(n) = caps.nth_of_kind(kind.0, kind.1) {
                    out.push_str(caps.get(n));
                }
            }
            '$' => {
                pos += 1;
                match chars.get(pos) {
                    Some('$') => {
                        pos += 1;
                        out.push('$');
                    }
                    Some(&open) if open == '{' || open == '(' => {
                        let close = if open == '{' { '}' } else { ')' };
                        let start = pos + 1;
                        let mut end = start;
                        while end < chars.len() && chars[end] != close {
                            end += 1;
                        }
                        if end == chars.len() {
                            return Err(ConfigError::BadPattern {
                                pattern: template.to_string(),
                                detail: format!("unterminated `${}` reference", open),
                            });
                        }
                        let name: String = chars[start..end].iter().collect();
                        pos = end + 1;
                        push_reference(&mut out, &name, caps, vars)?;
                    }
                    Some(c) if c.is_alphanumeric() || *c == '_' => {
                        let start = pos;
                        while pos < chars.len()
                            && (chars[pos].is_alphanumeric() || chars[pos] == '_')
                        {
                            pos += 1;
                        }
                        let name: String = chars[start..pos].iter().collect();
                        push_reference(&mut out, &name, caps, vars)?;
                    }
                    _ => out.push('$'),
                }
            }
            c => {
                pos += 1;
                out.push(c);
            }
        }
    }

    Ok(out)
}

fn push_reference(
    out: &mut String,
    name: &str,
    caps: &MatchCaptures,
    vars: &VarMap,
) -> Result<(), ConfigError> {
    if name.chars().all(|c| c.is_ascii_digit()) {
        let n: usize = name.parse().unwrap_or(0);
        out.push_str(caps.get(n));
        Ok(())
    } else {
        out.push_str(&vars.expand(&format!("${{{}}}", name))?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(pattern: &str, path: &str) -> MatchCaptures {
        Pattern::compile(pattern)
            .unwrap()
            .matches(path, true)
            .unwrap()
    }

    #[test]
    fn literal() {
        let p = Pattern::compile("trunk/src").unwrap();
        assert!(p.matches("trunk/src", true).is_some());
        assert!(p.matches("trunk/srcx", true).is_none());
        assert!(p.matches("trunk", true).is_none());
    }

    #[test]
    fn question_mark() {
        let p = Pattern::compile("a?c").unwrap();
        assert!(p.matches("abc", false).is_some());
        assert!(p.matches("a/c", false).is_none());
        assert_eq!(caps("a?c", "abc").get(1), "b");
    }

    #[test]
    fn star_stays_in_component() {
        let p = Pattern::compile("branches/*").unwrap();
        assert!(p.matches("branches/feat", true).is_some());
        assert!(p.matches("branches/feat/x", true).is_none());
        assert_eq!(caps("branches/*", "branches/feat").get(1), "feat");
        assert_eq!(caps("branches/*", "branches/").get(1), "");
    }

    #[test]
    fn double_star_crosses_components() {
        let m = caps("src/**", "src/a/b/c.txt");
        assert_eq!(m.get(1), "a/b/c.txt");
    }

    #[test]
    fn double_star_slash_matches_zero_components() {
        let p = Pattern::compile("**/trunk").unwrap();
        assert!(p.matches("trunk", true).is_some());
        assert!(p.matches("proj/trunk", true).is_some());
        assert!(p.matches("a/b/trunk", true).is_some());
        assert!(p.matches("trunkx", true).is_none());

        assert_eq!(caps("**/trunk", "a/b/trunk").get(1), "a/b/");
        assert_eq!(caps("**/trunk", "trunk").get(1), "");
    }

    #[test]
    fn alternation() {
        let p = Pattern::compile("**/{users/branches,branches/users}/*/*").unwrap();
        let m = p.matches("proj/users/branches/kim/feat", true).unwrap();
        assert_eq!(m.get(2), "kim");
        assert_eq!(m.get(3), "feat");

        assert!(p.matches("proj/branches/users/kim/feat", true).is_some());
        assert!(p.matches("proj/branches/kim/feat", true).is_none());
    }

    #[test]
    fn nested_alternation() {
        let p = Pattern::compile("{a,b{c,d}}/x").unwrap();
        assert!(p.matches("a/x", true).is_some());
        assert!(p.matches("bc/x", true).is_some());
        assert!(p.matches("bd/x", true).is_some());
        assert!(p.matches("b/x", true).is_none());
    }

    #[test]
    fn single_component_matches_at_any_depth() {
        let p = Pattern::compile("*.o").unwrap();
        assert!(p.matches("main.o", false).is_some());
        assert!(p.matches("src/deep/main.o", false).is_some());
        assert!(p.matches("main.c", false).is_none());
    }

    #[test]
    fn trailing_slash_is_dir_only() {
        let p = Pattern::compile("build/").unwrap();
        assert!(p.is_dir_only());
        assert!(p.matches("src/build", true).is_some());
        assert!(p.matches("src/build", false).is_none());
    }

    #[test]
    fn ranges_rejected() {
        assert!(Pattern::compile("a[bc]d").is_err());
    }

    #[test]
    fn unterminated_group_rejected() {
        assert!(Pattern::compile("{a,b").is_err());
    }

    #[test]
    fn combined_first_match_wins() {
        let c = CombinedPattern::compile("!*.tmp;*.t*").unwrap();
        assert!(c.matches("a.tmp", false).is_none());
        assert!(c.matches("a.txt", false).is_some());
        assert!(c.matches("a.bin", false).is_none());
    }

    #[test]
    fn combined_all_negative_defaults_to_match() {
        let c = CombinedPattern::compile("!*.o;!*.a").unwrap();
        assert!(c.matches("main.c", false).is_some());
        assert!(c.matches("main.o", false).is_none());
        assert!(c.matches("lib.a", false).is_none());
    }

    #[test]
    fn substitute_numbered() {
        let m = caps("**/branches/*", "proj/branches/feat");
        let vars = VarMap::new();
        assert_eq!(
            substitute("refs/heads/$2", &m, &vars).unwrap(),
            "refs/heads/feat"
        );
        assert_eq!(
            substitute("refs/heads/${2}", &m, &vars).unwrap(),
            "refs/heads/feat"
        );
        assert_eq!(
            substitute("refs/heads/$(2)", &m, &vars).unwrap(),
            "refs/heads/feat"
        );
    }

    #[test]
    fn substitute_positional_markers_by_kind() {
        // `*` markers pick up `*` captures even when a `**` capture
        // precedes them in the pattern.
        let m = caps("**/branches/*", "proj/branches/feat");
        let vars = VarMap::new();
        assert_eq!(
            substitute("refs/heads/*", &m, &vars).unwrap(),
            "refs/heads/feat"
        );
        assert_eq!(substitute("**x", &m, &vars).unwrap(), "proj/x");
    }

    #[test]
    fn substitute_variables() {
        let m = MatchCaptures::default();
        let mut vars = VarMap::new();
        vars.set("MapTrunkTo", "main");
        assert_eq!(
            substitute("refs/heads/$MapTrunkTo", &m, &vars).unwrap(),
            "refs/heads/main"
        );
    }

    #[test]
    fn substitute_out_of_range_is_empty() {
        let m = caps("*", "x");
        let vars = VarMap::new();
        assert_eq!(substitute("a$9b", &m, &vars).unwrap(), "ab");
    }
}
