#![forbid(unsafe_code)]

//! Path text parsing.
//!
//! Grammar, informally:
//!
//! ```text
//! paths  := item ("," item)*
//! item   := (segment | "{" paths "}")*      brace groups distribute
//! path   := step ("." step)*
//! step   := name ("<" TypeName ">")?
//! ```
//!
//! `"A{B,C}.D"` expands to `["A.B.D", "A.C.D"]`. Whitespace is ignored.

use crate::error::{ModelError, Result};

const MAX_GROUP_NESTING: usize = 16;
/// Upper bound on the paths one text may expand to.
const MAX_EXPANDED_PATHS: usize = 1024;

/// One step of a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    /// Property name.
    pub name: String,
    /// Sub-type the step's value is narrowed to, from `Name<Type>`.
    pub cast: Option<String>,
}

fn invalid(path: &str, reason: impl Into<String>) -> ModelError {
    ModelError::InvalidPath {
        path: path.to_owned(),
        reason: reason.into(),
    }
}

/// Expand brace groups and comma lists into individual dotted paths.
pub fn expand_paths(text: &str) -> Result<Vec<String>> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    let mut nesting = 0usize;
    for &c in &chars {
        match c {
            '{' => nesting += 1,
            '}' => nesting = nesting.saturating_sub(1),
            _ => {}
        }
        if nesting > MAX_GROUP_NESTING {
            return Err(invalid(text, "brace groups nested too deeply"));
        }
    }
    let mut pos = 0;
    let paths = parse_list(text, &chars, &mut pos)?;
    if pos != chars.len() {
        return Err(invalid(text, format!("unexpected '{}'", chars[pos])));
    }
    if paths.iter().any(String::is_empty) {
        return Err(invalid(text, "empty path"));
    }
    Ok(paths)
}

fn too_many_paths(text: &str) -> ModelError {
    invalid(text, format!("expands to more than {MAX_EXPANDED_PATHS} paths"))
}

fn parse_list(text: &str, chars: &[char], pos: &mut usize) -> Result<Vec<String>> {
    let mut out = parse_item(text, chars, pos)?;
    while chars.get(*pos) == Some(&',') {
        *pos += 1;
        out.extend(parse_item(text, chars, pos)?);
        if out.len() > MAX_EXPANDED_PATHS {
            return Err(too_many_paths(text));
        }
    }
    Ok(out)
}

fn parse_item(text: &str, chars: &[char], pos: &mut usize) -> Result<Vec<String>> {
    let mut prefixes = vec![String::new()];
    let mut after_group = false;
    while let Some(&c) = chars.get(*pos) {
        match c {
            ',' | '}' => break,
            '{' => {
                *pos += 1;
                let group = parse_list(text, chars, pos)?;
                if chars.get(*pos) != Some(&'}') {
                    return Err(invalid(text, "unbalanced '{'"));
                }
                *pos += 1;
                if prefixes.len().saturating_mul(group.len()) > MAX_EXPANDED_PATHS {
                    return Err(too_many_paths(text));
                }
                prefixes = prefixes
                    .iter()
                    .flat_map(|prefix| group.iter().map(move |tail| join(prefix, tail)))
                    .collect();
                after_group = true;
            }
            '<' => {
                let end = chars[*pos..]
                    .iter()
                    .position(|&ch| ch == '>')
                    .ok_or_else(|| invalid(text, "unterminated '<'"))?;
                let cast: String = chars[*pos..*pos + end + 1].iter().collect();
                for prefix in &mut prefixes {
                    prefix.push_str(&cast);
                }
                *pos += end + 1;
            }
            _ => {
                for prefix in &mut prefixes {
                    if after_group && c != '.' {
                        prefix.push('.');
                    }
                    prefix.push(c);
                }
                after_group = false;
                *pos += 1;
            }
        }
    }
    Ok(prefixes)
}

fn join(prefix: &str, tail: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('.') || tail.is_empty() || tail.starts_with('.') {
        format!("{prefix}{tail}")
    } else {
        format!("{prefix}.{tail}")
    }
}

/// Split one dotted path into steps, keeping `<Cast>` annotations intact.
pub fn parse_steps(path: &str) -> Result<Vec<PathStep>> {
    let mut steps = Vec::new();
    let mut depth = 0usize;
    let mut segment = String::new();
    for c in path.chars().filter(|c| !c.is_whitespace()) {
        match c {
            '<' => {
                depth += 1;
                segment.push(c);
            }
            '>' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(path, "unbalanced '>'"))?;
                segment.push(c);
            }
            '.' if depth == 0 => steps.push(parse_step(path, &std::mem::take(&mut segment))?),
            _ => segment.push(c),
        }
    }
    if depth != 0 {
        return Err(invalid(path, "unterminated '<'"));
    }
    steps.push(parse_step(path, &segment)?);
    Ok(steps)
}

fn parse_step(path: &str, segment: &str) -> Result<PathStep> {
    let (name, cast) = match segment.split_once('<') {
        Some((name, rest)) => {
            let cast = rest
                .strip_suffix('>')
                .ok_or_else(|| invalid(path, format!("malformed cast in '{segment}'")))?;
            if !is_identifier(cast) {
                return Err(invalid(path, format!("bad cast type '{cast}'")));
            }
            (name, Some(cast.to_owned()))
        }
        None => (segment, None),
    };
    if !is_identifier(name) {
        return Err(invalid(path, format!("bad step '{segment}'")));
    }
    Ok(PathStep {
        name: name.to_owned(),
        cast,
    })
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_pass_through() {
        assert_eq!(expand_paths("A.B").unwrap(), vec!["A.B"]);
        assert_eq!(expand_paths("A, B.C").unwrap(), vec!["A", "B.C"]);
    }

    #[test]
    fn brace_groups_distribute() {
        assert_eq!(expand_paths("A{B,C}").unwrap(), vec!["A.B", "A.C"]);
        assert_eq!(expand_paths("A.{B,C}.D").unwrap(), vec!["A.B.D", "A.C.D"]);
        assert_eq!(
            expand_paths("X, A{B{C,D},E}").unwrap(),
            vec!["X", "A.B.C", "A.B.D", "A.E"]
        );
        assert_eq!(expand_paths("A{B,C}D").unwrap(), vec!["A.B.D", "A.C.D"]);
    }

    #[test]
    fn casts_survive_expansion() {
        assert_eq!(
            expand_paths("Owner<Manager>{Name,Reports}").unwrap(),
            vec!["Owner<Manager>.Name", "Owner<Manager>.Reports"]
        );
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(expand_paths("A{B").is_err());
        assert!(expand_paths("A}").is_err());
        assert!(expand_paths("A,,B").is_err());
        assert!(expand_paths("A<B").is_err());
        assert!(expand_paths(&format!("{}A{}", "{".repeat(40), "}".repeat(40))).is_err());
    }

    #[test]
    fn expansion_size_is_bounded() {
        assert_eq!(expand_paths(&"{A,B}".repeat(10)).unwrap().len(), 1024);

        let err = expand_paths(&"{A,B}".repeat(20)).unwrap_err();
        assert!(
            matches!(&err, ModelError::InvalidPath { reason, .. } if reason.contains("more than 1024")),
            "unexpected error {err:?}"
        );

        let wide = vec!["A"; 1100].join(",");
        assert!(expand_paths(&wide).is_err());
    }

    #[test]
    fn steps_split_on_dots_outside_casts() {
        let steps = parse_steps("Owner<Manager>.Reports.Name").unwrap();
        assert_eq!(
            steps,
            vec![
                PathStep {
                    name: "Owner".into(),
                    cast: Some("Manager".into())
                },
                PathStep {
                    name: "Reports".into(),
                    cast: None
                },
                PathStep {
                    name: "Name".into(),
                    cast: None
                },
            ]
        );
    }

    #[test]
    fn empty_steps_are_rejected() {
        assert!(parse_steps("A..B").is_err());
        assert!(parse_steps(".A").is_err());
        assert!(parse_steps("A<>").is_err());
    }
}
