//! Glob and brace pattern matching for target references
//!
//! Patterns support `*` (any run of characters), `?` (exactly one
//! character), `{a,b}` alternation and `{1..3}` numeric ranges. Everything
//! else matches literally. Brace groups are expanded into literal candidate
//! patterns first; the remaining glob is compiled with `globset`.

use globset::GlobBuilder;

/// Whether a reference string is a pattern rather than a literal name
pub fn is_pattern(s: &str) -> bool {
    s.contains('*') || s.contains('?') || s.contains('{')
}

/// Expand brace groups into the set of literal candidate patterns.
///
/// `{web,api}-1` becomes `["web-1", "api-1"]`; `host-{1..3}` becomes
/// `["host-1", "host-2", "host-3"]`. Groups may nest and multiple groups
/// expand cartesian-style. A brace group with no comma and no range is
/// left untouched and matches literally.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some((open, close)) = find_brace_group(pattern) else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let inner = &pattern[open + 1..close];
    let suffix = &pattern[close + 1..];

    let options = if let Some(range) = parse_numeric_range(inner) {
        range
    } else if inner.contains(',') {
        split_top_level(inner)
    } else {
        // Not an alternation; the braces stay literal and expansion
        // continues past them
        return expand_braces(suffix)
            .into_iter()
            .map(|rest| format!("{}{{{}}}{}", prefix, inner, rest))
            .collect();
    };

    let mut expanded = Vec::new();
    for option in options {
        let candidate = format!("{}{}{}", prefix, option, suffix);
        expanded.extend(expand_braces(&candidate));
    }
    expanded
}

/// Expand braces and de-duplicate, preserving first-seen order
pub fn expand_pattern(pattern: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    expand_braces(pattern)
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Match a name against a glob pattern (`*` and `?` only).
///
/// The pattern must already be brace-expanded; any remaining braces and
/// bracket characters are escaped so they match literally.
pub fn matches_glob(pattern: &str, name: &str) -> bool {
    let escaped = escape_glob_specials(pattern);
    match GlobBuilder::new(&escaped)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
    {
        Ok(glob) => glob.compile_matcher().is_match(name),
        Err(_) => pattern == name,
    }
}

/// Escape globset syntax beyond `*` and `?` so it matches literally
fn escape_glob_specials(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        if matches!(ch, '[' | ']' | '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Find the first brace group, returning (open, close) byte offsets
fn find_brace_group(pattern: &str) -> Option<(usize, usize)> {
    let bytes = pattern.as_bytes();
    let open = pattern.find('{')?;
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((open, i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Split alternatives on commas that are not inside a nested group
fn split_top_level(inner: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in inner.chars() {
        match ch {
            '{' => {
                depth += 1;
                current.push(ch);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

/// Parse `n..m` into the inclusive list of numbers it denotes
fn parse_numeric_range(inner: &str) -> Option<Vec<String>> {
    let (start, end) = inner.split_once("..")?;
    let start: i64 = start.trim().parse().ok()?;
    let end: i64 = end.trim().parse().ok()?;

    let range: Vec<String> = if start <= end {
        (start..=end).map(|n| n.to_string()).collect()
    } else {
        (end..=start).rev().map(|n| n.to_string()).collect()
    };
    Some(range)
}
