//! Name text matching helpers.

/// Folds a string for comparison. Matching is ASCII-case-insensitive by
/// default; the case-sensitive option bypasses folding.
pub fn fold(value: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        value.to_string()
    } else {
        value.to_ascii_lowercase()
    }
}

/// Whether a token contains `*` or `?` wildcard metacharacters.
pub fn has_wildcards(token: &str) -> bool {
    token.contains(['*', '?'])
}

/// Matches a `*`/`?` wildcard pattern against a name.
///
/// Classic two-pointer algorithm with star backtracking: `*` matches any
/// run of characters, `?` exactly one. Both sides are expected to be folded
/// already when matching case-insensitively.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let mut p = 0usize;
    let mut n = 0usize;
    let mut star: Option<usize> = None;
    let mut star_n = 0usize;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_n = n;
            p += 1;
        } else if let Some(star_p) = star {
            // Backtrack: let the last star consume one more character.
            p = star_p + 1;
            star_n += 1;
            n = star_n;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
