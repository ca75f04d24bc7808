/// Checks if a URL path matches a shell-style glob pattern
///
/// Supported syntax:
/// - `*` matches any run of characters, including `/`
/// - `?` matches exactly one character
/// - `[abc]`, `[a-z]` match one character from a set; `[!abc]` negates it
///
/// Everything else matches literally. The whole candidate must match.
///
/// # Examples
///
/// ```
/// use harvester::url::matches_glob;
///
/// assert!(matches_glob("/products/*", "/products/blue-shirt"));
/// assert!(matches_glob("/products/*", "/products/shirts/blue"));
/// assert!(matches_glob("/p/??", "/p/42"));
/// assert!(!matches_glob("/products/*", "/blog/post"));
/// ```
pub fn matches_glob(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    // Position after the last `*` seen, and the candidate index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    backtrack = Some((p + 1, c));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    c += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(&pattern, p, candidate[c]) {
                        if matched {
                            p = next;
                            c += 1;
                            continue;
                        }
                    } else if candidate[c] == '[' {
                        // Unterminated class: treat `[` literally
                        p += 1;
                        c += 1;
                        continue;
                    }
                }
                literal => {
                    if literal == candidate[c] {
                        p += 1;
                        c += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((star_p, star_c)) => {
                p = star_p;
                c = star_c + 1;
                backtrack = Some((star_p, star_c + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&ch| ch == '*')
}

/// Returns false if the glob has an unterminated character class
pub fn is_valid_glob(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' {
            match class_end(&chars, i) {
                Some(end) => i = end + 1,
                None => return false,
            }
        } else {
            i += 1;
        }
    }
    true
}

/// Index of the `]` closing the class opened at `start`
fn class_end(pattern: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if i < pattern.len() && pattern[i] == '!' {
        i += 1;
    }
    // A `]` right after the opening bracket is a literal member
    if i < pattern.len() && pattern[i] == ']' {
        i += 1;
    }
    while i < pattern.len() {
        if pattern[i] == ']' {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Matches `ch` against the class at `start`, returning (matched, index after class)
fn match_class(pattern: &[char], start: usize, ch: char) -> Option<(bool, usize)> {
    let end = class_end(pattern, start)?;
    let mut i = start + 1;
    let negated = pattern[i] == '!';
    if negated {
        i += 1;
    }

    let mut found = false;
    while i < end {
        if i + 2 < end && pattern[i + 1] == '-' {
            if pattern[i] <= ch && ch <= pattern[i + 2] {
                found = true;
            }
            i += 3;
        } else {
            if pattern[i] == ch {
                found = true;
            }
            i += 1;
        }
    }

    Some((found != negated, end + 1))
}
