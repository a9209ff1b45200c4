//! File-mask matching.
//!
//! A mask is a glob (`*`, `?`, `[a-z]`, `[!a-z]`); a leading `!` inverts it
//! into an exclusion. Matching a filename against a job's mask list walks
//! the masks in order: the first `Match` accepts the file, the first
//! `Exclude` rejects it and short-circuits the rest of the chain.

/// Three-valued result of matching one mask against one filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMatch {
    Match,
    Exclude,
    Unrelated,
}

/// Match a single mask against a filename.
pub fn pmatch(mask: &str, filename: &str) -> FilterMatch {
    if let Some(inverted) = mask.strip_prefix('!') {
        if glob_match(inverted.as_bytes(), filename.as_bytes()) {
            FilterMatch::Exclude
        } else {
            FilterMatch::Unrelated
        }
    } else if glob_match(mask.as_bytes(), filename.as_bytes()) {
        FilterMatch::Match
    } else {
        FilterMatch::Unrelated
    }
}

/// Walk a mask chain for one filename. Returns `true` when the file is
/// selected, `false` when excluded or no mask relates to it.
pub fn match_chain<'a, I>(masks: I, filename: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    for mask in masks {
        match pmatch(mask, filename) {
            FilterMatch::Match => return true,
            FilterMatch::Exclude => return false,
            FilterMatch::Unrelated => {}
        }
    }
    false
}

fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => {
            // Greedy with backtracking.
            (0..=name.len()).any(|skip| glob_match(rest, &name[skip..]))
        }
        Some((b'?', rest)) => !name.is_empty() && glob_match(rest, &name[1..]),
        Some((b'[', rest)) => match_class(rest, name),
        Some((&c, rest)) => {
            name.first() == Some(&c) && glob_match(rest, &name[1..])
        }
    }
}

fn match_class(pattern: &[u8], name: &[u8]) -> bool {
    let Some(&ch) = name.first() else {
        return false;
    };
    let (negated, set_pattern) = match pattern.split_first() {
        Some((b'!', rest)) | Some((b'^', rest)) => (true, rest),
        _ => (false, pattern),
    };
    let Some(end) = set_pattern.iter().position(|&b| b == b']') else {
        // Unterminated class: treat '[' as a literal and keep the full
        // remainder, including any stripped '!'/'^'.
        return ch == b'[' && glob_match(pattern, &name[1..]);
    };
    let (set, rest) = (&set_pattern[..end], &set_pattern[end + 1..]);
    let mut hit = false;
    let mut i = 0;
    while i < set.len() {
        if i + 2 < set.len() && set[i + 1] == b'-' {
            if set[i] <= ch && ch <= set[i + 2] {
                hit = true;
            }
            i += 3;
        } else {
            if set[i] == ch {
                hit = true;
            }
            i += 1;
        }
    }
    if hit != negated {
        glob_match(rest, &name[1..])
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_and_wildcards() {
        assert_eq!(pmatch("a.dat", "a.dat"), FilterMatch::Match);
        assert_eq!(pmatch("*.dat", "a.dat"), FilterMatch::Match);
        assert_eq!(pmatch("*.dat", "a.txt"), FilterMatch::Unrelated);
        assert_eq!(pmatch("a?c", "abc"), FilterMatch::Match);
        assert_eq!(pmatch("a?c", "ac"), FilterMatch::Unrelated);
        assert_eq!(pmatch("*", "anything"), FilterMatch::Match);
    }

    #[test]
    fn test_character_classes() {
        assert_eq!(pmatch("data[0-9].bin", "data7.bin"), FilterMatch::Match);
        assert_eq!(pmatch("data[0-9].bin", "dataX.bin"), FilterMatch::Unrelated);
        assert_eq!(pmatch("[!a]x", "bx"), FilterMatch::Match);
        assert_eq!(pmatch("[!a]x", "ax"), FilterMatch::Unrelated);
        assert_eq!(pmatch("[abc]y", "cy"), FilterMatch::Match);
    }

    #[test]
    fn test_unterminated_class_is_literal() {
        assert_eq!(pmatch("[0-9.dat", "[0-9.dat"), FilterMatch::Match);
        // The '!' stays part of the literal text when no ']' follows.
        assert_eq!(pmatch("[!ab", "[!ab"), FilterMatch::Match);
        assert_eq!(pmatch("[!ab", "ab"), FilterMatch::Unrelated);
        assert_eq!(pmatch("[^ab", "[^ab"), FilterMatch::Match);
    }

    #[test]
    fn test_exclusion() {
        assert_eq!(pmatch("!*.tmp", "x.tmp"), FilterMatch::Exclude);
        assert_eq!(pmatch("!*.tmp", "x.dat"), FilterMatch::Unrelated);
    }

    #[test]
    fn test_chain_exclude_short_circuits() {
        let masks = ["!secret*", "*"];
        assert!(!match_chain(masks, "secret.dat"));
        assert!(match_chain(masks, "public.dat"));
        assert!(!match_chain(["*.dat"], "a.txt"));
    }

    #[test]
    fn test_multiple_stars_backtrack() {
        assert_eq!(pmatch("a*b*c", "axxbyyc"), FilterMatch::Match);
        assert_eq!(pmatch("a*b*c", "axxbyyd"), FilterMatch::Unrelated);
    }
}
