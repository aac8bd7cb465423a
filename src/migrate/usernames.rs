//! Username and slug resolution.
//!
//! The target rejects empty, reserved or malformed usernames, and every
//! account needs a non-empty slug. Source dumps rarely satisfy both, so
//! resolution runs a deterministic fallback cascade: raw username, then
//! sanitized username, then the raw and sanitized alternative. The first
//! candidate that validates wins, and a fully failed cascade means "skip
//! this user, do not create".

use regex::Regex;
use std::sync::OnceLock;

/// The target's username length cap.
const MAX_USERNAME_LEN: usize = 100;

/// Names the target refuses outright.
const RESERVED_USERNAMES: &[&str] = &["guest", "system"];

static VALID_USERNAME: OnceLock<Regex> = OnceLock::new();
static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();

fn valid_username_pattern() -> &'static Regex {
    VALID_USERNAME.get_or_init(|| {
        Regex::new("^['\"\\s\\-+.*\\[\\]0-9\u{00BF}-\u{1FFF}\u{2C00}-\u{D7FF}\\w]+$")
            .expect("valid username pattern compiles")
    })
}

fn unsafe_chars_pattern() -> &'static Regex {
    UNSAFE_CHARS.get_or_init(|| {
        Regex::new("[^\\w\\s.\\-*\u{00BF}-\u{1FFF}\u{2C00}-\u{D7FF}]")
            .expect("unsafe chars pattern compiles")
    })
}

/// The target's username-validity rule.
pub fn is_username_valid(username: &str) -> bool {
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        return false;
    }
    if RESERVED_USERNAMES
        .iter()
        .any(|reserved| username.eq_ignore_ascii_case(reserved))
    {
        return false;
    }
    valid_username_pattern().is_match(username)
}

/// The target's slugifier: lowercase, alphanumeric runs joined by single
/// dashes, everything else dropped. May come out empty.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Strip characters outside the safe identifier class, then drop whitespace,
/// `*`, and a small set of diacritics the target's validator chokes on.
pub fn clean_username(username: &str) -> String {
    let stripped = unsafe_chars_pattern().replace_all(username, "");
    stripped
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '*' | 'æ' | 'ø' | 'å'))
        .collect()
}

/// A resolved identity for user creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUsername {
    pub username: String,
    pub slug: String,
}

fn candidate(username: &str) -> Option<ResolvedUsername> {
    let slug = slugify(username);
    if is_username_valid(username) && !slug.is_empty() {
        Some(ResolvedUsername {
            username: username.to_string(),
            slug,
        })
    } else {
        None
    }
}

/// Resolve `(username, slug)` through the fallback cascade, or `None` when
/// no step yields a valid identity.
pub fn resolve_username(username: &str, alternative: &str) -> Option<ResolvedUsername> {
    candidate(username)
        .or_else(|| candidate(&clean_username(username)))
        .or_else(|| {
            if alternative.is_empty() {
                None
            } else {
                candidate(alternative).or_else(|| candidate(&clean_username(alternative)))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_username_wins_when_valid() {
        let resolved = resolve_username("dragonfly", "ignored").unwrap();
        assert_eq!(resolved.username, "dragonfly");
        assert_eq!(resolved.slug, "dragonfly");
    }

    #[test]
    fn sanitized_username_is_second_choice() {
        let resolved = resolve_username("drag@on#fly!", "").unwrap();
        assert_eq!(resolved.username, "dragonfly");
    }

    #[test]
    fn alternative_is_used_when_the_primary_fails() {
        let resolved = resolve_username("///", "backup name").unwrap();
        assert_eq!(resolved.username, "backup name");
        assert_eq!(resolved.slug, "backup-name");
    }

    #[test]
    fn cascade_can_fail_entirely() {
        assert_eq!(resolve_username("", ""), None);
        assert_eq!(resolve_username("@@@", "###"), None);
        // a reserved name offers no valid identity either
        assert_eq!(resolve_username("guest", ""), None);
    }

    #[test]
    fn resolution_is_deterministic_and_always_valid() {
        let inputs = [
            ("alice", "bob"),
            ("al ice", ""),
            ("@@", "bêta tester"),
            ("çrème*brûlée", "fallback"),
            ("", "økonom"),
        ];
        for (raw, alt) in inputs {
            let first = resolve_username(raw, alt);
            let second = resolve_username(raw, alt);
            assert_eq!(first, second);
            if let Some(resolved) = first {
                assert!(is_username_valid(&resolved.username));
                assert!(!resolved.slug.is_empty());
            }
        }
    }

    #[test]
    fn slugify_collapses_separator_runs() {
        assert_eq!(slugify("Hello,   World!"), "hello-world");
        assert_eq!(slugify("--__--"), "");
        assert_eq!(slugify("Tech & Science"), "tech-science");
    }

    #[test]
    fn clean_username_drops_whitespace_and_diacritics() {
        assert_eq!(clean_username("bjørn åse"), "bjrnse");
        assert_eq!(clean_username("star*man"), "starman");
        assert_eq!(clean_username("plain"), "plain");
    }
}
