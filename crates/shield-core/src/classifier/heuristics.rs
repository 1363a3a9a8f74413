//! Name-shape heuristics applied after the rule sets

/// Substrings that mark a domain as suspicious
pub const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "xxx", "sex", "porn", "adult", "nude", "naked", "nsfw", "18+", "gore", "death", "kill",
    "hack", "crack", "keygen", "torrent", "pirate", "warez",
];

const MAX_HYPHENS: usize = 3;
const MAX_LABELS: usize = 4;
const DIGIT_RUN: usize = 5;

/// First suspicious keyword contained in `domain`
pub fn suspicious_keyword(domain: &str) -> Option<&'static str> {
    SUSPICIOUS_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| domain.contains(keyword))
}

/// Why `domain` looks like a phishing name, if it does
pub fn phishing_pattern(domain: &str) -> Option<&'static str> {
    if domain.matches('-').count() > MAX_HYPHENS {
        return Some("excessive hyphens");
    }
    if domain.split('.').count() > MAX_LABELS {
        return Some("excessive subdomains");
    }
    if longest_digit_run(domain) >= DIGIT_RUN {
        return Some("long digit sequence");
    }
    None
}

fn longest_digit_run(domain: &str) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for b in domain.bytes() {
        if b.is_ascii_digit() {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest
}
