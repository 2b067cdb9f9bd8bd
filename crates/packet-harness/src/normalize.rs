//! Debugger output clean-up.
//!
//! The two engines are driven through the same debugger, but the transcript still carries
//! engine- and run-specific noise (prompts, executable paths, thread names, exit notices) that
//! must be dropped before two dumps can be compared byte for byte.

use std::sync::OnceLock;

use regex::bytes::Regex;

struct Rule {
    pattern: Regex,
    replacement: &'static [u8],
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"(?-u)\(lldb\) settings set -- target\.run-args.*", ""),
            (r"(?-u) *\(lldb\).*", ""),
            (r"(?-u) *[Qq][Ee][Mm][Uu].* exe path set from.*", ""),
            (r"(?-u), name = '[^']+'", ""),
            (r"(?-u)r0(\d) =", " r$1 ="),
        ]
        .into_iter()
        .map(|(pattern, replacement)| Rule {
            pattern: Regex::new(pattern).expect("static regex must compile"),
            replacement: replacement.as_bytes(),
        })
        .collect()
    })
}

fn thread_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?-u)^\tT").expect("static regex must compile"))
}

fn process_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?-u)^Process [0-9]* (exited|stopped)").expect("static regex must compile")
    })
}

/// Normalizes a raw debugger transcript. Lines are joined with `\n` and there is no trailing
/// newline.
pub fn normalize(raw: &[u8]) -> Vec<u8> {
    let mut text = raw.to_vec();
    for rule in rules() {
        text = rule
            .pattern
            .replace_all(&text, rule.replacement)
            .into_owned();
    }

    let kept: Vec<&[u8]> = text
        .split(|b| *b == b'\n')
        .filter(|line| {
            !line.is_empty()
                && *line != b"Done!"
                && !thread_line().is_match(line)
                && !process_line().is_match(line)
        })
        .collect();
    kept.join(&b'\n')
}

/// Last line of a normalized transcript.
pub fn last_line(normalized: &[u8]) -> &[u8] {
    normalized
        .rsplit(|b| *b == b'\n')
        .next()
        .unwrap_or_default()
}
