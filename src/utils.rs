use regex::Regex;
use serde::{Deserialize, Serialize};

/// Sanitizes a filename by replacing invalid characters
pub fn sanitize_filename(filename: &str, replacer: &str) -> String {
    let mut out = String::with_capacity(filename.len());
    for c in filename.chars() {
        match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => out.push_str(replacer),
            c if c.is_control() => out.push_str(replacer),
            c => out.push(c),
        }
    }
    out.trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Casing {
    Nothing,
    Lower,
    Upper,
    Start,
    Sentence,
}

impl Default for Casing {
    fn default() -> Self {
        Casing::Nothing
    }
}

/// Applies a casing transformation to a string.
pub fn change_case(s: &str, casing: Casing) -> String {
    match casing {
        Casing::Nothing => s.to_string(),
        Casing::Lower => s.to_lowercase(),
        Casing::Upper => s.to_uppercase(),
        Casing::Start => s
            .split_whitespace()
            .map(capitalize_word)
            .collect::<Vec<_>>()
            .join(" "),
        Casing::Sentence => capitalize_word(s),
    }
}

fn capitalize_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Joins a list of names as "A, B & C".
pub fn and_comma_concat(names: &[String]) -> String {
    match names.len() {
        0 => String::new(),
        1 => names[0].clone(),
        _ => {
            let head = &names[..names.len() - 1];
            format!("{} & {}", head.join(", "), names[names.len() - 1])
        }
    }
}

/// Strips featuring credits from a title, e.g. "Song (feat. X)" -> "Song".
pub fn remove_features(title: &str) -> String {
    let re = Regex::new(r"(?i)[\(\[]?\s*feat\.?(uring)?\s+[^\)\]]*[\)\]]?").unwrap();
    let cleaned = re.replace_all(title, "");
    cleaned.trim().trim_end_matches(['(', '[']).trim().to_string()
}

/// Removes duplicates while preserving first-seen order.
pub fn unique_array(values: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .iter()
        .filter(|v| seen.insert(v.to_lowercase()))
        .cloned()
        .collect()
}

/// Expands a Y/M/D date template, longest placeholders first.
pub fn format_date(year: &str, month: &str, day: &str, template: &str) -> String {
    let mut out = template.to_string();
    for (placeholders, value) in [
        (["YYYY", "YY", "Y"], year),
        (["MM", "M", ""], month),
        (["DD", "D", ""], day),
    ] {
        for p in placeholders {
            if !p.is_empty() && out.contains(p) {
                out = out.replace(p, value);
            }
        }
    }
    out
}
