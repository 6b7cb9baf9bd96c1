//! Text normalization for tags, keywords and resource URLs.
//!
//! Every function here is pure and total. The same [`normalize_tag`] runs on
//! freshly extracted tags and on tags written by the store, so stored and fresh
//! values always compare in the same canonical form.

use std::collections::BTreeSet;

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Ordinal, superscript and currency glyphs rewritten before case folding.
fn map_glyph(c: char) -> Option<&'static str> {
    let mapped = match c {
        'º' => "o",
        'ª' => "a",
        '⁰' => "0",
        '¹' => "1",
        '²' => "2",
        '³' => "3",
        '⁴' => "4",
        '⁵' => "5",
        '⁶' => "6",
        '⁷' => "7",
        '⁸' => "8",
        '⁹' => "9",
        '€' => "eur",
        '£' => "gbp",
        '¥' => "jpy",
        _ => return None,
    };
    Some(mapped)
}

/// Removes combining marks after canonical decomposition.
///
/// Case is preserved.
///
/// # Examples
///
/// ```
/// use pomona_core::normalize::strip_accents;
///
/// assert_eq!(strip_accents("Educação"), "Educacao");
/// ```
pub fn strip_accents(value: &str) -> String {
    value.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Canonicalizes a tag.
///
/// The pipeline is: trim, ASCII glyph mapping, lowercase, accent stripping,
/// bracket removal, periods to hyphens, punctuation removal, whitespace runs to
/// a single hyphen, and finally hyphen collapsing and trimming.
///
/// The function is idempotent: `normalize_tag(normalize_tag(x)) == normalize_tag(x)`.
///
/// # Examples
///
/// ```
/// use pomona_core::normalize::normalize_tag;
///
/// assert_eq!(normalize_tag("Índice (2021)"), "indice-2021");
/// assert_eq!(normalize_tag("ine.pt"), "ine-pt");
/// assert_eq!(normalize_tag("  População  Residente "), "populacao-residente");
/// ```
pub fn normalize_tag(value: &str) -> String {
    let mut mapped = String::with_capacity(value.len());
    for c in value.trim().chars() {
        match map_glyph(c) {
            Some(replacement) => mapped.push_str(replacement),
            None => mapped.push(c),
        }
    }

    let lowered = mapped.to_lowercase();

    let mut cleaned = String::with_capacity(lowered.len());
    for c in lowered.nfd().filter(|c| !is_combining_mark(*c)) {
        match c {
            '(' | ')' | '[' | ']' | '{' | '}' | '<' | '>' => {}
            '.' => cleaned.push('-'),
            c if c.is_whitespace() => cleaned.push(' '),
            c if c.is_alphanumeric() || c == '-' => cleaned.push(c),
            _ => {}
        }
    }

    let mut out = String::with_capacity(cleaned.len());
    for c in cleaned.chars() {
        let c = if c == ' ' { '-' } else { c };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Splits a free-text keyword field into a set of normalized tags.
///
/// Separators are `;`, `,`, `/`, and a `-` or `|` standing alone between
/// whitespace. Every token goes through [`normalize_tag`]; empty tokens are
/// dropped.
///
/// # Examples
///
/// ```
/// use pomona_core::normalize::split_keywords;
///
/// let tags = split_keywords("saúde; educação / economia");
/// assert!(tags.contains("saude"));
/// assert!(tags.contains("educacao"));
/// assert!(tags.contains("economia"));
/// ```
pub fn split_keywords(text: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();

    for piece in text.split([';', ',', '/']) {
        let mut words: Vec<&str> = Vec::new();
        for word in piece.split_whitespace() {
            if word == "-" || word == "|" {
                push_keyword(&mut tags, &words);
                words.clear();
            } else {
                words.push(word);
            }
        }
        push_keyword(&mut tags, &words);
    }

    tags
}

fn push_keyword(tags: &mut BTreeSet<String>, words: &[&str]) {
    if words.is_empty() {
        return;
    }
    let tag = normalize_tag(&words.join(" "));
    if !tag.is_empty() {
        tags.insert(tag);
    }
}

/// Trims a URL and collapses duplicate slashes in its path.
///
/// The `scheme://` separator, query string and fragment are left untouched.
/// A trailing path slash is dropped.
///
/// # Examples
///
/// ```
/// use pomona_core::normalize::normalize_url_slashes;
///
/// assert_eq!(
///     normalize_url_slashes(" https://example.org//a///b/?x=1//2 "),
///     "https://example.org/a/b?x=1//2"
/// );
/// ```
pub fn normalize_url_slashes(url: &str) -> String {
    let url = url.trim();
    let (scheme, rest) = match url.find("://") {
        Some(idx) => url.split_at(idx + 3),
        None => ("", url),
    };
    let path_end = rest.find(['?', '#']).unwrap_or(rest.len());
    let (path, tail) = rest.split_at(path_end);

    let mut out = String::with_capacity(url.len());
    out.push_str(scheme);

    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(c);
    }
    while out.len() > scheme.len() && out.ends_with('/') {
        out.pop();
    }

    out.push_str(tail);
    out
}
