//! Extension-based loader table.
//!
//! Turns raw ingested bytes into the plain text the chunker consumes.
//! Dispatch is purely on the resource's file suffix; unrecognized
//! suffixes fall through to the lossy-UTF-8 default.

use anyhow::{Context, Result};

/// Extracts chunkable plain text from `bytes` whose on-disk suffix is
/// `suffix` (e.g. `".html"`, `".pdf"`).
pub fn load_text(suffix: &str, bytes: &[u8]) -> Result<String> {
    match suffix.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "html" | "htm" => Ok(strip_html(&String::from_utf8_lossy(bytes))),
        "pdf" => pdf_extract::extract_text_from_mem(bytes).context("extracting pdf text"),
        "md" | "markdown" | "rst" | "txt" | "text" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "h" | "cpp" | "hpp" | "sh" | "yaml" | "yml" | "toml"
        | "json" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Strips tags from an HTML document, collapsing `<script>`/`<style>`
/// bodies entirely and keeping everything else as plain text.
fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut skip_until: Option<&str> = None;
    let lower = html.to_ascii_lowercase();
    let bytes = html.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if skip_until.is_none() && bytes[i] == b'<' {
            if lower[i..].starts_with("<script") {
                skip_until = Some("</script>");
            } else if lower[i..].starts_with("<style") {
                skip_until = Some("</style>");
            }
            in_tag = true;
        }
        if let Some(end_tag) = skip_until {
            if lower[i..].starts_with(end_tag) {
                skip_until = None;
                i += end_tag.len();
                in_tag = false;
                continue;
            }
            i += 1;
            continue;
        }
        if in_tag {
            if bytes[i] == b'>' {
                in_tag = false;
                out.push(' ');
            }
            i += 1;
            continue;
        }
        if bytes[i] == b'<' {
            in_tag = true;
            i += 1;
            continue;
        }
        // Safe: we only advance one byte past non-'<' ASCII control bytes
        // above; multi-byte UTF-8 sequences are copied whole below.
        let ch_len = utf8_char_len(bytes[i]);
        out.push_str(&html[i..i + ch_len]);
        i += ch_len;
    }
    collapse_whitespace(&out)
}

fn utf8_char_len(byte: u8) -> usize {
    if byte & 0x80 == 0 {
        1
    } else if byte & 0xE0 == 0xC0 {
        2
    } else if byte & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_tags_are_stripped() {
        let html = "<html><body><h1>Title</h1><p>Hello <b>world</b>.</p></body></html>";
        let text = load_text(".html", html.as_bytes()).unwrap();
        assert_eq!(text, "Title Hello world .");
    }

    #[test]
    fn script_and_style_bodies_are_dropped() {
        let html = "<p>keep</p><script>var x = 1 < 2;</script><style>.a{color:red}</style><p>also keep</p>";
        let text = load_text(".html", html.as_bytes()).unwrap();
        assert_eq!(text, "keep also keep");
    }

    #[test]
    fn markdown_passes_through_unchanged() {
        let md = "# Title\n\nSome **bold** text.";
        let text = load_text(".md", md.as_bytes()).unwrap();
        assert_eq!(text, md);
    }

    #[test]
    fn unknown_suffix_falls_back_to_lossy_text() {
        let text = load_text(".weird", b"plain bytes").unwrap();
        assert_eq!(text, "plain bytes");
    }

    #[test]
    fn html_with_multibyte_utf8_does_not_panic() {
        let html = "<p>caf\u{e9} \u{2603}</p>";
        let text = load_text(".html", html.as_bytes()).unwrap();
        assert_eq!(text, "caf\u{e9} \u{2603}");
    }
}
