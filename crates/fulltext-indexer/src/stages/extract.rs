//! Plain-text extraction for content blobs and collaborative markup.

use serde_json::Value;

/// Convert a blob to plain text by MIME type.
///
/// Returns `None` for unsupported types.
pub fn blob_to_text(mime: &str, data: &str) -> Option<String> {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let text = match essence.as_str() {
        "text/plain" | "" => data.to_string(),
        "text/markdown" | "text/x-markdown" => markdown_to_text(data),
        "text/html" | "application/xhtml+xml" => html_to_text(data),
        "application/json" => {
            let value: Value = serde_json::from_str(data).ok()?;
            json_strings(&value).join(" ")
        }
        _ => return None,
    };
    Some(normalize_whitespace(&text))
}

/// Collapse runs of blank lines and trailing spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip HTML tags, drop script/style bodies and decode common entities.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = tag_end(after) else {
            // Unterminated tag: keep the remainder verbatim
            out.push_str(after);
            rest = "";
            break;
        };

        let tag = after[1..end].trim().to_ascii_lowercase();
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        rest = &after[end + 1..];

        if !tag.starts_with('/') && (name == "script" || name == "style") {
            let closing = format!("</{}", name);
            match rest.to_ascii_lowercase().find(&closing) {
                Some(pos) => {
                    rest = &rest[pos..];
                    if let Some(close_end) = tag_end(rest) {
                        rest = &rest[close_end + 1..];
                    }
                }
                None => rest = "",
            }
            continue;
        }

        if matches!(
            name.as_str(),
            "p" | "br" | "div" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
        ) {
            out.push('\n');
        }
    }
    out.push_str(rest);

    decode_entities(&out)
}

/// Offset of the `>` closing the tag that `tag` starts with. A `>` inside a
/// quoted attribute value does not close it.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut after_equals = false;
    for (i, c) in tag.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') if after_equals => quote = Some(c),
            (None, '>') => return Some(i),
            _ => {}
        }
        if !c.is_whitespace() {
            after_equals = quote.is_none() && c == '=';
        }
    }
    // Unbalanced quote: fall back to the first `>`
    quote.and_then(|_| tag.find('>'))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Strip the common markdown syntax, keeping the words.
pub fn markdown_to_text(markdown: &str) -> String {
    let mut lines = Vec::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            lines.push(line.to_string());
            continue;
        }

        let mut text = trimmed
            .trim_start_matches('#')
            .trim_start_matches('>')
            .trim_start();
        for bullet in ["- ", "* ", "+ "] {
            if let Some(stripped) = text.strip_prefix(bullet) {
                text = stripped;
                break;
            }
        }
        lines.push(strip_inline_markdown(text));
    }
    lines.join("\n")
}

/// Replace `[label](url)` and `![alt](url)` with their text and drop
/// emphasis and code markers.
fn strip_inline_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '!' if text[i + 1..].starts_with('[') => {}
            '[' => {
                if let Some(close) = text[i..].find("](") {
                    let label = &text[i + 1..i + close];
                    let url_start = i + close + 2;
                    if let Some(url_len) = text[url_start..].find(')') {
                        out.push_str(label);
                        let skip_to = url_start + url_len;
                        while chars.peek().is_some_and(|(j, _)| *j <= skip_to) {
                            chars.next();
                        }
                        continue;
                    }
                }
                out.push(c);
            }
            '*' | '_' | '`' | '~' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Every string leaf of a JSON value, depth first.
pub fn json_strings(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_json_strings(value, &mut out);
    out
}

fn collect_json_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_json_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_json_strings(v, out)),
        _ => {}
    }
}

/// Plain text of a ProseMirror-style node tree (`{type, text?, content?[]}`).
///
/// Block nodes are separated by newlines, inline text is concatenated.
pub fn collab_to_text(node: &Value) -> String {
    let mut out = String::new();
    collect_collab_text(node, &mut out);
    normalize_whitespace(&out)
}

fn collect_collab_text(node: &Value, out: &mut String) {
    match node {
        Value::Array(items) => items.iter().for_each(|n| collect_collab_text(n, out)),
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
            let node_type = map.get("type").and_then(Value::as_str).unwrap_or_default();
            if node_type == "hardBreak" {
                out.push('\n');
            }
            if let Some(content) = map.get("content") {
                collect_collab_text(content, out);
            }
            if matches!(
                node_type,
                "paragraph" | "heading" | "listItem" | "codeBlock" | "blockquote" | "tableRow"
            ) {
                out.push('\n');
            }
        }
        _ => {}
    }
}
