//! Atlassian Document Format conversion
//!
//! JIRA API v3 returns descriptions and comments as ADF trees. Before anything
//! crosses to the target they are normalized to markdown; text posted back to
//! JIRA is wrapped in a minimal ADF document.

use serde_json::{json, Value};

/// Render an ADF node (or a plain string body) as markdown
pub fn to_markdown(node: &Value) -> String {
    match node {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(_) => {
            let mut out = String::new();
            render_block(node, &mut out, 0);
            out.trim_end().to_string()
        }
        other => other.to_string(),
    }
}

fn children(node: &Value) -> &[Value] {
    node.get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn node_type(node: &Value) -> &str {
    node.get("type").and_then(Value::as_str).unwrap_or_default()
}

fn render_block(node: &Value, out: &mut String, depth: usize) {
    match node_type(node) {
        "doc" => {
            for child in children(node) {
                render_block(child, out, depth);
            }
        }
        "paragraph" => {
            out.push_str(&render_inline(children(node)));
            out.push_str("\n\n");
        }
        "heading" => {
            let level = node
                .pointer("/attrs/level")
                .and_then(Value::as_u64)
                .unwrap_or(1)
                .clamp(1, 6) as usize;
            out.push_str(&"#".repeat(level));
            out.push(' ');
            out.push_str(&render_inline(children(node)));
            out.push_str("\n\n");
        }
        "bulletList" | "orderedList" => {
            render_list(node, out, depth);
            if depth == 0 {
                out.push('\n');
            }
        }
        "codeBlock" => {
            let language = node
                .pointer("/attrs/language")
                .and_then(Value::as_str)
                .unwrap_or_default();
            out.push_str("```");
            out.push_str(language);
            out.push('\n');
            out.push_str(&plain_text(children(node)));
            out.push_str("\n```\n\n");
        }
        "blockquote" => {
            let mut inner = String::new();
            for child in children(node) {
                render_block(child, &mut inner, depth);
            }
            for line in inner.trim_end().lines() {
                out.push_str("> ");
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        "rule" => out.push_str("---\n\n"),
        // Inline content at block level (or unknown blocks): keep the text
        _ => {
            let text = render_inline(std::slice::from_ref(node));
            if !text.is_empty() {
                out.push_str(&text);
                out.push_str("\n\n");
            }
        }
    }
}

fn render_list(node: &Value, out: &mut String, depth: usize) {
    let ordered = node_type(node) == "orderedList";
    for (i, item) in children(node).iter().enumerate() {
        let indent = "  ".repeat(depth);
        let bullet = if ordered {
            format!("{}. ", i + 1)
        } else {
            "- ".to_string()
        };
        let mut first = true;
        for part in children(item) {
            match node_type(part) {
                "bulletList" | "orderedList" => render_list(part, out, depth + 1),
                _ => {
                    let text = render_inline(children(part));
                    if first {
                        out.push_str(&format!("{}{}{}\n", indent, bullet, text));
                        first = false;
                    } else {
                        out.push_str(&format!("{}  {}\n", indent, text));
                    }
                }
            }
        }
    }
}

fn render_inline(nodes: &[Value]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node_type(node) {
            "text" => {
                let text = node.get("text").and_then(Value::as_str).unwrap_or_default();
                out.push_str(&apply_marks(text, node.get("marks")));
            }
            "hardBreak" => out.push('\n'),
            "mention" => {
                let name = node
                    .pointer("/attrs/text")
                    .and_then(Value::as_str)
                    .unwrap_or("@unknown");
                out.push_str(name);
            }
            "emoji" => {
                let short = node
                    .pointer("/attrs/shortName")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                out.push_str(short);
            }
            "inlineCard" => {
                if let Some(url) = node.pointer("/attrs/url").and_then(Value::as_str) {
                    out.push_str(url);
                }
            }
            _ => out.push_str(&render_inline(children(node))),
        }
    }
    out
}

fn apply_marks(text: &str, marks: Option<&Value>) -> String {
    let Some(marks) = marks.and_then(Value::as_array) else {
        return text.to_string();
    };
    let mut rendered = text.to_string();
    let mut link = None;
    for mark in marks {
        match node_type(mark) {
            "strong" => rendered = format!("**{}**", rendered),
            "em" => rendered = format!("*{}*", rendered),
            "code" => rendered = format!("`{}`", rendered),
            "strike" => rendered = format!("~~{}~~", rendered),
            "link" => link = mark.pointer("/attrs/href").and_then(Value::as_str),
            _ => {}
        }
    }
    match link {
        Some(href) => format!("[{}]({})", rendered, href),
        None => rendered,
    }
}

fn plain_text(nodes: &[Value]) -> String {
    nodes
        .iter()
        .map(|n| match node_type(n) {
            "text" => n
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            "hardBreak" => "\n".to_string(),
            _ => plain_text(children(n)),
        })
        .collect()
}

/// Wrap markdown text in a minimal ADF document
///
/// Blank lines separate paragraphs; single newlines become hard breaks. The
/// markdown itself is kept verbatim so sync trailers survive the round trip.
pub fn from_markdown(markdown: &str) -> Value {
    let paragraphs: Vec<Value> = markdown
        .split("\n\n")
        .map(str::trim_end)
        .filter(|p| !p.trim().is_empty())
        .map(|paragraph| {
            let mut content = Vec::new();
            for (i, line) in paragraph.lines().enumerate() {
                if i > 0 {
                    content.push(json!({ "type": "hardBreak" }));
                }
                if !line.is_empty() {
                    content.push(json!({ "type": "text", "text": line }));
                }
            }
            json!({ "type": "paragraph", "content": content })
        })
        .collect();

    json!({ "type": "doc", "version": 1, "content": paragraphs })
}
