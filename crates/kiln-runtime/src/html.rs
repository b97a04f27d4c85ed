//! Regex-based HTML flattening for fetched pages. Good enough for
//! documentation and articles; not a full HTML parser.

use std::sync::LazyLock;

use regex::{Captures, Regex};

macro_rules! static_regex {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).expect("static regex"));
    };
}

static_regex!(INVISIBLE, r"(?is)<(script|style|noscript|head|template)(?:\s[^>]*)?>.*?</(?:script|style|noscript|head|template)>");
static_regex!(COMMENT, r"(?s)<!--.*?-->");
static_regex!(ANY_TAG, r"(?s)<[^>]+>");
static_regex!(WHITESPACE, r"\s+");
static_regex!(PRE, r"(?is)<pre(?:\s[^>]*)?>(.*?)</pre>");
static_regex!(HEADING, r"(?is)<h([1-6])(?:\s[^>]*)?>(.*?)</h[1-6]>");
static_regex!(LINK, r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#);
static_regex!(STRONG, r"(?is)<(?:strong|b)(?:\s[^>]*)?>(.*?)</(?:strong|b)>");
static_regex!(EMPHASIS, r"(?is)<(?:em|i)(?:\s[^>]*)?>(.*?)</(?:em|i)>");
static_regex!(CODE, r"(?is)<code(?:\s[^>]*)?>(.*?)</code>");
static_regex!(LIST_ITEM, r"(?i)<li(?:\s[^>]*)?>");
static_regex!(LINE_BREAK, r"(?i)<br\s*/?>");
static_regex!(BLOCK, r"(?i)</?(?:p|div|section|article|ul|ol|table|tr|blockquote)(?:\s[^>]*)?>");
static_regex!(SPACES, r"[ \t]+");
static_regex!(SPACE_AROUND_NEWLINE, r" *\n *");
static_regex!(BLANK_LINES, r"\n{3,}");

/// Placeholder bracket for preformatted blocks while the rest is
/// rewritten.
const PRE_MARK: char = '\u{0}';

pub fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn strip_tags(html: &str) -> String {
    ANY_TAG.replace_all(html, "").into_owned()
}

/// Visible text with every run of whitespace collapsed to one space.
pub fn html_to_text(html: &str) -> String {
    let html = COMMENT.replace_all(html, "");
    let html = INVISIBLE.replace_all(&html, "");
    let text = decode_entities(&ANY_TAG.replace_all(&html, " "));
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Markdown rendering of headings, paragraphs, links, lists, code and
/// emphasis. Other markup is dropped.
pub fn html_to_markdown(html: &str) -> String {
    let html = COMMENT.replace_all(html, "");
    let html = INVISIBLE.replace_all(&html, "");

    let mut blocks: Vec<String> = Vec::new();
    let html = PRE.replace_all(&html, |c: &Captures| {
        let body = decode_entities(&strip_tags(&c[1]));
        blocks.push(format!("```\n{}\n```", body.trim_matches('\n')));
        format!("\n\n{PRE_MARK}{}{PRE_MARK}\n\n", blocks.len() - 1)
    });

    let md = HEADING.replace_all(&html, |c: &Captures| {
        let level: usize = c[1].parse().unwrap_or(1);
        format!("\n\n{} {}\n\n", "#".repeat(level), strip_tags(&c[2]).trim())
    });
    let md = STRONG.replace_all(&md, "**$1**");
    let md = EMPHASIS.replace_all(&md, "*$1*");
    let md = CODE.replace_all(&md, "`$1`");
    let md = LINK.replace_all(&md, |c: &Captures| {
        format!("[{}]({})", strip_tags(&c[2]).trim(), &c[1])
    });
    let md = LIST_ITEM.replace_all(&md, "\n- ");
    let md = LINE_BREAK.replace_all(&md, "\n");
    let md = BLOCK.replace_all(&md, "\n\n");
    let md = decode_entities(&strip_tags(&md));

    let md = SPACES.replace_all(&md, " ");
    let md = SPACE_AROUND_NEWLINE.replace_all(&md, "\n");
    let md = BLANK_LINES.replace_all(&md, "\n\n");
    let mut out = md.trim().to_string();

    for (i, block) in blocks.iter().enumerate() {
        out = out.replace(&format!("{PRE_MARK}{i}{PRE_MARK}"), block);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn text_drops_scripts_and_collapses_space() {
        let html = "<html><head><title>t</title></head><body>\n<script>var x = 1;</script>\
                    <h1>Hello</h1>\n\n<p>a &amp; b</p><style>p{}</style></body></html>";
        assert_eq!(html_to_text(html), "Hello a & b");
    }

    #[test]
    fn markdown_structure() {
        let html = "<h2>Install</h2><p>Run <code>cargo build</code> or read \
                    <a href=\"https://docs.rs\">the <b>docs</b></a>.</p>\
                    <ul><li>fast</li><li><em>safe</em></li></ul>\
                    <pre>fn main() {\n    x &lt; y;\n}</pre>";
        assert_eq!(
            html_to_markdown(html),
            "## Install\n\nRun `cargo build` or read [the **docs**](https://docs.rs).\n\n- fast\n- *safe*\n\n```\nfn main() {\n    x < y;\n}\n```"
        );
    }
}
