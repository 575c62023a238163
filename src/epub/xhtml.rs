//! Strict-XHTML emission helpers.
//!
//! Chapter HTML arrives lenient and leaves strict: tag closing, attribute
//! quoting and entity escaping are normalized here, at the package
//! boundary, never during fetch.

/// Elements serialized self-closed (`<img … />`).
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// True when `tag` must be emitted as a self-closing element.
#[must_use]
pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Escapes character data.
#[must_use]
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes an attribute value for double-quoted emission.
#[must_use]
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wraps a body in the XHTML document shell used for every packaged page.
///
/// `head_links` are hrefs relative to the `OEBPS/` root (stylesheets).
#[must_use]
pub fn document_shell(title: &str, head_links: &[String], body: &str) -> String {
    let mut head = String::new();
    for href in head_links {
        head.push_str(&format!(
            "    <link rel=\"stylesheet\" type=\"text/css\" href=\"{}\"/>\n",
            escape_attr(href)
        ));
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head>\n\
         \x20   <title>{title}</title>\n\
         \x20   <meta charset=\"utf-8\"/>\n\
         {head}</head>\n\
         <body>\n{body}\n</body>\n\
         </html>\n",
        title = escape_text(title),
        head = head,
        body = body,
    )
}
