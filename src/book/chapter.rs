//! Chapter parsing, reference extraction, and XHTML rewriting.
//!
//! Chapter bodies arrive as whatever HTML the provider serves. They are
//! parsed leniently, mined for the navigation fragment and every asset
//! reference (stylesheet links, inline styles, `<img>` sources, CSS
//! `url()` images), and re-emitted as strict XHTML with every
//! intra-package reference rewritten to `Images/` and `Styles/` paths.

use std::collections::HashMap;
use std::sync::LazyLock;

use ego_tree::NodeRef;
use regex::Regex;
use scraper::node::Node;
use scraper::{Html, Selector};
use serde::Deserialize;
use url::Url;

use super::assets::{AssetKind, AssetRequest};
use crate::epub::xhtml;
use crate::naming;

#[allow(clippy::expect_used)]
static HEADING: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, h6").expect("HEADING: hardcoded selector is valid")
});

#[allow(clippy::expect_used)]
static STYLESHEET_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"link[rel="stylesheet"][href]"#)
        .expect("STYLESHEET_LINK: hardcoded selector is valid")
});

#[allow(clippy::expect_used)]
static INLINE_STYLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("style").expect("INLINE_STYLE: hardcoded selector is valid"));

#[allow(clippy::expect_used)]
static IMG: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src]").expect("IMG: hardcoded selector is valid"));

#[allow(clippy::expect_used)]
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("BODY: hardcoded selector is valid"));

/// CSS `url(...)` references (images pulled in by stylesheets).
#[allow(clippy::expect_used)]
static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#)
        .expect("CSS_URL: hardcoded regex is valid")
});

/// An asset reference as either a bare string or a `{"url": ...}` object;
/// the chapter manifest has shipped both shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AssetRef {
    Tagged { url: String },
    Plain(String),
}

impl AssetRef {
    /// The referenced URL or path.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Tagged { url } => url,
            Self::Plain(url) => url,
        }
    }
}

/// One chapter descriptor from the provider's chapter manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ChapterDescriptor {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub title: String,
    /// URL of the chapter's HTML body.
    #[serde(default, alias = "content")]
    pub content_url: String,
    /// Base URL that relative asset references resolve against.
    #[serde(default)]
    pub asset_base_url: String,
    /// Asset hints listed by the API (unioned with what the HTML yields).
    #[serde(default)]
    pub images: Vec<AssetRef>,
    #[serde(default)]
    pub stylesheets: Vec<AssetRef>,
}

/// One page of the chapter manifest (paginated like the v2 search).
#[derive(Debug, Clone, Deserialize)]
pub struct ChapterManifestPage {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub results: Vec<ChapterDescriptor>,
}

/// A fully processed chapter, ready to stage into `OEBPS/`.
#[derive(Debug, Clone)]
pub struct ChapterDocument {
    /// Basename of the staged file (`<stem>.xhtml`).
    pub file_name: String,
    pub title: String,
    /// Navigation anchor inside the file (`None` when the chapter has no
    /// heading; such entries link to the file without a fragment).
    pub fragment: Option<String>,
    /// Remote assets this chapter needs (images and stylesheets).
    pub assets: Vec<AssetRequest>,
    /// Extracted inline `<style>` blocks: (local css name, css text).
    pub inline_styles: Vec<(String, String)>,
    /// The strict-XHTML serialization of the chapter.
    pub xhtml: String,
}

/// Parses a chapter body and computes its rewritten XHTML form.
#[must_use]
pub fn parse_chapter(descriptor: &ChapterDescriptor, body: &str) -> ChapterDocument {
    let stem = file_stem(&descriptor.filename);
    let file_name = format!("{stem}.xhtml");
    let html = Html::parse_document(body);

    // Navigation fragment: the first heading's id, minted when absent.
    let heading = html.select(&HEADING).next();
    let (heading_node, fragment, inject) = match heading {
        Some(el) => {
            let existing = el
                .value()
                .attr("id")
                .filter(|id| !id.is_empty())
                .map(ToString::to_string);
            match existing {
                Some(id) => (Some(el.id()), Some(id), false),
                None => (Some(el.id()), Some(format!("{stem}_head")), true),
            }
        }
        None => (None, None, false),
    };
    let title = if descriptor.title.is_empty() {
        heading
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| stem.clone())
    } else {
        descriptor.title.clone()
    };

    let mut assets: Vec<AssetRequest> = Vec::new();
    let push_asset = |assets: &mut Vec<AssetRequest>, request: AssetRequest| {
        if !assets
            .iter()
            .any(|existing| existing.local_name == request.local_name && existing.kind == request.kind)
        {
            assets.push(request);
        }
    };

    // Stylesheets: <link rel=stylesheet> plus the manifest's hints.
    for link in html.select(&STYLESHEET_LINK) {
        if let Some(href) = link.value().attr("href")
            && let Some(request) = stylesheet_request(descriptor, href)
        {
            push_asset(&mut assets, request);
        }
    }
    for hint in &descriptor.stylesheets {
        if let Some(request) = stylesheet_request(descriptor, hint.url()) {
            push_asset(&mut assets, request);
        }
    }

    // Inline <style> blocks become package stylesheets of their own.
    let mut inline_styles = Vec::new();
    for (index, style) in html.select(&INLINE_STYLE).enumerate() {
        let css: String = style.text().collect();
        if css.trim().is_empty() {
            continue;
        }
        for capture in CSS_URL.captures_iter(&css) {
            if let Some(request) = image_request(descriptor, &capture[1]) {
                push_asset(&mut assets, request);
            }
        }
        inline_styles.push((format!("{stem}_inline{}.css", index + 1), css));
    }

    // Images: <img src> plus the manifest's hints, rewritten to Images/.
    let mut image_rewrites: HashMap<String, String> = HashMap::new();
    for img in html.select(&IMG) {
        if let Some(src) = img.value().attr("src")
            && let Some(request) = image_request(descriptor, src)
        {
            image_rewrites.insert(src.to_string(), request.relative_path());
            push_asset(&mut assets, request);
        }
    }
    for hint in &descriptor.images {
        if let Some(request) = image_request(descriptor, hint.url()) {
            push_asset(&mut assets, request);
        }
    }

    // Head links: the profile stylesheet first, then the chapter's own.
    let mut head_links = vec!["Styles/epub.css".to_string()];
    for request in assets
        .iter()
        .filter(|a| a.kind == AssetKind::Stylesheet)
    {
        head_links.push(request.relative_path());
    }
    for (name, _) in &inline_styles {
        head_links.push(format!("Styles/{name}"));
    }

    let context = RewriteContext {
        image_rewrites: &image_rewrites,
        heading_node: if inject { heading_node } else { None },
        fragment: fragment.as_deref(),
    };
    let body_xhtml = serialize_body(&html, &context);
    let xhtml = xhtml::document_shell(&title, &head_links, &body_xhtml);

    ChapterDocument {
        file_name,
        title,
        fragment,
        assets,
        inline_styles,
        xhtml,
    }
}

/// Rewrites an anchor href: links to chapter files keep their basename
/// (with `.html`/`.htm` replaced by `.xhtml`) and retain any fragment;
/// everything else passes through untouched.
#[must_use]
pub fn rewrite_href(href: &str) -> String {
    if href.starts_with('#') || href.starts_with("mailto:") {
        return href.to_string();
    }
    let (path_part, fragment) = match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    };
    let basename = path_part
        .rsplit('/')
        .next()
        .unwrap_or(path_part)
        .split('?')
        .next()
        .unwrap_or("");
    let lower = basename.to_lowercase();
    let is_chapter =
        lower.ends_with(".html") || lower.ends_with(".htm") || lower.ends_with(".xhtml");
    if !is_chapter || basename.is_empty() {
        return href.to_string();
    }
    let stem = basename
        .rfind('.')
        .map_or(basename, |dot| &basename[..dot]);
    let mut rewritten = format!("{}.xhtml", naming::sanitize_component(stem));
    if let Some(fragment) = fragment
        && !fragment.is_empty()
    {
        rewritten.push('#');
        rewritten.push_str(fragment);
    }
    rewritten
}

fn stylesheet_request(descriptor: &ChapterDescriptor, raw: &str) -> Option<AssetRequest> {
    let url = resolve_url(descriptor, raw)?;
    let stem = asset_basename(raw);
    let stem = stem.rfind('.').map_or(stem.as_str(), |dot| &stem[..dot]);
    let local = naming::sanitize_component(stem);
    let local = if local.is_empty() { "styles".to_string() } else { local };
    Some(AssetRequest {
        url,
        local_name: format!("{local}.css"),
        kind: AssetKind::Stylesheet,
    })
}

fn image_request(descriptor: &ChapterDescriptor, raw: &str) -> Option<AssetRequest> {
    if raw.starts_with("data:") {
        return None;
    }
    let url = resolve_url(descriptor, raw)?;
    let local = naming::sanitize_component(&asset_basename(raw));
    if local.is_empty() {
        return None;
    }
    Some(AssetRequest {
        url,
        local_name: local,
        kind: AssetKind::Image,
    })
}

/// Resolves an asset reference against the chapter's asset base (falling
/// back to the content URL for relative refs).
fn resolve_url(descriptor: &ChapterDescriptor, raw: &str) -> Option<String> {
    if raw.is_empty() || raw.starts_with("data:") || raw.starts_with("about:") {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    for base in [&descriptor.asset_base_url, &descriptor.content_url] {
        if base.is_empty() {
            continue;
        }
        if let Ok(base) = Url::parse(base)
            && let Ok(resolved) = base.join(raw)
        {
            return Some(resolved.to_string());
        }
    }
    None
}

/// Decoded basename of a URL or path, query and fragment stripped.
fn asset_basename(reference: &str) -> String {
    let no_fragment = reference.split('#').next().unwrap_or(reference);
    let no_query = no_fragment.split('?').next().unwrap_or(no_fragment);
    let base = no_query.rsplit('/').next().unwrap_or(no_query);
    urlencoding::decode(base)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| base.to_string())
}

fn file_stem(filename: &str) -> String {
    let base = asset_basename(filename);
    let stem = base.rfind('.').map_or(base.as_str(), |dot| &base[..dot]);
    let stem = naming::sanitize_component(stem).replace(' ', "_");
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "chapter".to_string()
    } else {
        stem.to_string()
    }
}

struct RewriteContext<'a> {
    image_rewrites: &'a HashMap<String, String>,
    /// Heading node that needs the minted fragment id injected.
    heading_node: Option<ego_tree::NodeId>,
    fragment: Option<&'a str>,
}

fn serialize_body(html: &Html, context: &RewriteContext<'_>) -> String {
    let mut out = String::new();
    if let Some(body) = html.select(&BODY).next() {
        for child in body.children() {
            serialize_node(child, context, &mut out);
        }
    } else {
        for child in html.tree.root().children() {
            serialize_node(child, context, &mut out);
        }
    }
    out
}

fn serialize_node(node: NodeRef<'_, Node>, context: &RewriteContext<'_>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(&xhtml::escape_text(&text.text)),
        Node::Element(element) => {
            let tag = element.name();
            // Styles are extracted to files, scripts have no place in the
            // package, and stray in-body links would dangle.
            if matches!(tag, "script" | "style" | "link") {
                return;
            }

            out.push('<');
            out.push_str(tag);
            for (name, value) in element.attrs() {
                // Event handlers and responsive source sets reference
                // things the package does not carry.
                if name.starts_with("on") || name == "srcset" {
                    continue;
                }
                let rewritten = match (tag, name) {
                    ("img", "src") => context
                        .image_rewrites
                        .get(value)
                        .cloned()
                        .unwrap_or_else(|| value.to_string()),
                    ("a", "href") => rewrite_href(value),
                    _ => value.to_string(),
                };
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&xhtml::escape_attr(&rewritten));
                out.push('"');
            }
            if context.heading_node == Some(node.id())
                && element.attr("id").is_none_or(str::is_empty)
                && let Some(fragment) = context.fragment
            {
                out.push_str(" id=\"");
                out.push_str(&xhtml::escape_attr(fragment));
                out.push('"');
            }

            if xhtml::is_void_element(tag) {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in node.children() {
                serialize_node(child, context, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        // Comments, doctypes and processing instructions are dropped.
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn descriptor() -> ChapterDescriptor {
        ChapterDescriptor {
            filename: "ch03.html".to_string(),
            title: String::new(),
            content_url: "https://example.com/api/v1/book/b1/chapter-content/ch03.html"
                .to_string(),
            asset_base_url: "https://example.com/library/view/b1/".to_string(),
            images: vec![],
            stylesheets: vec![],
        }
    }

    #[test]
    fn test_parse_extracts_fragment_from_existing_heading_id() {
        let doc = parse_chapter(
            &descriptor(),
            r#"<html><body><h1 id="intro">Introduction</h1><p>text</p></body></html>"#,
        );
        assert_eq!(doc.fragment.as_deref(), Some("intro"));
        assert_eq!(doc.title, "Introduction");
        // Existing id is kept, not duplicated.
        assert_eq!(doc.xhtml.matches("id=\"intro\"").count(), 1);
    }

    #[test]
    fn test_parse_mints_fragment_when_heading_has_no_id() {
        let doc = parse_chapter(
            &descriptor(),
            "<html><body><h2>Getting Started</h2></body></html>",
        );
        assert_eq!(doc.fragment.as_deref(), Some("ch03_head"));
        assert!(doc.xhtml.contains("<h2 id=\"ch03_head\">Getting Started</h2>"));
    }

    #[test]
    fn test_parse_no_heading_means_no_fragment() {
        let doc = parse_chapter(&descriptor(), "<html><body><p>just text</p></body></html>");
        assert!(doc.fragment.is_none());
    }

    #[test]
    fn test_img_src_rewritten_to_images_dir() {
        let doc = parse_chapter(
            &descriptor(),
            r#"<body><img src="graphics/figure%201.png" alt="fig"/></body>"#,
        );
        assert!(doc.xhtml.contains(r#"src="Images/figure 1.png""#));
        assert!(doc.xhtml.contains(r#"alt="fig""#));
        assert_eq!(doc.assets.len(), 1);
        assert_eq!(doc.assets[0].kind, AssetKind::Image);
        assert_eq!(doc.assets[0].local_name, "figure 1.png");
        assert_eq!(
            doc.assets[0].url,
            "https://example.com/library/view/b1/graphics/figure%201.png"
        );
    }

    #[test]
    fn test_stylesheet_link_extracted_and_removed_from_body() {
        let doc = parse_chapter(
            &descriptor(),
            r#"<head><link rel="stylesheet" href="css/book.css"/></head><body><p>x</p></body>"#,
        );
        let css: Vec<_> = doc
            .assets
            .iter()
            .filter(|a| a.kind == AssetKind::Stylesheet)
            .collect();
        assert_eq!(css.len(), 1);
        assert_eq!(css[0].local_name, "book.css");
        assert!(doc.xhtml.contains(r#"href="Styles/book.css""#));
    }

    #[test]
    fn test_inline_style_extracted_with_css_image() {
        let doc = parse_chapter(
            &descriptor(),
            r#"<body><style>h1 { background: url('img/banner.jpg'); }</style><p>x</p></body>"#,
        );
        assert_eq!(doc.inline_styles.len(), 1);
        assert_eq!(doc.inline_styles[0].0, "ch03_inline1.css");
        assert!(doc.inline_styles[0].1.contains("banner.jpg"));
        // The CSS-referenced image joins the asset set.
        assert!(doc
            .assets
            .iter()
            .any(|a| a.kind == AssetKind::Image && a.local_name == "banner.jpg"));
        // The raw <style> tag is gone from the body.
        assert!(!doc.xhtml.contains("<style>"));
        assert!(doc.xhtml.contains(r#"href="Styles/ch03_inline1.css""#));
    }

    #[test]
    fn test_manifest_asset_hints_are_unioned() {
        let mut descriptor = descriptor();
        descriptor.images = vec![AssetRef::Plain("graphics/hinted.png".to_string())];
        descriptor.stylesheets = vec![AssetRef::Tagged {
            url: "https://example.com/static/site.css".to_string(),
        }];

        let doc = parse_chapter(&descriptor, "<body><p>x</p></body>");
        assert!(doc.assets.iter().any(|a| a.local_name == "hinted.png"));
        assert!(doc.assets.iter().any(|a| a.local_name == "site.css"));
    }

    #[test]
    fn test_duplicate_assets_deduplicated_by_local_name() {
        let doc = parse_chapter(
            &descriptor(),
            r#"<body><img src="a.png"/><img src="a.png"/></body>"#,
        );
        assert_eq!(
            doc.assets
                .iter()
                .filter(|a| a.local_name == "a.png")
                .count(),
            1
        );
    }

    #[test]
    fn test_data_uri_images_ignored() {
        let doc = parse_chapter(
            &descriptor(),
            r#"<body><img src="data:image/png;base64,AAAA"/></body>"#,
        );
        assert!(doc.assets.is_empty());
    }

    #[test]
    fn test_scripts_and_event_handlers_dropped() {
        let doc = parse_chapter(
            &descriptor(),
            r#"<body><script>alert(1)</script><p onclick="x()">text</p></body>"#,
        );
        assert!(!doc.xhtml.contains("script"));
        assert!(!doc.xhtml.contains("onclick"));
        assert!(doc.xhtml.contains("<p>text</p>"));
    }

    #[test]
    fn test_unclosed_html_normalized_to_closed_xhtml() {
        let doc = parse_chapter(
            &descriptor(),
            "<body><p>first<p>second<br><img src=a.png alt=x></body>",
        );
        assert!(doc.xhtml.contains("<p>first</p>"));
        assert!(doc.xhtml.contains("<p>second<br/>"));
        assert!(doc.xhtml.contains(r#"src="Images/a.png""#));
        assert!(doc.xhtml.contains("/>"), "void elements must self-close");
    }

    #[test]
    fn test_profile_stylesheet_linked_first() {
        let doc = parse_chapter(&descriptor(), "<body><p>x</p></body>");
        let profile = doc.xhtml.find("Styles/epub.css").unwrap();
        assert!(doc.xhtml[..profile].contains("<head>"));
    }

    // ==================== href rewriting ====================

    #[test]
    fn test_rewrite_href_cross_chapter_keeps_basename_and_fragment() {
        assert_eq!(
            rewrite_href("https://example.com/library/view/b1/ch05.html#section-2"),
            "ch05.xhtml#section-2"
        );
        assert_eq!(rewrite_href("ch05.html"), "ch05.xhtml");
        assert_eq!(rewrite_href("../text/ch05.htm#x"), "ch05.xhtml#x");
    }

    #[test]
    fn test_rewrite_href_leaves_external_links() {
        assert_eq!(
            rewrite_href("https://example.org/docs/page"),
            "https://example.org/docs/page"
        );
        assert_eq!(rewrite_href("mailto:author@example.com"), "mailto:author@example.com");
    }

    #[test]
    fn test_rewrite_href_fragment_only_untouched() {
        assert_eq!(rewrite_href("#note-3"), "#note-3");
    }

    #[test]
    fn test_cross_chapter_link_rewritten_in_serialized_body() {
        let doc = parse_chapter(
            &descriptor(),
            r#"<body><a href="ch04.html#recap">see chapter 4</a></body>"#,
        );
        assert!(doc.xhtml.contains(r#"<a href="ch04.xhtml#recap">"#));
    }

    // ==================== descriptor shapes ====================

    #[test]
    fn test_chapter_manifest_page_parses_both_asset_shapes() {
        let page: ChapterManifestPage = serde_json::from_value(serde_json::json!({
            "count": 2,
            "next": null,
            "results": [{
                "filename": "ch01.html",
                "title": "One",
                "content": "https://example.com/c/ch01.html",
                "asset_base_url": "https://example.com/a/",
                "images": ["i/one.png"],
                "stylesheets": [{"url": "https://example.com/s/main.css"}]
            }]
        }))
        .unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].images[0].url(), "i/one.png");
        assert_eq!(
            page.results[0].stylesheets[0].url(),
            "https://example.com/s/main.css"
        );
    }

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(file_stem("OEBPS/ch01.html"), "ch01");
        assert_eq!(file_stem("weird name?.html"), "weird_name");
        assert_eq!(file_stem(""), "chapter");
    }
}
