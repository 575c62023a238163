//! Package document (OPF): metadata, manifest, spine.

use crate::book::BookMetadata;

use super::BookPackage;
use super::xhtml::escape_text;

/// Media type for a packaged file, by extension.
#[must_use]
pub fn media_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit('.')
        .next()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "xhtml" | "html" | "htm" => "application/xhtml+xml",
        "css" => "text/css",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Stable manifest id for a packaged href.
#[must_use]
pub fn item_id(href: &str) -> String {
    let mut id = String::with_capacity(href.len() + 2);
    id.push_str("id-");
    for c in href.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c);
        } else {
            id.push('-');
        }
    }
    id
}

/// Builds the package document.
///
/// The manifest lists every included file: navigation, cover page, cover
/// image (with the `cover-image` property), chapters, stylesheets and
/// images. The spine lists chapters exactly once, in discovery order,
/// after the cover page.
#[must_use]
pub fn build_package_document(package: &BookPackage, identifier: &str) -> String {
    let metadata = &package.metadata;
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"book-id\">\n",
    );

    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"book-id\">{}</dc:identifier>\n",
        escape_text(identifier)
    ));
    out.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        escape_text(&metadata.title)
    ));
    for author in &metadata.authors {
        out.push_str(&format!(
            "    <dc:creator>{}</dc:creator>\n",
            escape_text(author)
        ));
    }
    out.push_str("    <dc:language>en</dc:language>\n");
    if let Some(publisher) = &metadata.publisher {
        out.push_str(&format!(
            "    <dc:publisher>{}</dc:publisher>\n",
            escape_text(publisher)
        ));
    }
    if let Some(description) = &metadata.description {
        out.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            escape_text(description)
        ));
    }
    for subject in &metadata.subjects {
        out.push_str(&format!(
            "    <dc:subject>{}</dc:subject>\n",
            escape_text(subject)
        ));
    }
    if let Some(rights) = &metadata.rights {
        out.push_str(&format!(
            "    <dc:rights>{}</dc:rights>\n",
            escape_text(rights)
        ));
    }
    if let Some(date) = &metadata.release_date {
        out.push_str(&format!("    <dc:date>{}</dc:date>\n", escape_text(date)));
    }
    if package.cover.is_some() {
        out.push_str("    <meta name=\"cover\" content=\"cover-image\"/>\n");
    }
    out.push_str("  </metadata>\n");

    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
    );
    out.push_str(
        "    <item id=\"cover-page\" href=\"cover.xhtml\" media-type=\"application/xhtml+xml\"/>\n",
    );
    if let Some(cover) = &package.cover {
        let href = format!("Images/{cover}");
        out.push_str(&format!(
            "    <item id=\"cover-image\" href=\"{href}\" media-type=\"{}\" properties=\"cover-image\"/>\n",
            media_type(cover)
        ));
    }
    for chapter in &package.chapters {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            item_id(&chapter.file_name),
            chapter.file_name
        ));
    }
    for style in &package.styles {
        let href = format!("Styles/{style}");
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{href}\" media-type=\"text/css\"/>\n",
            item_id(&href)
        ));
    }
    for image in &package.images {
        if Some(image) == package.cover.as_ref() {
            continue;
        }
        let href = format!("Images/{image}");
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{href}\" media-type=\"{}\"/>\n",
            item_id(&href),
            media_type(image)
        ));
    }
    out.push_str("  </manifest>\n");

    out.push_str("  <spine>\n");
    out.push_str("    <itemref idref=\"cover-page\" linear=\"yes\"/>\n");
    for chapter in &package.chapters {
        out.push_str(&format!(
            "    <itemref idref=\"{}\"/>\n",
            item_id(&chapter.file_name)
        ));
    }
    out.push_str("  </spine>\n");

    // Legacy reading systems consult the guide; readers open at the cover.
    out.push_str("  <guide>\n");
    out.push_str("    <reference type=\"cover\" title=\"Cover\" href=\"cover.xhtml\"/>\n");
    out.push_str(
        "    <reference type=\"toc\" title=\"Table of Contents\" href=\"nav.xhtml\"/>\n",
    );
    out.push_str("  </guide>\n");
    out.push_str("</package>\n");
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::epub::ChapterEntry;

    fn package() -> BookPackage {
        BookPackage {
            metadata: BookMetadata {
                title: "Streams & Pipes".to_string(),
                authors: vec!["A. Author".to_string(), "B. Builder".to_string()],
                publisher: Some("Example Press".to_string()),
                ..BookMetadata::default()
            },
            chapters: vec![
                ChapterEntry {
                    file_name: "ch01.xhtml".to_string(),
                    title: "One".to_string(),
                    fragment: Some("one".to_string()),
                },
                ChapterEntry {
                    file_name: "ch02.xhtml".to_string(),
                    title: "Two".to_string(),
                    fragment: None,
                },
            ],
            images: vec!["fig.png".to_string(), "cover.jpg".to_string()],
            styles: vec!["epub.css".to_string(), "book.css".to_string()],
            cover: Some("cover.jpg".to_string()),
        }
    }

    #[test]
    fn test_media_types() {
        assert_eq!(media_type("ch01.xhtml"), "application/xhtml+xml");
        assert_eq!(media_type("a.css"), "text/css");
        assert_eq!(media_type("b.PNG"), "image/png");
        assert_eq!(media_type("c.jpeg"), "image/jpeg");
        assert_eq!(media_type("d.bin"), "application/octet-stream");
    }

    #[test]
    fn test_item_id_is_xml_safe() {
        assert_eq!(item_id("Images/fig 1.png"), "id-Images-fig-1-png");
    }

    #[test]
    fn test_opf_escapes_metadata() {
        let opf = build_package_document(&package(), "urn:isbn:123");
        assert!(opf.contains("<dc:title>Streams &amp; Pipes</dc:title>"));
    }

    #[test]
    fn test_opf_manifest_lists_every_file() {
        let opf = build_package_document(&package(), "urn:isbn:123");
        for href in [
            "nav.xhtml",
            "cover.xhtml",
            "ch01.xhtml",
            "ch02.xhtml",
            "Styles/epub.css",
            "Styles/book.css",
            "Images/fig.png",
            "Images/cover.jpg",
        ] {
            assert!(
                opf.contains(&format!("href=\"{href}\"")),
                "manifest must list {href}"
            );
        }
    }

    #[test]
    fn test_opf_spine_has_each_chapter_once_in_order() {
        let opf = build_package_document(&package(), "urn:isbn:123");
        let spine_start = opf.find("<spine>").unwrap();
        let spine = &opf[spine_start..];
        let first = spine.find("id-ch01-xhtml").unwrap();
        let second = spine.find("id-ch02-xhtml").unwrap();
        assert!(first < second, "spine must keep discovery order");
        assert_eq!(spine.matches("id-ch01-xhtml").count(), 1);
        assert_eq!(spine.matches("id-ch02-xhtml").count(), 1);
    }

    #[test]
    fn test_opf_guide_points_readers_at_cover() {
        let opf = build_package_document(&package(), "urn:isbn:123");
        let guide_start = opf.find("<guide>").unwrap();
        assert!(guide_start > opf.find("</spine>").unwrap());
        let guide = &opf[guide_start..];
        assert!(guide.contains(r#"<reference type="cover" title="Cover" href="cover.xhtml"/>"#));
        assert!(guide.contains(r#"type="toc""#));
    }

    #[test]
    fn test_opf_cover_image_property() {
        let opf = build_package_document(&package(), "urn:isbn:123");
        assert!(opf.contains("properties=\"cover-image\""));
        assert!(opf.contains("<meta name=\"cover\" content=\"cover-image\"/>"));
        // cover.jpg appears once in the manifest (under the cover-image id).
        assert_eq!(opf.matches("href=\"Images/cover.jpg\"").count(), 1);
    }
}
