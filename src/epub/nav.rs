//! Navigation document and cover page.

use super::ChapterEntry;
use super::xhtml::{escape_attr, escape_text};

/// Builds the EPUB 3 navigation document.
///
/// Each chapter is listed by title, linking to `file#fragment`; chapters
/// without a captured fragment link to the file alone. A hidden landmarks
/// nav points reading systems at the cover and the start of content.
#[must_use]
pub fn build_nav_document(title: &str, chapters: &[ChapterEntry]) -> String {
    let mut items = String::new();
    for chapter in chapters {
        let href = match &chapter.fragment {
            Some(fragment) if !fragment.is_empty() => {
                format!("{}#{}", chapter.file_name, fragment)
            }
            _ => chapter.file_name.clone(),
        };
        items.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            escape_attr(&href),
            escape_text(&chapter.title)
        ));
    }

    let mut landmarks = String::new();
    landmarks.push_str(
        "      <li><a epub:type=\"cover\" href=\"cover.xhtml\">Cover</a></li>\n",
    );
    landmarks.push_str("      <li><a epub:type=\"toc\" href=\"#toc\">Table of Contents</a></li>\n");
    if let Some(first) = chapters.first() {
        landmarks.push_str(&format!(
            "      <li><a epub:type=\"bodymatter\" href=\"{}\">Start of Content</a></li>\n",
            escape_attr(&first.file_name)
        ));
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head>\n\
         \x20   <title>{title}</title>\n\
         \x20   <meta charset=\"utf-8\"/>\n\
         </head>\n\
         <body>\n\
         \x20 <nav epub:type=\"toc\" id=\"toc\">\n\
         \x20   <h1>Table of Contents</h1>\n\
         \x20   <ol>\n{items}\x20   </ol>\n\
         \x20 </nav>\n\
         \x20 <nav epub:type=\"landmarks\" id=\"landmarks\" hidden=\"\">\n\
         \x20   <ol>\n{landmarks}\x20   </ol>\n\
         \x20 </nav>\n\
         </body>\n\
         </html>\n",
        title = escape_text(title),
        items = items,
        landmarks = landmarks,
    )
}

/// Builds the cover page. The image is constrained to 90% of the viewport
/// height so readers show it on one screen.
#[must_use]
pub fn build_cover_page(cover_image: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\">\n\
         <head>\n\
         \x20   <title>Cover</title>\n\
         \x20   <meta charset=\"utf-8\"/>\n\
         </head>\n\
         <body style=\"margin: 0; text-align: center;\">\n\
         \x20 <img src=\"Images/{}\" alt=\"Cover\" style=\"max-height: 90vh; max-width: 100%;\"/>\n\
         </body>\n\
         </html>\n",
        escape_attr(cover_image)
    )
}

/// Placeholder cover page when the provider had no cover image.
#[must_use]
pub fn build_text_cover_page(title: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\">\n\
         <head>\n\
         \x20   <title>Cover</title>\n\
         \x20   <meta charset=\"utf-8\"/>\n\
         </head>\n\
         <body style=\"text-align: center;\">\n\
         \x20 <h1 style=\"margin-top: 40vh;\">{}</h1>\n\
         </body>\n\
         </html>\n",
        escape_text(title)
    )
}
