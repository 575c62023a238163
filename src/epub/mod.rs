//! E-book packaging: container assembly, profiles, structural checks.
//!
//! The book folder holds one shared `OEBPS/` resource tree (chapters,
//! `Images/`, `Styles/`). Packaging generates the per-profile members
//! (package document, navigation, cover page, profile stylesheet)
//! straight into each ZIP, so the `dual` build produces two `.epub` files
//! over a single tree on disk.

pub mod css;
pub mod nav;
pub mod opf;
pub mod xhtml;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, instrument};
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::book::{FetchedBook, SIDECAR_FILE};
use crate::book::BookMetadata;
use crate::config::EpubProfile;
use crate::naming;

/// Name of the shared resource tree inside a book folder.
pub const OEBPS_DIR: &str = "OEBPS";

/// The profile stylesheet's name inside `Styles/`.
const PROFILE_CSS: &str = "epub.css";

const MIMETYPE: &str = "application/epub+zip";

const CONTAINER_XML: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n\
  <rootfiles>\n\
    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n\
  </rootfiles>\n\
</container>\n";

#[allow(clippy::expect_used)]
static HREF_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:href|src)="([^"]+)""#).expect("HREF_ATTR: hardcoded regex is valid")
});

#[allow(clippy::expect_used)]
static MANIFEST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<item\s[^>]*id="([^"]+)"[^>]*href="([^"]+)""#)
        .expect("MANIFEST_ITEM: hardcoded regex is valid")
});

#[allow(clippy::expect_used)]
static SPINE_IDREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<itemref\s[^>]*idref="([^"]+)""#)
        .expect("SPINE_IDREF: hardcoded regex is valid")
});

#[allow(clippy::expect_used)]
static GUIDE_COVER_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<reference\s[^>]*type="cover"[^>]*href="([^"]+)""#)
        .expect("GUIDE_COVER_REF: hardcoded regex is valid")
});

/// Errors building or checking a package.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("package I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The built file fails the structural invariants.
    #[error("structural check failed for {path}: {detail}")]
    Structure { path: PathBuf, detail: String },
}

impl PackageError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// One spine entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterEntry {
    pub file_name: String,
    pub title: String,
    pub fragment: Option<String>,
}

/// Everything the package document needs to know about a staged book.
#[derive(Debug)]
pub struct BookPackage {
    pub metadata: BookMetadata,
    /// Spine order (the provider's chapter manifest order).
    pub chapters: Vec<ChapterEntry>,
    /// Basenames present under `Images/` on disk.
    pub images: Vec<String>,
    /// Basenames present under `Styles/` on disk.
    pub styles: Vec<String>,
    /// Cover image basename, when one was downloaded.
    pub cover: Option<String>,
}

/// Writes the fetched book's own files into the shared `OEBPS/` tree:
/// chapter XHTML, extracted inline stylesheets, metadata sidecar, cover.
/// Remote assets are downloaded into the same tree separately.
///
/// # Errors
///
/// Returns [`PackageError::Io`] on any write failure.
#[instrument(skip_all, fields(book_dir = %book_dir.display()))]
pub fn stage_book(book_dir: &Path, fetched: &FetchedBook) -> Result<(), PackageError> {
    let oebps = book_dir.join(OEBPS_DIR);
    for subdir in ["Images", "Styles"] {
        let dir = oebps.join(subdir);
        std::fs::create_dir_all(&dir).map_err(|e| PackageError::io(&dir, e))?;
    }

    for chapter in &fetched.chapters {
        let path = oebps.join(&chapter.file_name);
        std::fs::write(&path, &chapter.xhtml).map_err(|e| PackageError::io(&path, e))?;
        for (name, css) in &chapter.inline_styles {
            let path = oebps.join("Styles").join(name);
            std::fs::write(&path, css).map_err(|e| PackageError::io(&path, e))?;
        }
    }

    if let Some(cover) = &fetched.cover {
        let path = oebps.join("Images").join(&cover.file_name);
        std::fs::write(&path, &cover.bytes).map_err(|e| PackageError::io(&path, e))?;
    }

    fetched
        .metadata
        .write_sidecar(book_dir)
        .map_err(|e| PackageError::io(book_dir.join(SIDECAR_FILE), e))?;

    debug!(chapters = fetched.chapters.len(), "staged book tree");
    Ok(())
}

/// Scans the staged tree and assembles the package description. Assets
/// that failed to download are simply absent from disk and therefore
/// absent from the manifest; no broken entries.
///
/// # Errors
///
/// Returns [`PackageError::Io`] when the tree cannot be listed.
pub fn collect_package(
    book_dir: &Path,
    fetched: &FetchedBook,
) -> Result<BookPackage, PackageError> {
    let oebps = book_dir.join(OEBPS_DIR);
    let images = list_dir(&oebps.join("Images"))?;
    let styles = list_dir(&oebps.join("Styles"))?;
    let cover = fetched
        .cover
        .as_ref()
        .map(|c| c.file_name.clone())
        .filter(|name| images.contains(name));

    Ok(BookPackage {
        metadata: fetched.metadata.clone(),
        chapters: fetched
            .chapters
            .iter()
            .map(|c| ChapterEntry {
                file_name: c.file_name.clone(),
                title: c.title.clone(),
                fragment: c.fragment.clone(),
            })
            .collect(),
        images,
        styles,
        cover,
    })
}

fn list_dir(dir: &Path) -> Result<Vec<String>, PackageError> {
    let mut names = Vec::new();
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry.map_err(|e| PackageError::io(dir, e))?;
                if entry.path().is_file() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(PackageError::io(dir, e)),
    }
    names.sort();
    Ok(names)
}

/// Builds one `.epub` for `profile` into the book folder and returns its
/// path. The `mimetype` entry is stored uncompressed as the first member,
/// per the container spec.
///
/// # Errors
///
/// Returns [`PackageError::Io`]/[`PackageError::Zip`] on assembly failure.
#[instrument(skip(package), fields(profile = ?profile))]
pub fn build_epub(
    book_dir: &Path,
    package: &BookPackage,
    profile: EpubProfile,
) -> Result<PathBuf, PackageError> {
    let out_name = naming::epub_file_name(
        &package.metadata.title,
        package.metadata.first_author(),
        profile,
    );
    let out_path = book_dir.join(out_name);
    let oebps = book_dir.join(OEBPS_DIR);

    let file = File::create(&out_path).map_err(|e| PackageError::io(&out_path, e))?;
    let mut writer = ZipWriter::new(file);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    writer.start_file("mimetype", stored)?;
    writer
        .write_all(MIMETYPE.as_bytes())
        .map_err(|e| PackageError::io(&out_path, e))?;

    writer.start_file("META-INF/container.xml", deflated)?;
    writer
        .write_all(CONTAINER_XML.as_bytes())
        .map_err(|e| PackageError::io(&out_path, e))?;

    // The profile stylesheet exists only inside the ZIP; the on-disk tree
    // is shared between profiles.
    let mut manifest_package = BookPackage {
        metadata: package.metadata.clone(),
        chapters: package.chapters.clone(),
        images: package.images.clone(),
        styles: package.styles.clone(),
        cover: package.cover.clone(),
    };
    if !manifest_package.styles.iter().any(|s| s == PROFILE_CSS) {
        manifest_package.styles.insert(0, PROFILE_CSS.to_string());
    }

    let identifier = package
        .metadata
        .isbn
        .as_ref()
        .map_or_else(
            || format!("urn:skillshelf:{}", naming::sanitize_component(&package.metadata.title)),
            |isbn| format!("urn:isbn:{isbn}"),
        );

    writer.start_file("OEBPS/content.opf", deflated)?;
    writer
        .write_all(opf::build_package_document(&manifest_package, &identifier).as_bytes())
        .map_err(|e| PackageError::io(&out_path, e))?;

    writer.start_file("OEBPS/nav.xhtml", deflated)?;
    writer
        .write_all(nav::build_nav_document(&package.metadata.title, &package.chapters).as_bytes())
        .map_err(|e| PackageError::io(&out_path, e))?;

    writer.start_file("OEBPS/cover.xhtml", deflated)?;
    let cover_page = match &package.cover {
        Some(cover) => nav::build_cover_page(cover),
        None => nav::build_text_cover_page(&package.metadata.title),
    };
    writer
        .write_all(cover_page.as_bytes())
        .map_err(|e| PackageError::io(&out_path, e))?;

    writer.start_file(format!("OEBPS/Styles/{PROFILE_CSS}"), deflated)?;
    writer
        .write_all(css::profile_css(profile).as_bytes())
        .map_err(|e| PackageError::io(&out_path, e))?;

    for chapter in &package.chapters {
        copy_into_zip(
            &mut writer,
            &oebps.join(&chapter.file_name),
            &format!("OEBPS/{}", chapter.file_name),
            deflated,
        )?;
    }
    for style in &package.styles {
        if style == PROFILE_CSS {
            continue;
        }
        copy_into_zip(
            &mut writer,
            &oebps.join("Styles").join(style),
            &format!("OEBPS/Styles/{style}"),
            deflated,
        )?;
    }
    for image in &package.images {
        copy_into_zip(
            &mut writer,
            &oebps.join("Images").join(image),
            &format!("OEBPS/Images/{image}"),
            deflated,
        )?;
    }

    writer.finish()?;
    info!(path = %out_path.display(), "download: package built");
    Ok(out_path)
}

fn copy_into_zip(
    writer: &mut ZipWriter<File>,
    source: &Path,
    entry_name: &str,
    options: SimpleFileOptions,
) -> Result<(), PackageError> {
    let bytes = std::fs::read(source).map_err(|e| PackageError::io(source, e))?;
    writer.start_file(entry_name, options)?;
    writer
        .write_all(&bytes)
        .map_err(|e| PackageError::io(source, e))?;
    Ok(())
}

/// Post-build structural check.
///
/// Verifies the container invariants: stored `mimetype` first; every
/// manifest href present in the archive; every spine idref resolving to a
/// manifest item; a guide cover reference pointing into the manifest; and
/// every navigation target and every chapter-referenced file (images,
/// stylesheets, cross-chapter links) present in the manifest.
///
/// # Errors
///
/// Returns [`PackageError::Structure`] naming the first violated
/// invariant.
#[instrument]
pub fn structural_check(epub_path: &Path) -> Result<(), PackageError> {
    let file = File::open(epub_path).map_err(|e| PackageError::io(epub_path, e))?;
    let mut archive = ZipArchive::new(file)?;
    let structure = |detail: String| PackageError::Structure {
        path: epub_path.to_path_buf(),
        detail,
    };

    let entry_names: HashSet<String> = archive.file_names().map(ToString::to_string).collect();

    {
        let first = archive.by_index(0)?;
        if first.name() != "mimetype" {
            return Err(structure(format!(
                "first entry is {:?}, expected mimetype",
                first.name()
            )));
        }
        if first.compression() != CompressionMethod::Stored {
            return Err(structure("mimetype entry is compressed".to_string()));
        }
    }

    let opf = read_entry(&mut archive, "OEBPS/content.opf")
        .map_err(|e| structure(format!("cannot read package document: {e}")))?;

    let mut manifest: HashMap<String, String> = HashMap::new();
    for capture in MANIFEST_ITEM.captures_iter(&opf) {
        manifest.insert(capture[1].to_string(), capture[2].to_string());
    }
    if manifest.is_empty() {
        return Err(structure("package manifest is empty".to_string()));
    }
    let manifest_hrefs: HashSet<&str> = manifest.values().map(String::as_str).collect();

    for href in manifest.values() {
        let entry = format!("OEBPS/{href}");
        if !entry_names.contains(&entry) {
            return Err(structure(format!("manifest href {href} missing from archive")));
        }
    }

    let mut spine_count = 0;
    for capture in SPINE_IDREF.captures_iter(&opf) {
        spine_count += 1;
        if !manifest.contains_key(&capture[1]) {
            return Err(structure(format!(
                "spine idref {} has no manifest item",
                &capture[1]
            )));
        }
    }
    if spine_count == 0 {
        return Err(structure("spine is empty".to_string()));
    }

    // The guide must send readers to a cover page that is in the manifest.
    match GUIDE_COVER_REF.captures(&opf) {
        Some(capture) => {
            let href = capture[1].split('#').next().unwrap_or(&capture[1]).to_string();
            if !manifest_hrefs.contains(href.as_str()) {
                return Err(structure(format!(
                    "guide cover reference {href} is not in the manifest"
                )));
            }
        }
        None => return Err(structure("package guide has no cover reference".to_string())),
    }

    // Navigation targets and chapter-internal references must resolve.
    let xhtml_hrefs: Vec<String> = manifest
        .values()
        .filter(|href| href.ends_with(".xhtml"))
        .cloned()
        .collect();
    for href in xhtml_hrefs {
        let body = read_entry(&mut archive, &format!("OEBPS/{href}"))
            .map_err(|e| structure(format!("cannot read {href}: {e}")))?;
        for capture in HREF_ATTR.captures_iter(&body) {
            let target = &capture[1];
            if target.contains("://") || target.starts_with('#') || target.starts_with("mailto:")
            {
                continue;
            }
            let file_part = target.split('#').next().unwrap_or(target);
            if file_part.is_empty() {
                continue;
            }
            if !manifest_hrefs.contains(file_part) {
                return Err(structure(format!(
                    "{href} references {file_part}, which is not in the manifest"
                )));
            }
        }
    }

    Ok(())
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<String, std::io::Error> {
    let mut entry = archive
        .by_name(name)
        .map_err(std::io::Error::other)?;
    let mut body = String::new();
    entry.read_to_string(&mut body)?;
    Ok(body)
}
