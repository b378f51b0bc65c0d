//! The interface to the hosting wiki.
//!
//! The converter never reads pages itself. Everything it needs from the wiki
//! (page existence, template source, file metadata) comes through
//! [`DataAccess`].

use crate::common::title_key;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Information about a page.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// The page id, or 0 if the page does not exist.
    pub page_id: u64,
    /// The latest revision id, or 0 if the page does not exist.
    pub rev_id: u64,
    /// The page does not exist.
    pub missing: bool,
    /// The page exists, or is a special page which is always known.
    pub known: bool,
    /// The page is a redirect.
    pub redirect: bool,
    /// The page is a disambiguation page.
    pub disambiguation: bool,
}

/// The requested display size of a file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FileDims {
    /// The requested width.
    pub width: Option<u32>,
    /// The requested height.
    pub height: Option<u32>,
}

/// Information about a media file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// The original width.
    pub width: u32,
    /// The original height.
    pub height: u32,
    /// The size in bytes.
    pub size: u64,
    /// The media type, like `BITMAP`.
    pub mediatype: String,
    /// The MIME type.
    pub mime: String,
    /// The URL of the original.
    pub url: String,
    /// The URL of a thumbnail at the requested size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumburl: Option<String>,
    /// The width of the thumbnail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbwidth: Option<u32>,
    /// The height of the thumbnail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbheight: Option<u32>,
    /// The duration of audio or video, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Access to wiki data needed during conversion.
pub trait DataAccess {
    /// Resolves information about a batch of titles. The result is keyed by
    /// the titles as given.
    fn page_info(&self, titles: &[&str]) -> IndexMap<String, PageInfo>;

    /// Fetches the wikitext of a page at a revision, or the latest revision if
    /// `rev_id` is `None`.
    fn fetch_page_content(&self, title: &str, rev_id: Option<u64>) -> Option<String>;

    /// Resolves information about a batch of files and their requested sizes.
    fn file_info(&self, files: &[(&str, FileDims)]) -> IndexMap<String, Option<FileInfo>>;

    /// Applies the pre-save transform to wikitext.
    fn pre_save_transform(&self, wikitext: &str) -> String {
        wikitext.to_string()
    }

    /// Fetches template data for a template, if any.
    fn fetch_template_data(&self, _title: &str) -> Option<serde_json::Value> {
        None
    }
}

/// A page in a [`MockDataAccess`].
#[derive(Clone, Debug, Default)]
pub struct MockPage {
    /// The wikitext of the latest revision.
    pub content: String,
    /// The page is a redirect.
    pub redirect: bool,
    /// The page is a disambiguation page.
    pub disambiguation: bool,
}

/// An in-memory wiki.
#[derive(Clone, Debug, Default)]
pub struct MockDataAccess {
    /// Pages by title key.
    pages: IndexMap<String, MockPage>,
    /// Files by title key.
    files: IndexMap<String, FileInfo>,
}

impl MockDataAccess {
    /// Creates an empty wiki.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a page with the given content.
    #[must_use]
    pub fn with_page(mut self, title: &str, content: &str) -> Self {
        self.add_page(
            title,
            MockPage {
                content: content.to_string(),
                ..Default::default()
            },
        );
        self
    }

    /// Adds a page.
    pub fn add_page(&mut self, title: &str, page: MockPage) {
        self.pages.insert(title_key(title), page);
    }

    /// Adds a file.
    pub fn add_file(&mut self, title: &str, info: FileInfo) {
        self.files.insert(title_key(title), info);
    }
}

impl DataAccess for MockDataAccess {
    fn page_info(&self, titles: &[&str]) -> IndexMap<String, PageInfo> {
        titles
            .iter()
            .map(|title| {
                let info = match self.pages.get_full(&title_key(title)) {
                    Some((index, _, page)) => PageInfo {
                        page_id: index as u64 + 1,
                        rev_id: index as u64 + 1,
                        missing: false,
                        known: true,
                        redirect: page.redirect,
                        disambiguation: page.disambiguation,
                    },
                    None => PageInfo {
                        missing: true,
                        ..Default::default()
                    },
                };
                (title.to_string(), info)
            })
            .collect()
    }

    fn fetch_page_content(&self, title: &str, _rev_id: Option<u64>) -> Option<String> {
        self.pages.get(&title_key(title)).map(|page| page.content.clone())
    }

    fn file_info(&self, files: &[(&str, FileDims)]) -> IndexMap<String, Option<FileInfo>> {
        files
            .iter()
            .map(|(name, dims)| {
                let info = self.files.get(&title_key(name)).map(|info| {
                    let mut info = info.clone();
                    if let Some(width) = dims.width.filter(|w| *w < info.width) {
                        let height = (u64::from(info.height) * u64::from(width)
                            / u64::from(info.width.max(1))) as u32;
                        info.thumburl = Some(format!("{}?width={width}", info.url));
                        info.thumbwidth = Some(width);
                        info.thumbheight = Some(dims.height.unwrap_or(height));
                    }
                    info
                });
                (name.to_string(), info)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_pages() {
        let mut wiki = MockDataAccess::new().with_page("Template:Echo", "hi");
        wiki.add_page(
            "Other",
            MockPage {
                redirect: true,
                ..Default::default()
            },
        );

        let info = wiki.page_info(&["template:Echo", "Missing", "other"]);
        assert!(info["template:Echo"].known);
        assert!(info["Missing"].missing);
        assert!(info["other"].redirect);
        assert_eq!(
            wiki.fetch_page_content("template:Echo", None).as_deref(),
            Some("hi")
        );
        assert_eq!(wiki.pre_save_transform("x"), "x");
    }

    #[test]
    fn mock_files() {
        let mut wiki = MockDataAccess::new();
        wiki.add_file(
            "File:A.png",
            FileInfo {
                width: 200,
                height: 100,
                url: "//x/A.png".into(),
                ..Default::default()
            },
        );
        let info = wiki.file_info(&[
            (
                "File:A.png",
                FileDims {
                    width: Some(50),
                    height: None,
                },
            ),
            ("File:B.png", FileDims::default()),
        ]);
        let a = info["File:A.png"].as_ref().unwrap();
        assert_eq!(a.thumbwidth, Some(50));
        assert_eq!(a.thumbheight, Some(25));
        assert!(info["File:B.png"].is_none());
    }
}
