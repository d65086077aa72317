//! Executable images and page-granular section loading.
//!
//! The real executable parser lives outside this subsystem; the paging core
//! only needs section geometry and the ability to materialize one page of a
//! section on demand. `SectionSource` is that contract, and `Image` is a
//! simple in-memory implementation used by the simulator and by tests.

use thiserror::Error;

use crate::addressing::{PAGE_SIZE, PageNumber};

/// Errors raised by executable images.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The requested section does not exist.
    #[error("image has no section {0}")]
    NoSuchSection(usize),
    /// The requested page lies outside the section.
    #[error("section {section} has no page {page_offset}")]
    PageOutOfRange { section: usize, page_offset: usize },
    /// Section content is larger than its declared page span.
    #[error("section content of {got} bytes overflows {page_count} page(s)")]
    OversizedSection { got: usize, page_count: usize },
}

/// Geometry and protection of one loadable section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionInfo {
    /// First virtual page the section occupies.
    pub first_page: PageNumber,
    /// Number of pages the section spans.
    pub page_count: usize,
    /// Whether the section must be mapped read-only.
    pub read_only: bool,
}

/// A source of lazily-loaded section pages.
///
/// `load_page` fills exactly one page and is invoked at most once per page
/// of a process's lifetime; the paging core owns the content afterwards.
pub trait SectionSource {
    /// Number of loadable sections in the image.
    fn section_count(&self) -> usize;

    /// Geometry of the given section, or `None` if it does not exist.
    fn section_info(&self, section: usize) -> Option<SectionInfo>;

    /// Fills `dest` with the given page of the given section, zero-padding
    /// any tail the section content does not cover.
    fn load_page(
        &self,
        section: usize,
        page_offset: usize,
        dest: &mut [u8],
    ) -> Result<(), ImageError>;
}

/// One loadable section with its content held in memory.
#[derive(Debug)]
pub struct Section {
    info: SectionInfo,
    content: Vec<u8>,
}

impl Section {
    /// Creates a section spanning `page_count` pages starting at
    /// `first_page`. Content shorter than the span reads back zero-filled;
    /// longer content is rejected.
    pub fn new(
        first_page: PageNumber,
        page_count: usize,
        read_only: bool,
        content: Vec<u8>,
    ) -> Result<Self, ImageError> {
        if content.len() > page_count * PAGE_SIZE {
            return Err(ImageError::OversizedSection {
                got: content.len(),
                page_count,
            });
        }
        Ok(Self {
            info: SectionInfo {
                first_page,
                page_count,
                read_only,
            },
            content,
        })
    }

    pub fn info(&self) -> SectionInfo {
        self.info
    }
}

/// An in-memory executable image.
pub struct Image {
    sections: Vec<Section>,
}

impl Image {
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }
}

impl SectionSource for Image {
    fn section_count(&self) -> usize {
        self.sections.len()
    }

    fn section_info(&self, section: usize) -> Option<SectionInfo> {
        self.sections.get(section).map(|s| s.info)
    }

    fn load_page(
        &self,
        section: usize,
        page_offset: usize,
        dest: &mut [u8],
    ) -> Result<(), ImageError> {
        assert_eq!(dest.len(), PAGE_SIZE, "section loads are whole pages");
        let s = self
            .sections
            .get(section)
            .ok_or(ImageError::NoSuchSection(section))?;
        if page_offset >= s.info.page_count {
            return Err(ImageError::PageOutOfRange {
                section,
                page_offset,
            });
        }

        let start = (page_offset * PAGE_SIZE).min(s.content.len());
        let end = ((page_offset + 1) * PAGE_SIZE).min(s.content.len());
        let covered = end - start;
        dest[..covered].copy_from_slice(&s.content[start..end]);
        dest[covered..].fill(0);
        Ok(())
    }
}
