//! File buffering.
//!
//! [`FullBufferedFile`] keeps the whole content in memory and flushes on
//! release; backends only provide whole-file read and write. [`PagedFile`]
//! caches fixed-size pages with LRU eviction for read-only access to
//! large remote files.

use std::collections::HashMap;

use crate::base::{Attr, File, Result, StorageError};

pub const DEFAULT_PAGE_SIZE: usize = 8 * 1024 * 1024;
pub const DEFAULT_MAX_PAGES: usize = 8;

/// Whole-file access hooks for [`FullBufferedFile`].
pub trait FullAccess: Send {
    fn read_full(&mut self) -> Result<Vec<u8>>;
    fn write_full(&mut self, data: &[u8]) -> Result<usize>;
}

/// A file that buffers reads and writes, storing the full content in
/// memory. Dirty content is written back on flush and release.
pub struct FullBufferedFile {
    inner: Box<dyn FullAccess>,
    attr: Attr,
    buf: Vec<u8>,
    loaded: bool,
    dirty: bool,
}

impl FullBufferedFile {
    pub fn new(inner: Box<dyn FullAccess>, attr: Attr) -> Self {
        FullBufferedFile {
            inner,
            // An empty file needs no initial load.
            loaded: attr.size == 0,
            attr,
            buf: Vec::new(),
            dirty: false,
        }
    }

    fn load(&mut self) -> Result<()> {
        if !self.loaded {
            self.buf = self.inner.read_full()?;
            self.loaded = true;
        }
        Ok(())
    }

    fn write_back(&mut self) -> Result<()> {
        if self.dirty {
            self.inner.write_full(&self.buf)?;
            self.dirty = false;
        }
        Ok(())
    }
}

impl File for FullBufferedFile {
    fn read(&mut self, length: usize, offset: u64) -> Result<Vec<u8>> {
        self.load()?;
        let start = (offset as usize).min(self.buf.len());
        let end = start.saturating_add(length).min(self.buf.len());
        Ok(self.buf[start..end].to_vec())
    }

    fn write(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        self.load()?;
        let offset = offset as usize;
        if self.buf.len() < offset + data.len() {
            self.buf.resize(offset + data.len(), 0);
        }
        self.buf[offset..offset + data.len()].copy_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    fn fgetattr(&mut self) -> Result<Attr> {
        let mut attr = self.attr;
        if self.loaded {
            attr.size = self.buf.len() as u64;
        }
        Ok(attr)
    }

    fn ftruncate(&mut self, length: u64) -> Result<()> {
        if length > 0 {
            self.load()?;
        } else {
            self.loaded = true;
        }
        let length = length as usize;
        if length < self.buf.len() {
            self.buf.truncate(length);
            self.dirty = true;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.write_back()
    }

    fn release(&mut self) -> Result<()> {
        self.write_back()
    }
}

/// Byte-range read hook for [`PagedFile`].
pub trait RangeReader: Send {
    fn read_range(&mut self, length: usize, start: u64) -> Result<Vec<u8>>;
}

/// Page cache with LRU eviction. Pages are loaded on demand and never
/// evicted in the middle of serving a read.
struct PageBuffer {
    pages: HashMap<u64, Vec<u8>>,
    last_used: HashMap<u64, u64>,
    counter: u64,
    size: u64,
    page_size: usize,
    max_pages: usize,
}

impl PageBuffer {
    fn new(size: u64, page_size: usize, max_pages: usize) -> Self {
        PageBuffer {
            pages: HashMap::new(),
            last_used: HashMap::new(),
            counter: 0,
            size,
            page_size,
            max_pages,
        }
    }

    fn page_range(&self, length: usize, start: u64) -> std::ops::Range<u64> {
        let page_size = self.page_size as u64;
        let start_page = start / page_size;
        let end_page = (start + length as u64).div_ceil(page_size);
        start_page..end_page
    }

    fn clamp(&self, length: usize, start: u64) -> usize {
        if start >= self.size {
            return 0;
        }
        (length as u64).min(self.size - start) as usize
    }

    /// The contiguous byte range that must be loaded before the read can
    /// be served, or `None` if every needed page is present.
    fn needed_range(&self, length: usize, start: u64) -> Option<(usize, u64)> {
        let length = self.clamp(length, start);
        if length == 0 {
            return None;
        }
        let missing: Vec<u64> = self
            .page_range(length, start)
            .filter(|page| !self.pages.contains_key(page))
            .collect();
        let first = *missing.first()?;
        let last = *missing.last()?;
        let range_start = first * self.page_size as u64;
        let range_end = ((last + 1) * self.page_size as u64).min(self.size);
        Some(((range_end - range_start) as usize, range_start))
    }

    fn insert(&mut self, data: &[u8], start: u64) {
        debug_assert_eq!(start % self.page_size as u64, 0);
        let base_page = start / self.page_size as u64;
        for (i, chunk) in data.chunks(self.page_size).enumerate() {
            let page = base_page + i as u64;
            self.pages.entry(page).or_insert_with(|| chunk.to_vec());
            self.last_used.insert(page, self.counter);
            self.counter += 1;
        }
    }

    fn read(&mut self, length: usize, start: u64) -> Vec<u8> {
        let length = self.clamp(length, start);
        let mut out = Vec::with_capacity(length);
        for page in self.page_range(length, start) {
            let page_start = page * self.page_size as u64;
            let data = self.pages.get(&page).expect("page loaded before read");
            let from = start.max(page_start) - page_start;
            let to = ((start + length as u64).min(page_start + data.len() as u64)) - page_start;
            out.extend_from_slice(&data[from as usize..to as usize]);
            self.last_used.insert(page, self.counter);
            self.counter += 1;
        }
        self.trim();
        out
    }

    fn trim(&mut self) {
        while self.pages.len() > self.max_pages {
            let oldest = self
                .last_used
                .iter()
                .min_by_key(|(_, used)| **used)
                .map(|(page, _)| *page)
                .expect("pages non-empty");
            self.pages.remove(&oldest);
            self.last_used.remove(&oldest);
        }
    }
}

/// A read-only file that loads fixed-size pages on demand.
pub struct PagedFile {
    reader: Box<dyn RangeReader>,
    attr: Attr,
    buffer: PageBuffer,
}

impl PagedFile {
    pub fn new(reader: Box<dyn RangeReader>, attr: Attr) -> Self {
        Self::with_geometry(reader, attr, DEFAULT_PAGE_SIZE, DEFAULT_MAX_PAGES)
    }

    pub fn with_geometry(
        reader: Box<dyn RangeReader>,
        attr: Attr,
        page_size: usize,
        max_pages: usize,
    ) -> Self {
        PagedFile {
            reader,
            attr,
            buffer: PageBuffer::new(attr.size, page_size, max_pages),
        }
    }
}

impl File for PagedFile {
    fn read(&mut self, length: usize, offset: u64) -> Result<Vec<u8>> {
        if let Some((needed_length, needed_start)) = self.buffer.needed_range(length, offset) {
            tracing::debug!(needed_length, needed_start, "loading page range");
            let data = self.reader.read_range(needed_length, needed_start)?;
            if data.len() < needed_length {
                return Err(StorageError::Io {
                    path: Default::default(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "short read from range reader",
                    ),
                });
            }
            self.buffer.insert(&data, needed_start);
        }
        Ok(self.buffer.read(length, offset))
    }

    fn fgetattr(&mut self) -> Result<Attr> {
        Ok(self.attr)
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
