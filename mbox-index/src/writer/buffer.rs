//! In-memory output buffer

use std::collections::BTreeMap;

/// Content that can be buffered and measured
pub trait BufferedContent: Send + Sync + 'static {
    /// Bytes this content contributes to the buffer threshold
    fn byte_size(&self) -> usize;
}

impl BufferedContent for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl BufferedContent for String {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

/// Pending content keyed by output key
///
/// Queuing an existing key replaces its content.
#[derive(Debug)]
pub struct OutputBuffer<C> {
    items: BTreeMap<String, C>,
    bytes: usize,
}

impl<C: BufferedContent> OutputBuffer<C> {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
            bytes: 0,
        }
    }

    pub fn insert(&mut self, key: String, content: C) {
        self.bytes += content.byte_size();
        if let Some(previous) = self.items.insert(key, content) {
            self.bytes -= previous.byte_size();
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Take everything, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<(String, C)> {
        self.bytes = 0;
        std::mem::take(&mut self.items).into_iter().collect()
    }
}

impl<C: BufferedContent> Default for OutputBuffer<C> {
    fn default() -> Self {
        Self::new()
    }
}
