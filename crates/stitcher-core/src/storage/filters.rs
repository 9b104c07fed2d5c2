use serde::Serialize;

/// Hard cap on a single page of entities.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Skip/top window over an id-ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: usize,
    pub top: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            top: MAX_PAGE_SIZE,
        }
    }
}

impl Page {
    /// `top` is clamped to [`MAX_PAGE_SIZE`] whatever the caller asks for.
    pub fn new(skip: usize, top: usize) -> Self {
        Self {
            skip,
            top: top.min(MAX_PAGE_SIZE),
        }
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_top(mut self, top: usize) -> Self {
        self.top = top.min(MAX_PAGE_SIZE);
        self
    }
}

/// Store statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub entity_count: u64,
    pub edge_count: u64,
    pub datasource_count: u64,
    pub stitch_versions: u32,
    pub last_modified: u64,
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_is_clamped() {
        assert_eq!(Page::new(0, 5000).top, MAX_PAGE_SIZE);
        assert_eq!(Page::new(3, 10).top, 10);
        assert_eq!(Page::default().with_top(1001).top, MAX_PAGE_SIZE);
    }
}
