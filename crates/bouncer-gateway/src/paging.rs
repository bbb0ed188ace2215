//! Result paging.
//!
//! Long outputs split at line boundaries into addressable pages. Page 1
//! returns inline; later pages persist with a short TTL and are fetched by
//! `GetPage`.

use std::sync::Arc;

use bouncer_approval::{PageRecord, Store};
use bouncer_core::{GatewayError, GatewayResult, PageId, RequestId, Timestamp};

/// The paged form of one command output.
#[derive(Debug, Clone)]
pub struct PagedOutput {
    /// Page 1, returned inline.
    pub first_page: String,
    /// Total page count (1 when the output fit inline).
    pub total_pages: u32,
    /// Token for page 2, when there is one.
    pub next_page: Option<PageId>,
    /// Length of the full output in characters.
    pub output_length: usize,
}

impl PagedOutput {
    /// Whether the output spilled beyond page 1.
    #[must_use]
    pub fn is_paged(&self) -> bool {
        self.total_pages > 1
    }

    /// Human notice appended to result messages for long outputs.
    #[must_use]
    pub fn notice(&self) -> Option<String> {
        self.is_paged().then(|| {
            format!(
                "⚠️ long output ({} chars, {} pages)",
                self.output_length, self.total_pages
            )
        })
    }
}

/// A retrieved page.
#[derive(Debug, Clone)]
pub struct PageView {
    /// Page content.
    pub content: String,
    /// 1-based page number.
    pub page: u32,
    /// Total pages.
    pub total_pages: u32,
    /// Token for the next page, when there is one.
    pub next_page: Option<PageId>,
}

/// Splits and stores long outputs.
pub struct Pager<S> {
    store: Arc<S>,
    page_size_chars: usize,
    page_ttl_seconds: u64,
}

/// Split text at line boundaries into chunks of at most `max_chars`
/// characters. A single overlong line is hard-split.
fn split_pages(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pages = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    let mut push_line = |line: &str, pages: &mut Vec<String>, current: &mut String, current_len: &mut usize| {
        let line_len = line.chars().count();
        let sep = usize::from(!current.is_empty());
        if *current_len + sep + line_len > max_chars && !current.is_empty() {
            pages.push(std::mem::take(current));
            *current_len = 0;
        }
        if line_len > max_chars {
            // Hard-split an overlong line.
            let mut chunk = String::new();
            let mut chunk_len = 0;
            for c in line.chars() {
                if chunk_len == max_chars {
                    pages.push(std::mem::take(&mut chunk));
                    chunk_len = 0;
                }
                chunk.push(c);
                chunk_len += 1;
            }
            if !chunk.is_empty() {
                *current = chunk;
                *current_len = chunk_len;
            }
            return;
        }
        if !current.is_empty() {
            current.push('\n');
            *current_len += 1;
        }
        current.push_str(line);
        *current_len += line_len;
    };

    for line in text.split('\n') {
        push_line(line, &mut pages, &mut current, &mut current_len);
    }
    if !current.is_empty() || pages.is_empty() {
        pages.push(current);
    }
    pages
}

impl<S: Store> Pager<S> {
    /// Build a pager.
    #[must_use]
    pub fn new(store: Arc<S>, page_size_chars: usize, page_ttl_seconds: u64) -> Self {
        Self {
            store,
            page_size_chars,
            page_ttl_seconds,
        }
    }

    /// Split `output` for `request_id`, persisting pages 2..n.
    ///
    /// Storage failures degrade to truncation: the caller still gets page 1,
    /// later pages are simply unavailable.
    pub async fn store_paged(&self, request_id: &RequestId, output: &str) -> PagedOutput {
        let output_length = output.chars().count();
        if output_length <= self.page_size_chars {
            return PagedOutput {
                first_page: output.to_owned(),
                total_pages: 1,
                next_page: None,
                output_length,
            };
        }

        let pages = split_pages(output, self.page_size_chars);
        let total_pages = u32::try_from(pages.len()).unwrap_or(u32::MAX);
        let expires_at = Timestamp::now().plus_seconds(self.page_ttl_seconds);

        for (index, content) in pages.iter().enumerate().skip(1) {
            let page_number = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let record = PageRecord {
                page_id: PageId::for_page(request_id, page_number),
                content: content.clone(),
                page: page_number,
                total_pages,
                expires_at,
            };
            if let Err(e) = self.store.put_page(record).await {
                tracing::warn!(error = %e, page = page_number, "failed to store result page");
            }
        }

        PagedOutput {
            first_page: pages.into_iter().next().unwrap_or_default(),
            total_pages,
            next_page: Some(PageId::for_page(request_id, 2)),
            output_length,
        }
    }

    /// Fetch a stored page.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for unknown or expired pages;
    /// [`GatewayError::Internal`] when the store fails.
    pub async fn get_page(&self, page_id: &PageId) -> GatewayResult<PageView> {
        let record = self
            .store
            .get_page(page_id)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "page lookup failed");
                GatewayError::Internal
            })?
            .ok_or_else(|| GatewayError::NotFound(format!("page {page_id}")))?;

        let next_page = (record.page < record.total_pages)
            .then(|| {
                page_id
                    .parse()
                    .map(|(request_id, _)| PageId::for_page(&request_id, record.page + 1))
            })
            .flatten();

        Ok(PageView {
            content: record.content,
            page: record.page,
            total_pages: record.total_pages,
            next_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bouncer_approval::MemoryStore;

    fn pager(store: Arc<MemoryStore>) -> Pager<MemoryStore> {
        Pager::new(store, 100, 3600)
    }

    #[test]
    fn test_split_respects_line_boundaries() {
        let text = (0..10).map(|i| format!("line-{i:02}")).collect::<Vec<_>>().join("\n");
        let pages = split_pages(&text, 30);
        assert!(pages.len() > 1);
        for page in &pages {
            assert!(page.chars().count() <= 30);
            assert!(!page.starts_with('\n'));
        }
        // No content lost.
        assert_eq!(pages.join("\n"), text);
    }

    #[test]
    fn test_split_hard_cuts_monster_line() {
        let text = "x".repeat(250);
        let pages = split_pages(&text, 100);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].len(), 100);
        assert_eq!(pages[2].len(), 50);
    }

    #[tokio::test]
    async fn test_short_output_not_paged() {
        let store = Arc::new(MemoryStore::new());
        let pager = pager(store);
        let paged = pager.store_paged(&RequestId::from("req-1"), "short").await;
        assert!(!paged.is_paged());
        assert_eq!(paged.first_page, "short");
        assert!(paged.next_page.is_none());
    }

    #[tokio::test]
    async fn test_long_output_pages_and_fetches() {
        let store = Arc::new(MemoryStore::new());
        let pager = pager(Arc::clone(&store));
        let request_id = RequestId::from("req-1");
        let text = (0..40).map(|i| format!("row {i}")).collect::<Vec<_>>().join("\n");
        let paged = pager.store_paged(&request_id, &text).await;
        assert!(paged.is_paged());
        assert_eq!(paged.next_page.as_ref().unwrap().as_str(), "req-1:page:2");

        let page2 = pager.get_page(&PageId::from("req-1:page:2")).await.unwrap();
        assert_eq!(page2.page, 2);
        if page2.total_pages > 2 {
            assert_eq!(page2.next_page.unwrap().as_str(), "req-1:page:3");
        }
    }

    #[tokio::test]
    async fn test_unknown_page_not_found() {
        let store = Arc::new(MemoryStore::new());
        let pager = pager(store);
        assert!(matches!(
            pager.get_page(&PageId::from("req-9:page:2")).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_last_page_has_no_next() {
        let store = Arc::new(MemoryStore::new());
        let pager = pager(Arc::clone(&store));
        let request_id = RequestId::from("req-2");
        let text = "a".repeat(150);
        let paged = pager.store_paged(&request_id, &text).await;
        let last = pager
            .get_page(&PageId::for_page(&request_id, paged.total_pages))
            .await
            .unwrap();
        assert!(last.next_page.is_none());
    }

    #[tokio::test]
    async fn test_paging_notice() {
        let store = Arc::new(MemoryStore::new());
        let pager = pager(store);
        let paged = pager
            .store_paged(&RequestId::from("req-3"), &"z".repeat(300))
            .await;
        let notice = paged.notice().unwrap();
        assert!(notice.contains("300 chars"));
    }
}
