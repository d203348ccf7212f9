//! Testing utilities and mock implementations of the external collaborators.
//!
//! The mocks record calls for assertions and let tests script outcomes.
//!
//! # Example
//!
//! ```rust,ignore
//! use nzbstream_core::testing::{fixtures, MockDownloadBackend, MockSearcher};
//!
//! let searcher = MockSearcher::new();
//! let backend = MockDownloadBackend::new();
//!
//! searcher.set_hits("the matrix 1999", vec![fixtures::raw_hit("The.Matrix.1999.1080p", "nzb-1")]).await;
//! backend.fail_on_enqueue("nzb-1", "Out of retention").await;
//! ```

mod mock_backend;
mod mock_searcher;
mod mock_usenet;

pub use mock_backend::MockDownloadBackend;
pub use mock_searcher::MockSearcher;
pub use mock_usenet::{MockNzbSource, MockUsenetProvider};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::searcher::{Candidate, RawHit, DEFAULT_INDEXER_PRIORITY};

    /// A raw indexer hit with reasonable defaults.
    pub fn raw_hit(title: &str, download_ref: &str) -> RawHit {
        RawHit {
            title: title.to_string(),
            download_ref: download_ref.to_string(),
            indexer_id: 1,
            indexer_name: "mock-indexer".to_string(),
            size_bytes: 1024 * 1024 * 1024 * 4, // 4 GB
            priority: DEFAULT_INDEXER_PRIORITY,
        }
    }

    /// An untriaged, unblocked candidate.
    pub fn candidate(title: &str, download_ref: &str) -> Candidate {
        Candidate {
            title: title.to_string(),
            download_ref: download_ref.to_string(),
            indexer_id: 1,
            indexer_name: "mock-indexer".to_string(),
            size_bytes: 1024 * 1024 * 1024 * 4,
            languages: Vec::new(),
            resolution: None,
            blocked: None,
            status: None,
        }
    }

    /// An NZB with one file whose segments carry `ids`, numbered from 1.
    pub fn nzb_xml(filename: &str, ids: &[&str]) -> String {
        let segments: String = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                format!(
                    "      <segment bytes=\"768000\" number=\"{}\">{}</segment>\n",
                    i + 1,
                    id
                )
            })
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">\n\
             <file poster=\"poster@example.com\" date=\"1700000000\" subject=\"Release [1/1] - &quot;{}&quot; yEnc (1/{})\">\n\
             <groups><group>alt.binaries.test</group></groups>\n\
             <segments>\n{}    </segments>\n\
             </file>\n\
             </nzb>\n",
            filename,
            ids.len(),
            segments
        )
    }
}
