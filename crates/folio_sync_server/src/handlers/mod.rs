mod docs;

pub use docs::{DocsState, doc_routes};
