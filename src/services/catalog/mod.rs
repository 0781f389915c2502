pub mod api;
pub mod model;

use crate::error::FolioError;
use async_trait::async_trait;

pub use api::CatalogApi;
pub use model::BookDetails;

/// A single upstream metadata call for one identifier.
///
/// Implementations must not retry on their own; the lookup worker calls this
/// exactly once per pending request.
#[async_trait]
pub trait CatalogClient: Send + Sync + 'static {
    async fn fetch(&self, isbn: &str) -> Result<BookDetails, FolioError>;
}
