//! Ingester Client Interface
//!
//! The querier talks to ingesters through this trait; the wire transport
//! behind it (and request framing, auth, the org-ID header) is outside this
//! subsystem. Implementations must be cheap to clone through `Arc` and safe
//! to share across concurrent fan-outs.

use crate::error::Result;
use async_trait::async_trait;
use tracehouse_core::{
    SearchRequest, SearchResponse, SearchTagValuesResponse, SearchTagsResponse, TraceByIdRequest,
    TraceByIdResponse,
};

#[async_trait]
pub trait IngesterClient: Send + Sync {
    async fn find_trace_by_id(
        &self,
        tenant_id: &str,
        req: TraceByIdRequest,
    ) -> Result<TraceByIdResponse>;

    async fn search(&self, tenant_id: &str, req: SearchRequest) -> Result<SearchResponse>;

    async fn search_tags(&self, tenant_id: &str) -> Result<SearchTagsResponse>;

    async fn search_tag_values(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<SearchTagValuesResponse>;
}
