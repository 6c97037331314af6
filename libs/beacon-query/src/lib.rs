//! Beacon query translation and result handover engine
//!
//! Turns normalized Beacon request parameters into per-collection
//! [`Predicate`] trees, runs them through a [`DocumentStore`], and keeps the
//! matched id lists as handovers for pagination and later reuse.
//!
//! ```ignore
//! let assembler = QueryAssembler::new(definitions, collations);
//! let query = assembler.assemble(&ctx, &handovers, &genes).await?;
//! let results = executor.execute(&ctx, &query).await?;
//! ```

pub mod assembler;
pub mod context;
pub mod definitions;
pub mod error;
pub mod execute;
pub mod filters;
pub mod geo;
pub mod handover;
pub mod pagination;
pub mod predicate;
pub mod schema;
pub mod store;
pub mod variants;

pub use assembler::{AssembledQuery, QueryAssembler, QueryMap};
pub use context::{Filter, FilterFlags, PathId, RequestContext, RequestContextBuilder, VariantParameters};
pub use definitions::{
    Collation, CollationIndex, CollectionLink, Definitions, EngineConfig, FilterDefinition,
};
pub use error::{Error, Result};
pub use execute::{DatasetResult, QueryExecutor, ResultPage};
pub use filters::{filtering_terms_query, FilterResolver};
pub use geo::{GeoQuery, GeoQueryBuilder};
pub use handover::{
    CreatedHandover, HandoverBackend, HandoverLookupError, HandoverRecord, HandoverStore,
    MemoryHandoverBackend,
};
pub use pagination::{compute_range, slice, PageRange, Pagination};
pub use predicate::{Comparison, GeoPoint, Logic, Predicate};
pub use schema::{convert_keys, to_camel_key, to_external_key, to_persisted_key, KeyCase, SchemaNode, SchemaRegistry};
pub use store::{DocumentStore, MemoryDocumentStore};
pub use variants::{
    GeneCoordinateResolver, GeneInterval, StoreGeneResolver, VariantQueryBuilder, VariantRequest,
    VariantRequestClassifier, VariantRequestType,
};
