//! Routing and ingestion workflows for TaxDesk.
//!
//! Questions go through triage, partition planning and bounded retrieval;
//! documents found by the portal watcher go through classification and are
//! recorded in the catalog.

pub mod classifier;
pub mod completion;
pub mod pipeline;
pub mod planner;
pub mod retrieval;
pub mod triage;

pub use classifier::{ClassificationFailure, DocumentClassifier};
pub use completion::OpenRouterClient;
pub use pipeline::{
    ClassifiedDocument, ProgressReporter, QueryContext, QueryPipeline, ScanOutcome, ScanRecorder,
    SilentProgress, render_context, run_scan,
};
pub use planner::plan_partitions;
pub use retrieval::{RetrievalOutcome, Retriever};
pub use triage::classify_question;
