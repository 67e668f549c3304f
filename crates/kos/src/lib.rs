//! # Phonebill KOS
//!
//! Bill inquiry and product change against KOS, the upstream billing and
//! provisioning backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │   BillInquiryOrchestrator     │   │  ProductChangeOrchestrator    │
//! └──────────────────────────────┘   └──────────────────────────────┘
//!        │ cache-aside        │ lifecycle writes        │
//!        ▼                    ▼                         ▼
//!   CacheStore      OperationRecorder ──► WriteQueue   ResilientClient
//!                    (AsyncOperationTracker)             │
//!                                                        ▼
//!                               bulkhead ► retry ► breaker ► time limit
//!                                                        │
//!                                                        ▼
//!                                                  KosTransport (HTTP)
//! ```
//!
//! The [`reconciler::Reconciler`] re-probes operations left in
//! `PROCESSING` until KOS settles them.

pub mod client;
pub mod config;
pub mod convert;
pub mod domain;
pub mod dto;
pub mod error;
pub mod orchestrator;
pub mod reconciler;
pub mod request_id;
pub mod transport;

pub use client::{CallResult, ResilientClient};
pub use config::{KosConfig, KosPaths};
pub use domain::{
    Bill, BillInquiryResponse, BillQuery, ProcessStatus, ProductChange, ProductChangeQuery,
    ProductChangeResponse,
};
pub use error::IntegrationError;
pub use orchestrator::{
    BillInquiryOrchestrator, OperationRecorder, OrchestratorError, ProductChangeOrchestrator,
    BILL_INQUIRY, PRODUCT_CHANGE,
};
pub use reconciler::{ReconcileStats, Reconciler, StatusProbe};
pub use transport::{HttpKosTransport, KosOperation, KosRequest, KosTransport};
