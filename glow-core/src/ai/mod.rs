//! AI-backed features.
//!
//! Every call to the external model goes through one `AiGateway`, which
//! queues, rate-limits, times out and retries. `AiService` builds requests
//! for each feature and parses the model's JSON replies.
mod client;
mod error;
mod gateway;
pub mod parse;
mod service;

pub use client::{AiClient, AiMessage, AiRequest, ContentBlock, HttpAiClient};
pub use error::AiError;
pub use gateway::{AiGateway, GatewayConfig};
pub use service::{
    fallback_routines, AiService, ProductInfo, COMPARISON_TIMEOUT, PRODUCT_INSIGHT_TIMEOUT,
    ROUTINE_GENERATION_TIMEOUT, SKIN_ANALYSIS_TIMEOUT,
};
