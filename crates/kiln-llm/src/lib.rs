//! # kiln-llm
//!
//! The model provider seam. Kiln does not talk to model APIs itself; the
//! host application supplies an [`LlmProvider`] and the sub-agent runner
//! drives it. A deterministic [`MockProvider`] ships for tests.

pub mod mock;
pub mod provider;

pub use mock::{MockProvider, MockResponse};
pub use provider::{LlmProvider, LlmRequest, LlmResponse, StopReason, Usage};
