//! Remote backends
//!
//! Replicate media generation, OpenAI storyboard planning, artifact download
//! and their offline mock counterparts.
pub mod config;
pub mod error;
pub mod http;
pub mod mock;
pub mod openai;
pub mod replicate;

pub use config::{load_dotenv, BackendConfig, ModelConfig, StageModel};
pub use error::ProviderError;
pub use http::HttpFetcher;
pub use mock::{MockConfig, MockFetcher, MockInvoker, MockPlanner};
pub use openai::{OpenAiConfig, OpenAiPlanner};
pub use replicate::{Prediction, ReplicateClient, ReplicateInvoker};
