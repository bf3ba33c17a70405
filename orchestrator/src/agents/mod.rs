pub mod augmenter;
pub mod completion;
pub mod embedder;
pub mod retriever;
pub mod sse;

pub use completion::{CompletionStreamer, FragmentStream, OpenAiCompletionStreamer};
pub use embedder::{Embedder, OpenAiEmbedder};
pub use retriever::{PineconeRetriever, Retriever};
