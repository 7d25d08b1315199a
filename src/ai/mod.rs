mod assistant;
mod completion;

pub use assistant::Assistant;
pub use completion::{AiError, CompletionClient, Message, ModelKind};

#[cfg(test)]
pub(crate) use completion::tests as testing;
