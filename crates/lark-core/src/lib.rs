pub mod interpreter;
pub mod orchestrator;
pub mod persona;
pub mod retrieval;

pub use interpreter::interpret;
pub use orchestrator::{Orchestrator, RetryPolicy};
pub use persona::Persona;
pub use retrieval::{SnippetRetriever, StaticRetriever};
