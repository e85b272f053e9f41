//! gridrag-answer
//!
//! Grounded answer composition: risk classification, role gating, admission,
//! context assembly, generation and citation validation.

pub mod citations;
pub mod composer;
pub mod context;
pub mod generator;
pub mod policy;
pub mod prompt;
pub mod risk;

pub use composer::AnswerComposer;
pub use generator::ChatCompletionsGenerator;
pub use policy::RolePolicy;
