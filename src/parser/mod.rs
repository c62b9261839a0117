// ABOUTME: Parser module for YAML workflow definitions
// ABOUTME: Exports workflow parsing, validation, and data structures

pub mod error;
pub mod task;
pub mod validation;
pub mod workflow;

pub use error::{ParserError, ValidationError};
pub use task::{SlotDefinition, TaskDefinition};
pub use validation::{ValidationReport, WorkflowValidator};
pub use workflow::{WorkflowDefinition, WorkflowParser};
