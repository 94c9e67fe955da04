//! Integration tests for the Look-Up engine: executor state machine,
//! orchestration scenarios, indexing collaborator, and handler contracts.

mod common;
