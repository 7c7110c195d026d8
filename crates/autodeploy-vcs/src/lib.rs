//! Version-control side of autodeploy.
//!
//! [`GitCodeChanger`] turns a change plan into a pushed branch: it prepares a
//! working copy with the `git` CLI, asks a [`CodeGenerator`] for whole-file
//! edits per change, commits each change separately and pushes the branch.
//! Reverting deletes the branch from the remote.

pub mod changer;
pub mod generator;
pub mod git;
pub mod workspace;

pub use changer::GitCodeChanger;
pub use generator::{CodeGenerator, FileEdit, GenerationRequest, LlmCodeGenerator, SourceFile};
pub use git::{Git, GitFailure};
pub use workspace::branch_name;
