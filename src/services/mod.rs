//! Core services: the movement state machine and the task queue.

pub mod instruction_builder;
pub mod loop_detector;
pub mod output_prefixer;
pub mod permission_resolver;
pub mod piece_engine;
pub mod provider_resolver;
pub mod status_judge;
pub mod task_lifecycle;
pub mod task_runner;
pub mod transition_resolver;
pub mod worktree_service;

pub use instruction_builder::TemplateInstructionBuilder;
pub use loop_detector::{Fingerprint, LoopDetector};
pub use output_prefixer::{stdout_sink, SharedSink, TaskPrefixWriter};
pub use permission_resolver::resolve_permission;
pub use piece_engine::{EngineTask, PieceEngine};
pub use provider_resolver::{resolve_provider, CliOverrides, ResolvedProvider};
pub use status_judge::StatusJudge;
pub use task_lifecycle::TaskLifecycleService;
pub use task_runner::{RunSummary, RunnerOptions, TaskRunner};
pub use transition_resolver::TransitionContext;
pub use worktree_service::{Worktree, WorktreeService};
