//! 核心编排层：错误分类与恢复、预算、状态模型、路由、调度、监管、执行图

pub mod budget;
pub mod builder;
pub mod classifier;
pub mod error;
pub mod graph;
pub mod recovery;
pub mod router;
pub mod scheduler;
pub mod state;
pub mod supervisor;

pub use budget::{BudgetStatus, BudgetTracker};
pub use builder::GraphBuilder;
pub use classifier::{ClassifierRule, ErrorClassifier};
pub use error::{ClassifiedError, ErrorType, OrchestratorError, RecoveryAction, Severity};
pub use graph::{ExecutionGraph, FanIn, QueryOutcome, QueryRun};
pub use recovery::{RecoveryStrategist, RecoveryStrategy};
pub use router::{route, sources_for};
pub use scheduler::SourceScheduler;
pub use state::{
    ErrorRecord, FetchPolicy, Filters, Frame, Intent, NodeResult, OrchestratorState, RoutingDecision, StateUpdate,
};
pub use supervisor::QuerySupervisor;
