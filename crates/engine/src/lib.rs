pub mod approval;
pub mod cancel;
pub mod executor;
pub mod scheduler;
pub mod sink;
pub mod state;

pub use approval::{ApprovalInfo, ApprovalQueue};
pub use cancel::CancelToken;
pub use executor::ServerExecutor;
pub use scheduler::Engine;
pub use sink::{ClientDispatch, NullDispatch};
pub use state::ExecutionState;
