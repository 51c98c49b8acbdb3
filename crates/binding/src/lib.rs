pub mod path;
pub mod resolver;

pub use path::BindingPath;
pub use resolver::{BindingFailure, BindingResolver, PrevalidateOutcome};
