pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod scope;
pub mod value;

pub use error::{RuntimeError, RuntimeResult};
pub use interpreter::Interpreter;
pub use scope::ScopeRef;
pub use value::Value;
