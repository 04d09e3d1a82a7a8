//! Runtime values and the host function boundary.

mod native;
mod value;

pub use native::{BindingContext, NativeCall, NativeFn, NativeStatus};
pub use value::{ArithOp, CompareOp, NativeRef, Tag, Value, ValueError};
