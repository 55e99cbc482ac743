pub mod feature_flags;
pub mod fs_atomic;
pub mod output;
pub mod shell;
pub mod suggest;
pub mod text;
pub mod tool_errors;
