//! Engine module: CLI definition, command handling, path checks

pub mod arg_parser;
pub mod cli;
pub mod tools;

pub use arg_parser::{Cli, Role};
pub use cli::{build_opts, handle_cli, handle_run};
pub use tools::{check_roots_disjoint, check_source_root, path_relative_to, prepare_dest_root};
