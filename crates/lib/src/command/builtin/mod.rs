//! Built-in commands.

mod check;
mod copy_file;
mod delete_dir;
mod run;

pub use check::CheckCommand;
pub use copy_file::CopyFileCommand;
pub use delete_dir::DeleteDirCommand;
pub use run::{RunCommand, split_args};
