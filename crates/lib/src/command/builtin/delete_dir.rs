use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::command::{Command, CommandArgs, CommandResult, flag_arg, required_arg};

/// Deletes the directory at `path`.
///
/// `recursive` (default `false`) removes contents too. When the directory is
/// missing, `if_exist=true` fails the node; the default treats it as done.
pub struct DeleteDirCommand;

#[async_trait]
impl Command for DeleteDirCommand {
  async fn execute(&self, args: &CommandArgs) -> CommandResult {
    let Some(path) = required_arg(args, "path") else {
      return CommandResult::fail("No path provided!");
    };
    let flags = flag_arg(args, "recursive", false).and_then(|recursive| Ok((recursive, flag_arg(args, "if_exist", false)?)));
    let (recursive, if_exist) = match flags {
      Ok(flags) => flags,
      Err(message) => return CommandResult::fail(message),
    };

    let is_dir = fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false);
    if !is_dir {
      return if if_exist {
        CommandResult::fail(format!("Directory \"{path}\" does not exist!"))
      } else {
        CommandResult::success(String::new())
      };
    }

    debug!(path = %path, recursive, "deleting directory");
    let removed = if recursive {
      fs::remove_dir_all(path).await
    } else {
      fs::remove_dir(path).await
    };

    match removed {
      Ok(()) => CommandResult::success(format!("Directory \"{path}\" deleted.")),
      Err(e) => CommandResult::fail(format!("Can't delete directory at \"{path}\": \"{e}\"")),
    }
  }
}
