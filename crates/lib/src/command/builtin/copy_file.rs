use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::command::{Command, CommandArgs, CommandResult, flag_arg, required_arg};

/// Copies `from` to `to`, overwriting the target.
///
/// When the source is missing the result depends on `if_exist` (default
/// `true`): `true` fails the node, `false` treats the copy as a no-op.
pub struct CopyFileCommand;

#[async_trait]
impl Command for CopyFileCommand {
  async fn execute(&self, args: &CommandArgs) -> CommandResult {
    let (Some(from), Some(to)) = (required_arg(args, "from"), required_arg(args, "to")) else {
      return CommandResult::fail("No paths provided!");
    };
    let if_exist = match flag_arg(args, "if_exist", true) {
      Ok(value) => value,
      Err(message) => return CommandResult::fail(message),
    };

    let source_exists = fs::metadata(from).await.map(|m| m.is_file()).unwrap_or(false);
    if !source_exists {
      return if if_exist {
        CommandResult::fail(format!("File \"{from}\" does not exist!"))
      } else {
        CommandResult::success(String::new())
      };
    }

    debug!(from = %from, to = %to, "copying file");
    match fs::copy(from, to).await {
      Ok(_) => CommandResult::success(format!("File copied from \"{from}\" to \"{to}\".")),
      Err(e) => CommandResult::fail(format!("Can't copy file from \"{from}\" to \"{to}\": \"{e}\"")),
    }
  }
}
