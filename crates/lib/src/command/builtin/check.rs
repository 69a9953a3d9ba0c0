use async_trait::async_trait;

use crate::command::{Command, CommandArgs, CommandResult, parse_flag, required_arg};

/// Compares `condition` with `value`.
///
/// A mismatch fails the node; with `silent=true` the failure still stops the
/// run but is not reported as an error, which lets a build end early on a
/// condition.
pub struct CheckCommand;

#[async_trait]
impl Command for CheckCommand {
  async fn execute(&self, args: &CommandArgs) -> CommandResult {
    let (Some(condition), Some(value)) = (required_arg(args, "condition"), required_arg(args, "value")) else {
      return CommandResult::fail(format!(
        "Wrong arguments: condition: '{}', value: '{}'!",
        args.get("condition").map(String::as_str).unwrap_or_default(),
        args.get("value").map(String::as_str).unwrap_or_default()
      ));
    };

    if condition == value {
      return CommandResult::success(format!("Check passed: '{condition}' == '{value}'"));
    }

    let silent = args.get("silent").and_then(|raw| parse_flag(raw)).unwrap_or(false);
    CommandResult::fail_silent(format!("Check failed: '{condition}' != '{value}'!"), silent)
  }
}
