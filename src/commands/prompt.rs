use anyhow::Result;

use super::{GlobalArgs, Workspace};
use crate::tools::system_prompt;

/// Print the system prompt addition for this project.
pub fn run(args: &GlobalArgs) -> Result<()> {
    let workspace = Workspace::open(args)?;
    println!("{}", system_prompt(&workspace.config.sandbox.repo_path));
    Ok(())
}
