//! `sluice user` commands.

use anyhow::Result;
use sluice_core::{User, UserStore};

use super::{Context, GlobalArgs, UserCommand};
use crate::output;

/// Run a user subcommand.
pub fn run(global: &GlobalArgs, cmd: UserCommand) -> Result<()> {
    let ctx = Context::open(global)?;
    match cmd {
        UserCommand::Add { name, email, admin } => {
            let user = ctx.store.insert_user(User {
                id: 0,
                name,
                email,
                is_admin: admin,
            })?;
            let role = if user.is_admin { " (admin)" } else { "" };
            output::success(&format!("Added user {}{role}", user.name));
        }
    }
    Ok(())
}
