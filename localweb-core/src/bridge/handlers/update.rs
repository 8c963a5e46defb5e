//! `check-update` command

use crate::bridge::envelope::Reply;
use crate::bridge::error::CommandError;
use crate::bridge::handlers::CommandContext;
use crate::catalog::UpdateCoordinator;
use serde_json::json;

/// Report whether a newer version of the running package is published
///
/// Installing it is left to the shell; content only learns about it.
pub async fn check_update(
    ctx: &CommandContext<'_>,
    updates: Option<&UpdateCoordinator>,
) -> Result<Reply, CommandError> {
    let updates = updates
        .ok_or_else(|| CommandError::NotSupported("Updates are not enabled for this host".into()))?;
    if ctx.host.options().update.is_none() {
        return Err(CommandError::NotSupported(format!(
            "'{}' has no update source",
            ctx.host.id()
        )));
    }

    let descriptor = updates.check_for_update(ctx.host).await;
    let reply = json!({
        "available": descriptor.is_some(),
        "version": descriptor.as_ref().map(|d| d.version.clone()),
        "current": ctx.host.version(),
    });
    let info = descriptor
        .and_then(|d| d.description)
        .map(|description| json!({ "description": description }))
        .unwrap_or_default();
    Ok(Reply::data(reply).with_info(info))
}
