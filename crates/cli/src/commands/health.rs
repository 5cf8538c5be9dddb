use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::Outcome;
use crate::context::CommandContext;

pub async fn execute(ctx: &CommandContext, cancel: &CancellationToken) -> snapview::Result<Outcome> {
	let session = ctx.session.health_check(cancel).await?;
	Ok(Outcome::Data(json!({
		"url": ctx.session.url(),
		"userName": session.user_name,
		"loginTime": session.login_time,
		"lastActiveTime": session.last_active_time,
	})))
}
