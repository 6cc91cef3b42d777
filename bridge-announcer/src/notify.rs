use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use bridge_common::health::HealthHandle;
use bridge_common::lineproto::LineProtocol;
use bridge_common::sink::UpdateSink;

use crate::announcer::UpdateAnnouncer;
use crate::couch::ChangeSource;

/// Consume `{"db": ..., "type": ...}` update notifications from stdin until
/// end of input or cancellation. Every failure is contained to the
/// notification that caused it.
pub async fn eval_loop<S: ChangeSource, K: UpdateSink>(
    announcer: &UpdateAnnouncer<S, K>,
    protocol: &mut LineProtocol,
    shutdown: CancellationToken,
    liveness: &HealthHandle,
) {
    let mut heartbeat = tokio::time::interval(Duration::from_secs(15));
    loop {
        let notification = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = heartbeat.tick() => {
                liveness.report_healthy();
                continue;
            }
            next = protocol.next() => match next {
                Some(notification) => notification,
                None => break,
            },
        };
        handle_notification(announcer, &notification).await;
    }
}

async fn handle_notification<S: ChangeSource, K: UpdateSink>(
    announcer: &UpdateAnnouncer<S, K>,
    notification: &Value,
) {
    debug!(%notification, "received update notification");

    let (Some(database), Some(kind)) = (
        notification.get("db").and_then(Value::as_str),
        notification.get("type").and_then(Value::as_str),
    ) else {
        warn!(%notification, "expected keys 'db' and 'type' not found");
        return;
    };

    let result = match kind {
        "updated" => announcer.update_index(database).await,
        "deleted" => announcer.delete_database(database).await,
        other => {
            warn!(kind = other, "unknown update notification");
            return;
        }
    };
    if let Err(error) = result {
        error!(database, %error, "failed to process update notification");
        metrics::counter!("announcer_notifications_failed_total").increment(1);
    }
}
