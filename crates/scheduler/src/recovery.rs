//! Post-failure cleanup.
//!
//! After a task fails the event channel may hold a half-consumed
//! stream and the handle slot a stale prompt id. Recovery forces a
//! fresh socket, clears the tracked handle, and discards anything
//! still queued on the feed so the next task starts clean.

use fognode_comfyui::channel::{EventChannel, EventFeed, HandleSlot};

/// Reset channel, slot, and feed after a failed task.
pub async fn run_recovery(channel: &EventChannel, feed: &mut EventFeed, slot: &HandleSlot) {
    tracing::info!("Starting recovery");
    channel.reset();
    slot.clear().await;
    let discarded = feed.drain();
    if discarded > 0 {
        tracing::debug!(discarded, "Dropped stale events during recovery");
    }
    tracing::info!("Recovery complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fognode_comfyui::reconnect::ReconnectConfig;
    use fognode_core::types::ExecutionHandle;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn recovery_clears_slot_and_feed() {
        let cancel = CancellationToken::new();
        let slot = HandleSlot::default();
        // Nothing listens on port 9; the channel just retries in the
        // background while recovery runs against it.
        let (channel, _socket_feed) = EventChannel::start(
            "ws://127.0.0.1:9".to_string(),
            "test-client".to_string(),
            slot.clone(),
            ReconnectConfig::default(),
            cancel.child_token(),
        );

        let (writer, mut feed) = EventFeed::detached();
        slot.set(ExecutionHandle::from("prompt-1".to_string())).await;
        writer.push(fognode_comfyui::events::ResultEvent::Completed);

        run_recovery(&channel, &mut feed, &slot).await;

        assert!(slot.get().await.is_none());
        assert_eq!(feed.drain(), 0);

        cancel.cancel();
        channel.shutdown().await;
    }
}
