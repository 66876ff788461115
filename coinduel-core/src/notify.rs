use uuid::Uuid;

/// Template keys for user-facing messages. The engine never formats final
/// text; the host's sink resolves a key plus substitutions to whatever its
/// messaging layer renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKey {
    ListingCreated,
    ListingCancelled,
    PlayerChallenge,
    GameSummaryWin,
    GameSummaryLoss,
    GameRefunded,
    WinBroadcast,
}

impl MessageKey {
    pub fn as_key(&self) -> &'static str {
        match self {
            MessageKey::ListingCreated => "coinduel.listing-created",
            MessageKey::ListingCancelled => "coinduel.listing-cancelled",
            MessageKey::PlayerChallenge => "coinduel.challenge",
            MessageKey::GameSummaryWin => "coinduel.summary-win",
            MessageKey::GameSummaryLoss => "coinduel.summary-loss",
            MessageKey::GameRefunded => "coinduel.refunded",
            MessageKey::WinBroadcast => "coinduel.win-broadcast",
        }
    }
}

/// Outbound notification boundary. Implementations must be best-effort and
/// non-blocking: the engine never rolls back a settlement because a message
/// failed to deliver.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, account: Uuid, key: MessageKey, substitutions: &[(&str, String)]);

    fn broadcast(&self, key: MessageKey, substitutions: &[(&str, String)]);
}

/// Drops every notification. Default sink for headless hosts and tests.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _account: Uuid, _key: MessageKey, _substitutions: &[(&str, String)]) {}

    fn broadcast(&self, _key: MessageKey, _substitutions: &[(&str, String)]) {}
}

/// Logs notifications through `tracing`. Used by the demo CLI.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, account: Uuid, key: MessageKey, substitutions: &[(&str, String)]) {
        tracing::info!(
            "notify {} {} {:?}",
            account,
            key.as_key(),
            substitutions
        );
    }

    fn broadcast(&self, key: MessageKey, substitutions: &[(&str, String)]) {
        tracing::info!("broadcast {} {:?}", key.as_key(), substitutions);
    }
}
