use crate::{
    chat::{ChatMessage, Dialog},
    entity::ConversationKey,
    error::{ChatError, ChatResult},
    store::Store,
};
use tracing::{debug, info, warn};

/// Keeps dialog markers consistent with the message flow.
#[derive(Clone, Debug)]
pub struct DialogManager {
    store: Store,
}

impl DialogManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Make sure a dialog marker exists for `key`.
    ///
    /// Two callers racing to create the same marker both succeed with one row
    /// left behind; any store failure propagates.
    pub async fn ensure_dialog(&self, key: ConversationKey) -> ChatResult<()> {
        if self.store.select_dialog(key).await?.is_some() {
            return Ok(());
        }

        self.store.insert_dialog(&Dialog::new(key)).await?;
        debug!(%key, "dialog created");
        Ok(())
    }

    /// Persist a message sent on `key`, creating the dialog markers of both
    /// directions first.
    ///
    /// The mirror direction is best-effort; its failure does not stop the
    /// message from being stored.
    pub async fn record_message(&self, key: ConversationKey, body: &str) -> ChatResult<ChatMessage> {
        self.ensure_dialog(key).await?;

        if let Err(e) = self.ensure_dialog(key.mirror()).await {
            warn!(key = %key.mirror(), error = %e, "failed to ensure mirror dialog");
        }

        let msg = ChatMessage::new(key, body);
        self.store.insert_message(&msg).await?;
        Ok(msg)
    }

    /// Drop the caller's side of a conversation.
    ///
    /// The shared message log goes away together with the other side's
    /// marker once that side no longer points into it: either its marker is
    /// already gone or its owner never wrote anything.
    ///
    /// The check and the deletes are separate writes. A message the other
    /// side sends in between is torn down with the rest of the log.
    pub async fn clear(&self, key: ConversationKey) -> ChatResult<()> {
        if !self.store.delete_dialog(key).await? {
            return Err(ChatError::NotFound);
        }

        let mirror = key.mirror();
        let mirror_active = match self.store.select_dialog(mirror).await? {
            Some(_) => self.store.count_messages_from(mirror).await? > 0,
            None => false,
        };

        if mirror_active {
            info!(%key, "dialog cleared, peer still holds the conversation");
            return Ok(());
        }

        self.store.delete_dialog(mirror).await?;
        let removed = self.store.delete_messages(key).await?;
        info!(%key, removed, "conversation cleared");

        Ok(())
    }

    /// A page of history as seen from `key`'s side, oldest first.
    ///
    /// Fails with [`ChatError::NotFound`] when `key` has no dialog.
    pub async fn get_history(
        &self,
        key: ConversationKey,
        page: i64,
        count: i64,
    ) -> ChatResult<Vec<ChatMessage>> {
        if self.store.select_dialog(key).await?.is_none() {
            return Err(ChatError::NotFound);
        }

        let page = page.max(0);
        let count = count.max(0);
        self.store
            .select_messages(key, page.saturating_mul(count), count)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{reject_dialog_inserts, test_store};

    #[tokio::test]
    async fn test_history_requires_dialog() {
        let (store, _dir) = test_store().await;
        let dialogs = DialogManager::new(store);
        let key = ConversationKey::new(1, 2, Some(10));

        assert!(matches!(
            dialogs.get_history(key, 0, 10).await,
            Err(ChatError::NotFound)
        ));

        dialogs.record_message(key, "hi").await.unwrap();

        let history = dialogs.get_history(key, 0, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "hi");
        assert_eq!(history[0].key(), key);

        // The recipient sees the same log from the other side.
        let mirrored = dialogs.get_history(key.mirror(), 0, 10).await.unwrap();
        assert_eq!(mirrored, history);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_creates_single_dialog() {
        let (store, _dir) = test_store().await;
        let dialogs = DialogManager::new(store.clone());
        let key = ConversationKey::new(1, 2, Some(10));

        let (a, b) = tokio::join!(dialogs.ensure_dialog(key), dialogs.ensure_dialog(key));
        a.unwrap();
        b.unwrap();

        let all = store.select_all_dialogs(key.from).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(dialogs.get_history(key, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let (store, _dir) = test_store().await;
        let dialogs = DialogManager::new(store);
        let key = ConversationKey::new(1, 2, Some(10));

        for body in ["a", "b", "c", "d", "e"] {
            dialogs.record_message(key, body).await.unwrap();
        }

        let page = |p: i64, c: i64| {
            let dialogs = dialogs.clone();
            async move {
                dialogs
                    .get_history(key, p, c)
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|m| m.body)
                    .collect::<Vec<_>>()
            }
        };

        assert_eq!(page(0, 2).await, vec!["a", "b"]);
        assert_eq!(page(1, 2).await, vec!["c", "d"]);
        assert_eq!(page(2, 2).await, vec!["e"]);
        assert!(page(3, 2).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_one_sided_conversation_removes_everything() {
        let (store, _dir) = test_store().await;
        let dialogs = DialogManager::new(store.clone());
        let key = ConversationKey::new(1, 2, Some(10));

        dialogs.record_message(key, "hi").await.unwrap();
        dialogs.clear(key).await.unwrap();

        assert!(matches!(dialogs.get_history(key, 0, 10).await, Err(ChatError::NotFound)));
        assert!(matches!(
            dialogs.get_history(key.mirror(), 0, 10).await,
            Err(ChatError::NotFound)
        ));
        assert!(store.select_messages(key, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_keeps_log_while_peer_holds_it() {
        let (store, _dir) = test_store().await;
        let dialogs = DialogManager::new(store.clone());
        let key = ConversationKey::new(1, 2, Some(10));

        dialogs.record_message(key, "hi").await.unwrap();
        dialogs.record_message(key.mirror(), "hello").await.unwrap();

        dialogs.clear(key).await.unwrap();
        assert!(matches!(dialogs.get_history(key, 0, 10).await, Err(ChatError::NotFound)));
        assert_eq!(dialogs.get_history(key.mirror(), 0, 10).await.unwrap().len(), 2);

        dialogs.clear(key.mirror()).await.unwrap();
        assert!(matches!(
            dialogs.get_history(key.mirror(), 0, 10).await,
            Err(ChatError::NotFound)
        ));
        assert!(store.select_messages(key, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_not_stored_without_sender_dialog() {
        let (store, _dir) = test_store().await;
        let dialogs = DialogManager::new(store.clone());
        let key = ConversationKey::new(1, 2, Some(10));
        reject_dialog_inserts(&store, 1).await;

        assert!(matches!(
            dialogs.record_message(key, "hi").await,
            Err(ChatError::Store(_))
        ));
        assert_eq!(store.count_messages_from(key).await.unwrap(), 0);
        assert!(store.select_all_dialogs(key.from).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mirror_dialog_failure_still_stores_message() {
        let (store, _dir) = test_store().await;
        let dialogs = DialogManager::new(store.clone());
        let key = ConversationKey::new(1, 2, Some(10));
        reject_dialog_inserts(&store, 2).await;

        dialogs.record_message(key, "hi").await.unwrap();

        let history = dialogs.get_history(key, 0, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(matches!(
            dialogs.get_history(key.mirror(), 0, 10).await,
            Err(ChatError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_clear_without_dialog_is_not_found() {
        let (store, _dir) = test_store().await;
        let dialogs = DialogManager::new(store);

        assert!(matches!(
            dialogs.clear(ConversationKey::new(1, 2, Some(10))).await,
            Err(ChatError::NotFound)
        ));
    }
}
