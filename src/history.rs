use crate::{
    chat::{ChatMessage, Dialog},
    dialog::DialogManager,
    entity::{ConversationKey, UserId},
    error::ChatResult,
    store::Store,
};

/// Read-only views over the message store.
#[derive(Clone, Debug)]
pub struct HistoryService {
    store: Store,
    dialogs: DialogManager,
}

impl HistoryService {
    pub fn new(store: Store, dialogs: DialogManager) -> Self {
        Self { store, dialogs }
    }

    /// Every conversation `user` has open, most recent first.
    pub async fn list_dialogs(&self, user: UserId) -> ChatResult<Vec<Dialog>> {
        self.store.select_all_dialogs(user).await
    }

    pub async fn get_history(
        &self,
        key: ConversationKey,
        page: i64,
        count: i64,
    ) -> ChatResult<Vec<ChatMessage>> {
        self.dialogs.get_history(key, page, count).await
    }
}
