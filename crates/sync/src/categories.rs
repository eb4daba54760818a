use log::{error, info, warn};
use xpenza_core::categories::{default_categories, Category, CategoryType};
use xpenza_core::sync::{CommandOutcome, Filter, Precondition, CATEGORIES_COLLECTION};

use crate::store::SyncStore;

impl SyncStore {
    /// Creates a custom category remotely, then appends it. Nothing is added
    /// locally when the create fails.
    pub async fn add_category(
        &self,
        name: &str,
        icon: &str,
        kind: Option<CategoryType>,
    ) -> CommandOutcome<String> {
        let Some(owner_id) = self.owner_id() else {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        };
        let name = name.trim();
        if name.is_empty() {
            return CommandOutcome::PreconditionFailed(Precondition::EmptyName);
        }

        let fields = Category::custom_fields(&owner_id, name, icon, kind);
        let id = match self.documents.create(CATEGORIES_COLLECTION, fields).await {
            Ok(id) => id,
            Err(err) => {
                error!("[SyncStore] Failed to create category '{}': {}", name, err);
                return CommandOutcome::RemoteFailed(err.to_string());
            }
        };
        let category = Category {
            id: id.clone(),
            name: name.to_string(),
            icon: icon.to_string(),
            is_custom: true,
            kind,
        };
        self.mutate(|state| state.extend_categories(vec![category]));
        info!("[SyncStore] Added category {}", id);
        CommandOutcome::Applied(id)
    }

    /// Reloads the built-in categories followed by the user's custom ones.
    pub async fn fetch_categories(&self) -> CommandOutcome<usize> {
        let Some(owner_id) = self.owner_id() else {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        };
        let documents = match self
            .documents
            .query(CATEGORIES_COLLECTION, &[Filter::eq("ownerId", owner_id)])
            .await
        {
            Ok(documents) => documents,
            Err(err) => {
                error!("[SyncStore] Failed to fetch categories: {}", err);
                return CommandOutcome::RemoteFailed(err.to_string());
            }
        };

        let custom: Vec<Category> = documents
            .iter()
            .filter_map(|doc| match Category::from_document(doc) {
                Ok(category) => Some(category),
                Err(err) => {
                    warn!("[SyncStore] Skipping category document: {}", err);
                    None
                }
            })
            .collect();
        let count = custom.len();
        self.mutate(|state| {
            state.categories = default_categories();
            state.extend_categories(custom);
        });
        CommandOutcome::Applied(count)
    }
}
