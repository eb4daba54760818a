use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::sync::{Document, Fields};

/// Which transaction type a category applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    Income,
    Expense,
    Both,
}

/// Display metadata for a category. Transactions reference categories by
/// `name`, not by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub icon: String,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CategoryType>,
}

const BUILT_IN: [(&str, &str, &str, CategoryType); 15] = [
    ("exp-1", "Food", "fast-food", CategoryType::Expense),
    ("exp-2", "Transport", "car", CategoryType::Expense),
    ("exp-3", "Housing", "home", CategoryType::Expense),
    ("exp-4", "Shopping", "cart", CategoryType::Expense),
    ("exp-5", "Entertainment", "game-controller", CategoryType::Expense),
    ("exp-6", "Health", "medkit", CategoryType::Expense),
    ("exp-7", "Education", "school", CategoryType::Expense),
    ("exp-8", "Bills & Utilities", "receipt", CategoryType::Expense),
    ("inc-1", "Salary", "cash", CategoryType::Income),
    ("inc-2", "Freelance", "briefcase", CategoryType::Income),
    ("inc-3", "Business", "business", CategoryType::Income),
    ("inc-4", "Investment", "trending-up", CategoryType::Income),
    ("inc-5", "Gift", "gift", CategoryType::Income),
    ("inc-6", "Refund", "return-down-back", CategoryType::Income),
    ("both-1", "Other", "grid", CategoryType::Both),
];

/// The built-in categories seeded into every store.
pub fn default_categories() -> Vec<Category> {
    BUILT_IN
        .iter()
        .map(|(id, name, icon, kind)| Category {
            id: (*id).to_string(),
            name: (*name).to_string(),
            icon: (*icon).to_string(),
            is_custom: false,
            kind: Some(*kind),
        })
        .collect()
}

impl Category {
    /// Whether the category can be picked for a transaction of `kind`.
    /// Categories without a type are offered everywhere.
    pub fn applies_to(&self, kind: crate::transactions::TransactionType) -> bool {
        use crate::transactions::TransactionType;
        match (self.kind, kind) {
            (None, _) | (Some(CategoryType::Both), _) => true,
            (Some(CategoryType::Income), TransactionType::Income) => true,
            (Some(CategoryType::Expense), TransactionType::Expense) => true,
            _ => false,
        }
    }

    /// Remote payload for a custom category owned by `owner_id`.
    pub fn custom_fields(
        owner_id: &str,
        name: &str,
        icon: &str,
        kind: Option<CategoryType>,
    ) -> Fields {
        let mut fields = Fields::new();
        fields.insert("ownerId".into(), owner_id.into());
        fields.insert("name".into(), name.into());
        fields.insert("icon".into(), icon.into());
        fields.insert("isCustom".into(), true.into());
        if let Some(kind) = kind {
            if let Ok(value) = serde_json::to_value(kind) {
                fields.insert("type".into(), value);
            }
        }
        fields
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let name = doc
            .str_field("name")
            .ok_or_else(|| Error::invalid_document(&doc.id, "missing name"))?;
        let kind = match doc.fields.get("type") {
            Some(value) => serde_json::from_value(value.clone()).ok(),
            None => None,
        };
        Ok(Self {
            id: doc.id.clone(),
            name: name.to_string(),
            icon: doc.str_field("icon").unwrap_or_default().to_string(),
            is_custom: true,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transactions::TransactionType;
    use std::collections::HashSet;

    #[test]
    fn built_ins_have_unique_ids_and_names() {
        let categories = default_categories();
        assert_eq!(categories.len(), 15);
        let ids: HashSet<_> = categories.iter().map(|c| c.id.as_str()).collect();
        let names: HashSet<_> = categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(ids.len(), 15);
        assert_eq!(names.len(), 15);
        assert!(categories.iter().all(|c| !c.is_custom));
    }

    #[test]
    fn category_type_filters_pickers() {
        let categories = default_categories();
        let income: Vec<_> = categories
            .iter()
            .filter(|c| c.applies_to(TransactionType::Income))
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            income,
            vec!["Salary", "Freelance", "Business", "Investment", "Gift", "Refund", "Other"]
        );
    }

    #[test]
    fn custom_category_document_is_flagged_custom() {
        let fields = Category::custom_fields("u1", "Pets", "paw", None);
        let category = Category::from_document(&Document::new("c-1", fields)).expect("decode");
        assert!(category.is_custom);
        assert_eq!(category.kind, None);
        assert!(category.applies_to(TransactionType::Expense));
    }
}
