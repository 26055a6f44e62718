use crate::infobox::Infobox;
use crate::table::WikiTable;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub type PageId = u32;
pub type ArticleId = PageId;

/// One page as it comes off the dump, latest revision only.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub id: PageId,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleType {
    Text,
    Categories,
    Redirect,
    RedirectAndCategories,
}

impl ArticleType {
    pub fn classify(is_redirect: bool, has_categories: bool) -> Self {
        match (is_redirect, has_categories) {
            (true, true) => ArticleType::RedirectAndCategories,
            (true, false) => ArticleType::Redirect,
            (false, true) => ArticleType::Categories,
            (false, false) => ArticleType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleType::Text => "text",
            ArticleType::Categories => "categories",
            ArticleType::Redirect => "redirect",
            ArticleType::RedirectAndCategories => "redirect_and_categories",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub is_redirect: bool,
    pub article_type: ArticleType,
    pub redirect_target: Option<String>,
}

/// Ordered string pairs, serialized as a JSON object in insertion order.
/// Later inserts of an existing key replace its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap(pub Vec<(String, String)>);

impl FieldMap {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: String, value: String) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of string keys to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
                let mut fields = FieldMap::default();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    fields.0.push((k, v));
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

/// Tables and infoboxes pulled out of one section's markup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideChannel {
    pub wikitables: Vec<WikiTable>,
    pub infoboxes: Vec<Infobox>,
}

impl SideChannel {
    pub fn is_empty(&self) -> bool {
        self.wikitables.is_empty() && self.infoboxes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub order: u32,
    pub title: String,
    pub content: String,
    pub side_channel: SideChannel,
}

/// Everything the writer needs to persist one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub article: Article,
    pub sections: Vec<Section>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyText,
    Encoding(String),
    DuplicateId,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::EmptyText => "empty_text",
            SkipReason::Encoding(_) => "encoding",
            SkipReason::DuplicateId => "duplicate_id",
        }
    }
}

/// Result of handling one page. Expected per-page conditions are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Committed(ArticleId),
    Skipped(SkipReason),
}
