//! Multi-field "get info" results and list queries.

use std::collections::BTreeMap;

use bp_protocol::{ErrorCode, FieldId};

use crate::blob::Blob;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Text(String),
    Blob(Blob),
}

/// Outcome for one requested field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Present(Value),
    /// The provider probed `NO_DATA`: the item has no value for this field.
    Absent,
    /// The provider probed another failure, or the value could not be
    /// buffered locally.
    Error(ErrorCode),
}

impl FieldValue {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Response to a "get info" request: one entry per requested field, in
/// field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoMap {
    fields: BTreeMap<FieldId, FieldValue>,
}

impl InfoMap {
    pub(crate) fn insert(&mut self, field: FieldId, value: FieldValue) {
        self.fields.insert(field, value);
    }

    pub fn get(&self, field: FieldId) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn int(&self, field: FieldId) -> Option<i32> {
        match self.fields.get(&field) {
            Some(FieldValue::Present(Value::Int(v))) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, field: FieldId) -> Option<&str> {
        match self.fields.get(&field) {
            Some(FieldValue::Present(Value::Text(s))) => Some(s),
            _ => None,
        }
    }

    pub fn blob(&self, field: FieldId) -> Option<&Blob> {
        match self.fields.get(&field) {
            Some(FieldValue::Present(Value::Blob(b))) => Some(b),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Paging and filtering for `COMMON_GET_IDS`.
///
/// A negative `limit` means no limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdQuery {
    pub limit: i32,
    pub offset: i32,
    pub keyword: Option<String>,
}

impl Default for IdQuery {
    fn default() -> Self {
        Self {
            limit: -1,
            offset: 0,
            keyword: None,
        }
    }
}

impl IdQuery {
    pub fn page(limit: i32, offset: i32) -> Self {
        Self {
            limit,
            offset,
            keyword: None,
        }
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_map_typed_accessors() {
        let mut info = InfoMap::default();
        info.insert(FieldId::Title, FieldValue::Present(Value::Text("Rust".into())));
        info.insert(FieldId::Sequence, FieldValue::Present(Value::Int(4)));
        info.insert(FieldId::Url, FieldValue::Absent);
        info.insert(FieldId::Favicon, FieldValue::Error(ErrorCode::OutOfMemory));

        assert_eq!(info.text(FieldId::Title), Some("Rust"));
        assert_eq!(info.int(FieldId::Sequence), Some(4));
        assert_eq!(info.text(FieldId::Url), None);
        assert_eq!(info.get(FieldId::Url), Some(&FieldValue::Absent));
        assert!(info.blob(FieldId::Favicon).is_none());
        assert!(info.get(FieldId::PageData).is_none());
        assert_eq!(info.len(), 4);
    }

    #[test]
    fn test_info_map_iterates_in_field_order() {
        let mut info = InfoMap::default();
        info.insert(FieldId::PageData, FieldValue::Absent);
        info.insert(FieldId::Type, FieldValue::Present(Value::Int(1)));
        info.insert(FieldId::Url, FieldValue::Absent);

        let order: Vec<FieldId> = info.iter().map(|(f, _)| f).collect();
        assert_eq!(order, vec![FieldId::Type, FieldId::Url, FieldId::PageData]);
    }

    #[test]
    fn test_id_query_defaults() {
        let query = IdQuery::default();
        assert_eq!(query.limit, -1);
        assert_eq!(query.offset, 0);
        assert!(query.keyword.is_none());

        let query = IdQuery::page(10, 20).keyword("news");
        assert_eq!(query.keyword.as_deref(), Some("news"));
    }
}
