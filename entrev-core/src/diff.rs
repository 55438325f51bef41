use crate::error::{Error, Result};
use crate::models::{Entity, EntityKind, Fields, Value, VersionId};
use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;

/// Whole-entity transition a diff describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Insert,
    Update,
    Delete,
}

/// Old and new value of one field. `None` is the absent sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub kind: EntityKind,
    pub vp_id: VersionId,
    pub transition: Transition,
    pub fields: BTreeMap<String, FieldChange>,
}

impl Diff {
    /// Field-level diff between two possibly absent snapshots of the same
    /// entity. Returns `None` when both sides are absent.
    pub fn between(old: Option<&Entity>, new: Option<&Entity>) -> Option<Diff> {
        Self::between_ignoring(old, new, &[])
    }

    /// Like [`Diff::between`] but leaves out fields listed in `ignored`.
    /// Insertions and deletions always report every field.
    pub fn between_ignoring(
        old: Option<&Entity>,
        new: Option<&Entity>,
        ignored: &[String],
    ) -> Option<Diff> {
        let (anchor, transition) = match (old, new) {
            (None, None) => return None,
            (None, Some(n)) => (n, Transition::Insert),
            (Some(o), None) => (o, Transition::Delete),
            (Some(_), Some(n)) => (n, Transition::Update),
        };

        let empty = Fields::new();
        let old_fields = old.map(|e| &e.fields).unwrap_or(&empty);
        let new_fields = new.map(|e| &e.fields).unwrap_or(&empty);

        let mut fields = BTreeMap::new();
        for name in old_fields.keys().chain(new_fields.keys()) {
            if fields.contains_key(name) {
                continue;
            }
            if transition == Transition::Update && ignored.iter().any(|i| i == name) {
                continue;
            }

            let before = old_fields.get(name);
            let after = new_fields.get(name);
            if before != after {
                fields.insert(
                    name.clone(),
                    FieldChange {
                        old: before.cloned(),
                        new: after.cloned(),
                    },
                );
            }
        }

        Some(Diff {
            kind: anchor.kind,
            vp_id: anchor.vp_id.clone(),
            transition,
            fields,
        })
    }

    /// An update that changes nothing. Inserts and deletes are never empty.
    pub fn is_empty(&self) -> bool {
        self.transition == Transition::Update && self.fields.is_empty()
    }

    pub fn change(&self, field: &str) -> Option<&FieldChange> {
        self.fields.get(field)
    }

    pub fn touches(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Swaps old and new sides.
    pub fn inverted(&self) -> Diff {
        let transition = match self.transition {
            Transition::Insert => Transition::Delete,
            Transition::Delete => Transition::Insert,
            Transition::Update => Transition::Update,
        };

        Diff {
            kind: self.kind,
            vp_id: self.vp_id.clone(),
            transition,
            fields: self
                .fields
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        FieldChange {
                            old: c.new.clone(),
                            new: c.old.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Applies the new side of the diff to `base`.
    ///
    /// For an update `base` must be present; for an insert it must be absent.
    pub fn apply(&self, base: Option<&Entity>) -> Result<Option<Entity>> {
        match (self.transition, base) {
            (Transition::Delete, _) => Ok(None),
            (Transition::Insert, Some(_)) => Err(Error::InvalidOperation(format!(
                "{}/{} already exists",
                self.kind, self.vp_id
            ))),
            (Transition::Update, None) => Err(Error::InvalidOperation(format!(
                "{}/{} does not exist",
                self.kind, self.vp_id
            ))),
            (Transition::Insert, None) => {
                let mut entity = Entity::new(self.kind, self.vp_id.clone());
                self.write_new_values(&mut entity.fields);
                Ok(Some(entity))
            }
            (Transition::Update, Some(base)) => {
                let mut entity = base.clone();
                self.write_new_values(&mut entity.fields);
                Ok(Some(entity))
            }
        }
    }

    /// Applies the old side of the diff to `current`.
    pub fn revert(&self, current: Option<&Entity>) -> Result<Option<Entity>> {
        self.inverted().apply(current)
    }

    fn write_new_values(&self, fields: &mut Fields) {
        for (name, change) in &self.fields {
            match &change.new {
                Some(value) => {
                    fields.insert(name.clone(), value.clone());
                }
                None => {
                    fields.remove(name);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiffLine {
    pub line_type: DiffLineType,
    pub content: String,
    pub old_line_number: Option<usize>,
    pub new_line_number: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineType {
    Context,
    Addition,
    Deletion,
}

impl FieldChange {
    /// Line diff for string fields; `None` for other value types.
    pub fn text_lines(&self) -> Option<Vec<DiffLine>> {
        fn as_text(v: &Option<Value>) -> Option<&str> {
            match v {
                None => Some(""),
                Some(Value::Str(s)) => Some(s.as_str()),
                Some(_) => None,
            }
        }

        let old_text = as_text(&self.old)?;
        let new_text = as_text(&self.new)?;
        Some(compute_lines(old_text, new_text))
    }
}

fn compute_lines(old_text: &str, new_text: &str) -> Vec<DiffLine> {
    let diff = TextDiff::from_lines(old_text, new_text);
    let mut lines = Vec::new();
    let mut old_line_num = 1;
    let mut new_line_num = 1;

    for change in diff.iter_all_changes() {
        let (line_type, old_num, new_num) = match change.tag() {
            ChangeTag::Delete => {
                let num = old_line_num;
                old_line_num += 1;
                (DiffLineType::Deletion, Some(num), None)
            }
            ChangeTag::Insert => {
                let num = new_line_num;
                new_line_num += 1;
                (DiffLineType::Addition, None, Some(num))
            }
            ChangeTag::Equal => {
                let old_num = old_line_num;
                let new_num = new_line_num;
                old_line_num += 1;
                new_line_num += 1;
                (DiffLineType::Context, Some(old_num), Some(new_num))
            }
        };

        let mut content = change.to_string();
        if !content.ends_with('\n') {
            content.push('\n');
        }

        lines.push(DiffLine {
            line_type,
            content,
            old_line_number: old_num,
            new_line_number: new_num,
        });
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &VersionId) -> Entity {
        Entity::new(EntityKind::Post, id.clone())
            .with_field("post_title", "Hello")
            .with_field("post_status", "draft")
            .with_field("comment_count", 0i64)
    }

    #[test]
    fn test_equal_snapshots_produce_empty_diff() {
        let id = VersionId::generate();
        let diff = Diff::between(Some(&post(&id)), Some(&post(&id))).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_changed_added_and_removed_fields() {
        let id = VersionId::generate();
        let old = post(&id);
        let mut new = post(&id)
            .with_field("post_status", "publish")
            .with_field("post_excerpt", "Short");
        new.fields.remove("comment_count");

        let diff = Diff::between(Some(&old), Some(&new)).unwrap();

        assert_eq!(diff.transition, Transition::Update);
        assert_eq!(diff.fields.len(), 3);
        assert_eq!(
            diff.change("post_status"),
            Some(&FieldChange {
                old: Some("draft".into()),
                new: Some("publish".into())
            })
        );
        assert_eq!(diff.change("post_excerpt").unwrap().old, None);
        assert_eq!(diff.change("comment_count").unwrap().new, None);
        assert!(!diff.touches("post_title"));
    }

    #[test]
    fn test_ignored_fields_do_not_count() {
        let id = VersionId::generate();
        let old = post(&id);
        let new = post(&id).with_field("comment_count", 7i64);
        let ignored = vec!["comment_count".to_string()];

        let diff = Diff::between_ignoring(Some(&old), Some(&new), &ignored).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_insert_and_delete_cover_all_fields() {
        let id = VersionId::generate();
        let entity = post(&id);

        let insert = Diff::between(None, Some(&entity)).unwrap();
        assert_eq!(insert.transition, Transition::Insert);
        assert_eq!(insert.fields.len(), 3);
        assert!(!insert.is_empty());

        let delete = Diff::between(Some(&entity), None).unwrap();
        assert_eq!(delete.transition, Transition::Delete);
        assert_eq!(delete.fields.len(), 3);

        assert!(Diff::between(None, None).is_none());
    }

    #[test]
    fn test_diff_is_invertible() {
        let id = VersionId::generate();
        let a = post(&id).with_field("tags", Value::List(vec!["a".into()]));
        let mut b = post(&id).with_field("post_status", "publish");
        b.fields.remove("post_title");

        let diff = Diff::between(Some(&a), Some(&b)).unwrap();
        assert_eq!(diff.apply(Some(&a)).unwrap(), Some(b.clone()));
        assert_eq!(diff.revert(Some(&b)).unwrap(), Some(a));
    }

    #[test]
    fn test_insert_diff_reproduces_entity() {
        let id = VersionId::generate();
        let entity = post(&id);
        let diff = Diff::between(None, Some(&entity)).unwrap();

        assert_eq!(diff.apply(None).unwrap(), Some(entity.clone()));
        assert_eq!(diff.revert(Some(&entity)).unwrap(), None);
        assert!(diff.apply(Some(&entity)).is_err());
    }

    #[test]
    fn test_text_lines_for_string_fields() {
        let change = FieldChange {
            old: Some("line 1\nline 2\nline 3\n".into()),
            new: Some("line 1\nline 2 modified\nline 3\nline 4\n".into()),
        };
        let lines = change.text_lines().unwrap();

        assert!(lines.iter().any(|l| l.line_type == DiffLineType::Addition));
        assert!(lines.iter().any(|l| l.line_type == DiffLineType::Deletion));
        assert!(lines.iter().all(|l| l.content.ends_with('\n')));
    }

    #[test]
    fn test_text_lines_for_added_field() {
        let change = FieldChange {
            old: None,
            new: Some("hello\n".into()),
        };
        let lines = change.text_lines().unwrap();

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line_type, DiffLineType::Addition);
        assert_eq!(lines[0].content, "hello\n");
    }

    #[test]
    fn test_text_lines_skip_non_strings() {
        let change = FieldChange {
            old: Some(Value::Int(1)),
            new: Some(Value::Int(2)),
        };
        assert!(change.text_lines().is_none());
    }
}
