//! Turns an action hint and a diff into a [`ChangeDescription`].
//!
//! Each entity kind maps to one [`Classifier`] variant holding only that
//! kind's rule. Classification is a pure function of `(old, new, hint)`
//! apart from cosmetic metadata resolved through the live store, and a
//! failed lookup there degrades to a placeholder instead of an error.

use crate::change::{Action, ChangeDescription};
use crate::diff::Diff;
use crate::live::LiveStore;
use crate::models::{Entity, EntityKind, Value, VersionId};
use tracing::warn;

pub const UNKNOWN_POST: &str = "(unknown post)";

const TRASH: &str = "trash";
const SPAM: &str = "spam";
const PUBLISH: &str = "publish";
const UNPUBLISHED: &[&str] = &["draft", "pending", "auto-draft", "future"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    Post,
    Comment,
    Option,
    User,
    Term,
}

impl EntityKind {
    pub fn classifier(&self) -> Classifier {
        match self {
            EntityKind::Post => Classifier::Post,
            EntityKind::Comment => Classifier::Comment,
            EntityKind::Option => Classifier::Option,
            EntityKind::User => Classifier::User,
            EntityKind::Term => Classifier::Term,
        }
    }
}

impl Classifier {
    /// Classifies a transition between two snapshots of one entity. At
    /// least one side must be present.
    pub fn classify(
        &self,
        old: Option<&Entity>,
        new: Option<&Entity>,
        hint: Action,
        live: &dyn LiveStore,
    ) -> Option<ChangeDescription> {
        let subject = new.or(old)?;
        let diff = Diff::between(old, new)?;

        let action = if hint == Action::Edit {
            self.refine_edit(&diff)
        } else {
            hint
        };

        let description = ChangeDescription::new(subject.kind, action, subject.vp_id.clone());
        Some(self.describe(description, subject, live))
    }

    fn refine_edit(&self, diff: &Diff) -> Action {
        match self {
            Classifier::Post => match status_change(diff, "post_status") {
                Some((_, Some(TRASH))) => Action::Trash,
                Some((Some(TRASH), _)) => Action::Untrash,
                Some((Some(old), Some(PUBLISH))) if UNPUBLISHED.contains(&old) => Action::Publish,
                _ => Action::Edit,
            },
            Classifier::Comment => match status_change(diff, "comment_approved") {
                Some((_, Some(TRASH))) => Action::Trash,
                Some((Some(TRASH), _)) => Action::Untrash,
                Some((_, Some(SPAM))) => Action::Spam,
                Some((Some(SPAM), _)) => Action::Unspam,
                Some((Some("0"), Some("1"))) => Action::Approve,
                Some((Some("1"), Some("0"))) => Action::Unapprove,
                _ => Action::Edit,
            },
            Classifier::Option | Classifier::User | Classifier::Term => Action::Edit,
        }
    }

    fn describe(
        &self,
        description: ChangeDescription,
        entity: &Entity,
        live: &dyn LiveStore,
    ) -> ChangeDescription {
        match self {
            Classifier::Post => description
                .with_meta("title", text(entity, "post_title"))
                .with_meta("type", entity.get_str("post_type").unwrap_or("post")),
            Classifier::Comment => description
                .with_meta("author", text(entity, "comment_author"))
                .with_meta("post", parent_post_title(entity, live)),
            Classifier::Option => description.with_meta(
                "name",
                entity
                    .get_str("option_name")
                    .unwrap_or(entity.vp_id.as_str()),
            ),
            Classifier::User => description.with_meta("login", text(entity, "user_login")),
            Classifier::Term => description
                .with_meta("name", text(entity, "name"))
                .with_meta("taxonomy", entity.get_str("taxonomy").unwrap_or("term")),
        }
    }
}

/// The string values on either side of a changed status field.
fn status_change<'a>(diff: &'a Diff, field: &str) -> Option<(Option<&'a str>, Option<&'a str>)> {
    let change = diff.change(field)?;
    Some((
        change.old.as_ref().and_then(Value::as_str),
        change.new.as_ref().and_then(Value::as_str),
    ))
}

fn text(entity: &Entity, field: &str) -> String {
    entity.get(field).map(Value::display).unwrap_or_default()
}

/// Resolves the title of the post a comment belongs to. The comment refers
/// to its post by version identity, which has to be mapped to a live id
/// before the live record can be read.
fn parent_post_title(comment: &Entity, live: &dyn LiveStore) -> String {
    let Some(post_vp_id) = comment.get_str("vp_comment_post_ID") else {
        return UNKNOWN_POST.to_string();
    };

    let lookup = VersionId::parse(post_vp_id).and_then(|id| {
        let Some(live_id) = live.map_version_id_to_live_id(EntityKind::Post, &id)? else {
            return Ok(None);
        };
        Ok(live
            .get_record(EntityKind::Post, live_id)?
            .and_then(|fields| fields.get("post_title").map(Value::display)))
    });

    match lookup {
        Ok(Some(title)) => title,
        Ok(None) => UNKNOWN_POST.to_string(),
        Err(e) => {
            warn!("Post title lookup for comment {} failed: {}", comment.vp_id, e);
            UNKNOWN_POST.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::MemoryLiveStore;
    use crate::models::Fields;

    fn comment(status: &str, post: &VersionId) -> Entity {
        Entity::new(EntityKind::Comment, VersionId::parse("C0FFEE").unwrap())
            .with_field("comment_author", "Jane")
            .with_field("comment_approved", status)
            .with_field("comment_content", "Nice post")
            .with_field("vp_comment_post_ID", post.as_str())
    }

    fn live_with_post(post: &VersionId, title: &str) -> MemoryLiveStore {
        let live = MemoryLiveStore::new();
        let mut fields = Fields::new();
        fields.insert("post_title".to_string(), Value::from(title));
        live.insert_record(EntityKind::Post, post, &fields).unwrap();
        live
    }

    fn classify_comment(old: &str, new: &str) -> Action {
        let post = VersionId::generate();
        let live = MemoryLiveStore::new();
        Classifier::Comment
            .classify(
                Some(&comment(old, &post)),
                Some(&comment(new, &post)),
                Action::Edit,
                &live,
            )
            .unwrap()
            .action
    }

    #[test]
    fn test_comment_trash_is_not_an_edit() {
        assert_eq!(classify_comment("1", "trash"), Action::Trash);
    }

    #[test]
    fn test_comment_status_transitions() {
        assert_eq!(classify_comment("trash", "1"), Action::Untrash);
        assert_eq!(classify_comment("1", "spam"), Action::Spam);
        assert_eq!(classify_comment("spam", "0"), Action::Unspam);
        assert_eq!(classify_comment("0", "1"), Action::Approve);
        assert_eq!(classify_comment("1", "0"), Action::Unapprove);
    }

    #[test]
    fn test_comment_plain_edit() {
        let post = VersionId::generate();
        let live = MemoryLiveStore::new();
        let old = comment("1", &post);
        let new = comment("1", &post).with_field("comment_content", "Edited");

        let description = Classifier::Comment
            .classify(Some(&old), Some(&new), Action::Edit, &live)
            .unwrap();
        assert_eq!(description.action, Action::Edit);
    }

    #[test]
    fn test_create_hint_passes_through() {
        let post = VersionId::generate();
        let live = MemoryLiveStore::new();
        let description = Classifier::Comment
            .classify(None, Some(&comment("trash", &post)), Action::Create, &live)
            .unwrap();
        assert_eq!(description.action, Action::Create);
    }

    #[test]
    fn test_comment_metadata_resolves_post_title() {
        let post = VersionId::generate();
        let live = live_with_post(&post, "Hello world");
        let description = Classifier::Comment
            .classify(None, Some(&comment("1", &post)), Action::Create, &live)
            .unwrap();

        assert_eq!(description.meta("author"), Some("Jane"));
        assert_eq!(description.meta("post"), Some("Hello world"));
    }

    #[test]
    fn test_comment_metadata_degrades_without_mapping() {
        let post = VersionId::generate();
        let live = MemoryLiveStore::new();
        let description = Classifier::Comment
            .classify(None, Some(&comment("1", &post)), Action::Create, &live)
            .unwrap();

        assert_eq!(description.meta("post"), Some(UNKNOWN_POST));
    }

    #[test]
    fn test_delete_uses_old_snapshot_for_metadata() {
        let post = VersionId::generate();
        let live = live_with_post(&post, "Hello world");
        let old = comment("1", &post);

        let description = Classifier::Comment
            .classify(Some(&old), None, Action::Delete, &live)
            .unwrap();
        assert_eq!(description.action, Action::Delete);
        assert_eq!(description.meta("author"), Some("Jane"));
    }

    #[test]
    fn test_post_transitions() {
        let live = MemoryLiveStore::new();
        let id = VersionId::generate();
        let post = |status: &str| {
            Entity::new(EntityKind::Post, id.clone())
                .with_field("post_title", "Hello")
                .with_field("post_status", status)
        };

        let classify = |old: &str, new: &str| {
            Classifier::Post
                .classify(Some(&post(old)), Some(&post(new)), Action::Edit, &live)
                .unwrap()
                .action
        };

        assert_eq!(classify("publish", "trash"), Action::Trash);
        assert_eq!(classify("trash", "draft"), Action::Untrash);
        assert_eq!(classify("draft", "publish"), Action::Publish);
        assert_eq!(classify("publish", "private"), Action::Edit);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let post = VersionId::generate();
        let live = live_with_post(&post, "Hello world");
        let old = comment("1", &post);
        let new = comment("trash", &post);

        let first = Classifier::Comment.classify(Some(&old), Some(&new), Action::Edit, &live);
        let second = Classifier::Comment.classify(Some(&old), Some(&new), Action::Edit, &live);
        assert_eq!(first, second);
    }

    #[test]
    fn test_option_metadata_falls_back_to_identity() {
        let live = MemoryLiveStore::new();
        let option = Entity::new(EntityKind::Option, VersionId::parse("blogname").unwrap())
            .with_field("option_value", "My blog");
        let description = Classifier::Option
            .classify(None, Some(&option), Action::Create, &live)
            .unwrap();
        assert_eq!(description.meta("name"), Some("blogname"));
    }
}
