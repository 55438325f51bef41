use crate::models::{EntityKind, EntityRef, VersionId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Edit,
    Delete,
    Trash,
    Untrash,
    Spam,
    Unspam,
    Approve,
    Unapprove,
    Publish,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Trash => "trash",
            Action::Untrash => "untrash",
            Action::Spam => "spam",
            Action::Unspam => "unspam",
            Action::Approve => "approve",
            Action::Unapprove => "unapprove",
            Action::Publish => "publish",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            Action::Create => "Created",
            Action::Edit => "Edited",
            Action::Delete => "Deleted",
            Action::Trash => "Trashed",
            Action::Untrash => "Restored",
            Action::Spam => "Marked as spam",
            Action::Unspam => "Unmarked as spam",
            Action::Approve => "Approved",
            Action::Unapprove => "Unapproved",
            Action::Publish => "Published",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EntityKind {
    /// Closed set of actions a change to this kind can be classified as.
    pub fn actions(&self) -> &'static [Action] {
        const BASIC: &[Action] = &[Action::Create, Action::Edit, Action::Delete];
        match self {
            EntityKind::Post => &[
                Action::Create,
                Action::Edit,
                Action::Delete,
                Action::Trash,
                Action::Untrash,
                Action::Publish,
            ],
            EntityKind::Comment => &[
                Action::Create,
                Action::Edit,
                Action::Delete,
                Action::Trash,
                Action::Untrash,
                Action::Spam,
                Action::Unspam,
                Action::Approve,
                Action::Unapprove,
            ],
            EntityKind::Option | EntityKind::User | EntityKind::Term => BASIC,
        }
    }

    pub fn supports(&self, action: Action) -> bool {
        self.actions().contains(&action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaField {
    pub name: String,
    pub value: String,
}

/// Semantic summary of one entity change. One per commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescription {
    pub kind: EntityKind,
    pub action: Action,
    pub subject: VersionId,
    pub metadata: Vec<MetaField>,
}

impl ChangeDescription {
    pub fn new(kind: EntityKind, action: Action, subject: VersionId) -> Self {
        Self {
            kind,
            action,
            subject,
            metadata: Vec::new(),
        }
    }

    pub fn with_meta(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push(MetaField {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn meta(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.value.as_str())
    }

    pub fn subject_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.subject.clone())
    }

    pub fn summary(&self) -> String {
        let verb = self.action.past_tense();
        match self.kind {
            EntityKind::Comment => format!(
                "{} comment by {} on \"{}\"",
                verb,
                self.meta("author").unwrap_or("unknown author"),
                self.meta("post").unwrap_or("unknown post"),
            ),
            EntityKind::Post => format!(
                "{} {} \"{}\"",
                verb,
                self.meta("type").unwrap_or("post"),
                self.meta("title").unwrap_or(self.subject.as_str()),
            ),
            EntityKind::Option => format!(
                "{} option \"{}\"",
                verb,
                self.meta("name").unwrap_or(self.subject.as_str())
            ),
            EntityKind::User => format!(
                "{} user \"{}\"",
                verb,
                self.meta("login").unwrap_or(self.subject.as_str())
            ),
            EntityKind::Term => format!(
                "{} {} \"{}\"",
                verb,
                self.meta("taxonomy").unwrap_or("term"),
                self.meta("name").unwrap_or(self.subject.as_str())
            ),
        }
    }
}

/// What a commit records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommitMessage {
    Entity(ChangeDescription),
    Undo { reverted: Vec<String> },
    Rollback { target: String },
    Activate { entities: usize },
}

impl CommitMessage {
    pub fn summary(&self) -> String {
        match self {
            CommitMessage::Entity(description) => description.summary(),
            CommitMessage::Undo { reverted } if reverted.len() == 1 => {
                format!("Reverted change {}", short_hash(&reverted[0]))
            }
            CommitMessage::Undo { reverted } => format!("Reverted {} changes", reverted.len()),
            CommitMessage::Rollback { target } => {
                format!("Rolled back to {}", short_hash(target))
            }
            CommitMessage::Activate { entities } => {
                format!("Started tracking {} entities", entities)
            }
        }
    }

    /// Machine-readable trailer in the form `kind/action/subject`.
    pub fn action_tag(&self) -> String {
        match self {
            CommitMessage::Entity(d) => format!("{}/{}/{}", d.kind, d.action, d.subject),
            CommitMessage::Undo { reverted } => format!("entrev/undo/{}", reverted.join(",")),
            CommitMessage::Rollback { target } => format!("entrev/rollback/{}", target),
            CommitMessage::Activate { .. } => "entrev/activate".to_string(),
        }
    }
}

impl fmt::Display for CommitMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\nVP-Action: {}", self.summary(), self.action_tag())
    }
}

pub fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_summary() {
        let description =
            ChangeDescription::new(EntityKind::Comment, Action::Trash, VersionId::generate())
                .with_meta("author", "Jane")
                .with_meta("post", "Hello world");

        assert_eq!(description.summary(), "Trashed comment by Jane on \"Hello world\"");
    }

    #[test]
    fn test_action_sets_are_closed() {
        assert!(EntityKind::Comment.supports(Action::Spam));
        assert!(!EntityKind::Option.supports(Action::Trash));
        assert!(!EntityKind::Post.supports(Action::Approve));
        for kind in EntityKind::ALL {
            assert!(kind.supports(Action::Create));
            assert!(kind.supports(Action::Edit));
            assert!(kind.supports(Action::Delete));
        }
    }

    #[test]
    fn test_message_serialization() {
        let message = CommitMessage::Rollback {
            target: "abcdef0123456789".to_string(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"rollback\""));
        assert_eq!(serde_json::from_str::<CommitMessage>(&json).unwrap(), message);
        assert_eq!(message.summary(), "Rolled back to abcdef01");
    }

    #[test]
    fn test_display_includes_action_trailer() {
        let id = VersionId::parse("blogname").unwrap();
        let message = CommitMessage::Entity(
            ChangeDescription::new(EntityKind::Option, Action::Edit, id)
                .with_meta("name", "blogname"),
        );
        let text = message.to_string();
        assert!(text.starts_with("Edited option \"blogname\""));
        assert!(text.ends_with("VP-Action: option/edit/blogname"));
    }
}
