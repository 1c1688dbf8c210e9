use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Normalize a conversation into the shape chat endpoints expect:
/// blank messages dropped, system messages coalesced into one leading
/// message, the dialogue opening with a user turn, and consecutive
/// same-role messages joined so the roles alternate.
pub fn normalize(messages: Vec<Message>) -> Vec<Message> {
    let (system, dialogue): (Vec<Message>, Vec<Message>) = messages
        .into_iter()
        .filter(|message| !message.content.trim().is_empty())
        .partition(|message| message.role == Role::System);

    let mut out = Vec::new();
    if !system.is_empty() {
        let content = system
            .iter()
            .map(|message| message.content.trim())
            .collect::<Vec<_>>()
            .join("\n\n");
        out.push(Message::system(content));
    }

    let mut seen_user = false;
    for message in dialogue {
        if !seen_user {
            if message.role == Role::Assistant {
                // the dialogue opens with the user
                continue;
            }
            seen_user = true;
        }
        match out.last_mut() {
            Some(last) if last.role == message.role => {
                last.content.push_str("\n\n");
                last.content.push_str(message.content.trim());
            }
            _ => out.push(Message {
                role: message.role,
                content: message.content.trim().to_string(),
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let message = Message::user("hi");
        let raw = serde_json::to_value(&message).unwrap();
        assert_eq!(raw["role"], "user");
    }

    #[test]
    fn system_messages_coalesce_and_lead() {
        let normalized = normalize(vec![
            Message::user("question"),
            Message::system("be brief"),
            Message::system("be kind"),
        ]);
        assert_eq!(normalized[0].role, Role::System);
        assert_eq!(normalized[0].content, "be brief\n\nbe kind");
        assert_eq!(normalized[1], Message::user("question"));
    }

    #[test]
    fn consecutive_same_role_messages_are_joined() {
        let normalized = normalize(vec![
            Message::user("part one"),
            Message::user("part two"),
            Message::assistant("answer"),
        ]);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].content, "part one\n\npart two");
    }

    #[test]
    fn leading_assistant_turns_and_blanks_are_dropped() {
        let normalized = normalize(vec![
            Message::assistant("stray greeting"),
            Message::user("   "),
            Message::user("real question"),
        ]);
        assert_eq!(normalized, vec![Message::user("real question")]);
    }
}
