use party_shared::ConnectionId;
use std::collections::VecDeque;

/// Host-side hook that may rewrite a chat line or veto it by returning `None`
///
/// The second argument is the sending client, `None` for the host itself.
pub type ChatFilter = Box<dyn FnMut(&str, Option<ConnectionId>) -> Option<String> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    /// Display name, `None` for lines without a sender
    pub sender: Option<String>,
    pub message: String,
}

/// Most recent chat lines, oldest first
#[derive(Debug)]
pub struct ChatHistory {
    lines: VecDeque<ChatLine>,
    capacity: usize,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: ChatLine) {
        if self.capacity == 0 {
            return;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> ChatLine {
        ChatLine {
            sender: Some("Ann".to_string()),
            message: text.to_string(),
        }
    }

    #[test]
    fn test_history_drops_oldest() {
        let mut history = ChatHistory::new(2);
        history.push(line("one"));
        history.push(line("two"));
        history.push(line("three"));

        let kept: Vec<_> = history.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(kept, vec!["two", "three"]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = ChatHistory::new(0);
        history.push(line("one"));
        assert!(history.is_empty());
    }
}
