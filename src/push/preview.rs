use similar::{ChangeTag, TextDiff};

use crate::store::Conflict;

/// Result of asking to preview a push.
#[derive(Debug, Clone)]
pub enum Preview {
    /// Open conflicts must be resolved first; no diff was computed.
    ResolveConflicts(Vec<Conflict>),
    Ready(ChangePreview),
}

/// Line diff from live logic to shadow logic, for operator review.
#[derive(Debug, Clone)]
pub struct ChangePreview {
    pub logic_id: String,
    pub insertions: usize,
    pub deletions: usize,
    pub unified: String,
}

impl ChangePreview {
    pub fn compute(logic_id: &str, live: &str, shadow: &str) -> Self {
        let diff = TextDiff::from_lines(live, shadow);
        let mut insertions = 0;
        let mut deletions = 0;
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Insert => insertions += 1,
                ChangeTag::Delete => deletions += 1,
                ChangeTag::Equal => {}
            }
        }
        let unified = diff
            .unified_diff()
            .context_radius(3)
            .header("live", "shadow")
            .to_string();

        Self {
            logic_id: logic_id.to_string(),
            insertions,
            deletions,
            unified,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insertions == 0 && self.deletions == 0
    }

    /// Operator approval of this preview.
    pub fn confirm(self) -> ConfirmedPush {
        ConfirmedPush {
            logic_id: self.logic_id,
        }
    }
}

/// Proof that a preview was reviewed. Only [`ChangePreview::confirm`] makes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedPush {
    logic_id: String,
}

impl ConfirmedPush {
    pub fn logic_id(&self) -> &str {
        &self.logic_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_line_changes() {
        let live = "LD X0\nOUT Y0\n";
        let shadow = "LD X0\nAND X1\nOUT Y1\n";
        let preview = ChangePreview::compute("logic-1", live, shadow);
        assert_eq!(preview.insertions, 2);
        assert_eq!(preview.deletions, 1);
        assert!(preview.unified.contains("+AND X1"));
        assert!(preview.unified.contains("-OUT Y0"));
        assert!(!preview.is_empty());
    }

    #[test]
    fn test_identical_logic_is_empty() {
        let preview = ChangePreview::compute("logic-1", "LD X0\n", "LD X0\n");
        assert!(preview.is_empty());
        assert_eq!(preview.confirm().logic_id(), "logic-1");
    }
}
