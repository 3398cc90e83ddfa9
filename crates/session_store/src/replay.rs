use std::collections::HashSet;

use crate::error::TranscriptError;
use crate::schema::TranscriptEntry;
use crate::store::TranscriptStore;

impl TranscriptStore {
    /// Replays the entry chain ending at `target_leaf` (or the current leaf
    /// when `None`), returning entries in root-to-leaf order.
    ///
    /// Entries outside the chosen chain (siblings left behind by forks) are
    /// not replayed. An empty transcript replays to an empty list.
    pub fn replay_leaf(
        &self,
        target_leaf: Option<&str>,
    ) -> Result<Vec<TranscriptEntry>, TranscriptError> {
        let leaf_id = match target_leaf.or(self.current_leaf_id()) {
            Some(leaf_id) => leaf_id.to_owned(),
            None => return Ok(Vec::new()),
        };

        if !self.contains_entry(&leaf_id) {
            return Err(TranscriptError::UnknownLeafId {
                path: self.path().to_path_buf(),
                leaf_id,
            });
        }

        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = Some(leaf_id.clone());

        while let Some(current_id) = cursor {
            if !visited.insert(current_id.clone()) {
                return Err(TranscriptError::ReplayCycle {
                    path: self.path().to_path_buf(),
                    leaf_id,
                });
            }

            let index = self.index_by_id[&current_id];
            let entry = &self.entries[index];
            chain.push(entry.clone());
            cursor = entry.parent_id.clone();
        }

        chain.reverse();
        Ok(chain)
    }
}
