use std::collections::HashMap;

use crate::session::RunRecord;

/// Run records keyed by test identifier, in first-seen order.
///
/// Recording an identifier again replaces its link but keeps its position.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    records: Vec<RunRecord>,
    index: HashMap<String, usize>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: RunRecord) {
        match self.index.get(&record.test_identifier) {
            Some(&slot) => self.records[slot] = record,
            None => {
                self.index
                    .insert(record.test_identifier.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn all(&self) -> &[RunRecord] {
        &self.records
    }

    pub fn get(&self, test_identifier: &str) -> Option<&RunRecord> {
        self.index
            .get(test_identifier)
            .map(|&slot| &self.records[slot])
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
