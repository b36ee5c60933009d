//! In-memory view of one campaign: metadata plus the ordered work-item
//! table. All mutation goes through the engine's exclusion lock; the record
//! itself is plain data.

use super::types::{CampaignKind, CampaignMeta, CampaignStats, ItemStatus, WorkItem};

#[derive(Debug, Clone)]
pub struct CampaignRecord {
    pub meta: CampaignMeta,
    pub items: Vec<WorkItem>,
}

impl CampaignRecord {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn kind(&self) -> CampaignKind {
        self.meta.kind
    }

    /// Index of the first free item in table order.
    pub fn first_free_index(&self) -> Option<usize> {
        self.items.iter().position(|it| it.status == ItemStatus::Free)
    }

    pub fn has_free(&self) -> bool {
        self.first_free_index().is_some()
    }

    /// True while any item still needs work (free or assigned).
    pub fn has_unfinished(&self) -> bool {
        self.items
            .iter()
            .any(|it| it.status != ItemStatus::Finished)
    }

    /// Batch indices in order of first appearance in the table.
    pub fn batch_indices(&self) -> Vec<u32> {
        let mut seen = Vec::new();
        for it in &self.items {
            if let Some(b) = it.batch_idx {
                if !seen.contains(&b) {
                    seen.push(b);
                }
            }
        }
        seen
    }

    pub fn batch_items(&self, batch_idx: u32) -> Vec<&WorkItem> {
        self.items
            .iter()
            .filter(|it| it.batch_idx == Some(batch_idx))
            .collect()
    }

    pub fn finished_count(&self) -> usize {
        self.items
            .iter()
            .filter(|it| it.status == ItemStatus::Finished)
            .count()
    }

    /// Progress counts over the campaign's units of work: batches for human
    /// campaigns (a batch takes the status of its first item, since batch
    /// members move together), items otherwise. External campaigns have no
    /// assignable work and report zeroes.
    pub fn stats(&self) -> CampaignStats {
        match self.meta.kind {
            CampaignKind::External => CampaignStats::default(),
            CampaignKind::Human => {
                let mut stats = CampaignStats::default();
                for batch_idx in self.batch_indices() {
                    let status = self
                        .batch_items(batch_idx)
                        .first()
                        .map(|it| it.status)
                        .unwrap_or(ItemStatus::Free);
                    stats.total += 1;
                    match status {
                        ItemStatus::Free => stats.free += 1,
                        ItemStatus::Assigned => stats.assigned += 1,
                        ItemStatus::Finished => stats.finished += 1,
                    }
                }
                stats
            }
            CampaignKind::AutoEval | CampaignKind::AutoGen => {
                let mut stats = CampaignStats {
                    total: self.items.len(),
                    ..Default::default()
                };
                for it in &self.items {
                    match it.status {
                        ItemStatus::Free => stats.free += 1,
                        ItemStatus::Assigned => stats.assigned += 1,
                        ItemStatus::Finished => stats.finished += 1,
                    }
                }
                stats
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn human_item(batch_idx: u32, example_idx: usize) -> WorkItem {
        WorkItem {
            dataset: "gsmarena".to_string(),
            split: "test".to_string(),
            setup_id: "llama-3".to_string(),
            example_idx,
            batch_idx: Some(batch_idx),
            annotator_group: Some(0),
            status: ItemStatus::Free,
            annotator_id: String::new(),
            start: None,
            end: None,
        }
    }

    fn record(kind: CampaignKind, items: Vec<WorkItem>) -> CampaignRecord {
        CampaignRecord {
            meta: CampaignMeta::new("camp-1", kind, serde_json::json!({})),
            items,
        }
    }

    #[test]
    fn test_human_stats_count_batches_not_items() {
        let mut items = vec![
            human_item(0, 0),
            human_item(0, 1),
            human_item(1, 2),
            human_item(1, 3),
        ];
        let now = Utc::now();
        items[0].assign("a", now).unwrap();
        items[1].assign("a", now).unwrap();

        let rec = record(CampaignKind::Human, items);
        let stats = rec.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.assigned, 1);
        assert_eq!(stats.free, 1);
        assert_eq!(stats.finished, 0);
    }

    #[test]
    fn test_automated_stats_count_items() {
        let mut items: Vec<WorkItem> = (0..3)
            .map(|i| {
                let mut it = human_item(0, i);
                it.batch_idx = None;
                it.annotator_group = None;
                it
            })
            .collect();
        let now = Utc::now();
        items[0].assign("model", now).unwrap();
        items[0].finish(now).unwrap();

        let rec = record(CampaignKind::AutoEval, items);
        let stats = rec.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.free, 2);
        assert!(rec.has_unfinished());
        assert_eq!(rec.first_free_index(), Some(1));
    }

    #[test]
    fn test_external_stats_are_empty() {
        let rec = record(CampaignKind::External, vec![]);
        assert_eq!(rec.stats(), CampaignStats::default());
    }

    #[test]
    fn test_batch_indices_preserve_table_order() {
        let items = vec![human_item(2, 0), human_item(0, 1), human_item(2, 2)];
        let rec = record(CampaignKind::Human, items);
        assert_eq!(rec.batch_indices(), vec![2, 0]);
    }
}
