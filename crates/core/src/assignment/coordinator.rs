//! Assignment and overview logic over a loaded campaign record.
//!
//! Everything here is pure table manipulation; callers (the engine) hold
//! the exclusion lock and persist the record afterwards, so a decision
//! read and its resulting write always share one critical section.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::campaign::{CampaignError, CampaignKind, CampaignRecord, ItemStatus};

use super::types::{
    AssignedBatch, AssignmentError, BatchSummary, ExampleRef, ItemSummary, ServiceIdentity,
};

/// First batch in table order whose items are all free and whose group
/// constraint admits the requester. Deterministic: no randomization, so
/// assignment order is reproducible across restarts.
pub fn eligible_batch(record: &CampaignRecord, identity: &ServiceIdentity) -> Option<u32> {
    record.batch_indices().into_iter().find(|&batch_idx| {
        let items = record.batch_items(batch_idx);
        let all_free = items.iter().all(|it| it.status == ItemStatus::Free);
        let group_ok = items.iter().all(|it| match it.annotator_group {
            None => true,
            Some(group) => identity.annotator_group == Some(group),
        });
        all_free && group_ok
    })
}

/// Marks every item of the batch assigned to `annotator_id`.
pub fn assign_batch(
    record: &mut CampaignRecord,
    batch_idx: u32,
    annotator_id: &str,
    now: DateTime<Utc>,
) -> Result<AssignedBatch, CampaignError> {
    let mut examples = Vec::new();
    for it in record.items.iter_mut() {
        if it.batch_idx == Some(batch_idx) {
            it.assign(annotator_id, now)?;
            examples.push(ExampleRef::from(&*it));
        }
    }
    Ok(AssignedBatch {
        campaign_id: record.id().to_string(),
        batch_idx,
        annotator_id: annotator_id.to_string(),
        examples,
    })
}

/// Checks that the batch is currently assigned to exactly this annotator.
/// An unknown batch counts as a mismatch: it is a stale or replayed
/// submission either way.
pub fn verify_batch_owner(
    record: &CampaignRecord,
    batch_idx: u32,
    annotator_id: &str,
) -> Result<(), AssignmentError> {
    let items = record.batch_items(batch_idx);
    let owned = !items.is_empty()
        && items
            .iter()
            .all(|it| it.status == ItemStatus::Assigned && it.annotator_id == annotator_id);
    if owned {
        Ok(())
    } else {
        Err(AssignmentError::Mismatch {
            batch_idx,
            annotator_id: annotator_id.to_string(),
        })
    }
}

/// Transitions every item of the batch to finished. Returns how many items
/// were finished.
pub fn finish_batch(
    record: &mut CampaignRecord,
    batch_idx: u32,
    now: DateTime<Utc>,
) -> Result<usize, CampaignError> {
    let mut finished = 0;
    for it in record.items.iter_mut() {
        if it.batch_idx == Some(batch_idx) {
            it.finish(now)?;
            finished += 1;
        }
    }
    Ok(finished)
}

/// Releases every item matching `pred` back to free. Items already free
/// are left alone. Returns how many items were released.
pub fn release_items<F>(record: &mut CampaignRecord, pred: F) -> usize
where
    F: Fn(&crate::campaign::WorkItem) -> bool,
{
    let mut released = 0;
    for it in record.items.iter_mut() {
        if it.status != ItemStatus::Free && pred(it) {
            // Release from assigned or finished always succeeds.
            let _ = it.release();
            released += 1;
        }
    }
    released
}

/// Per-batch overview of a human campaign: first-item metadata, example
/// count and the per-example identity list.
pub fn human_overview(record: &CampaignRecord) -> Vec<BatchSummary> {
    record
        .batch_indices()
        .into_iter()
        .filter_map(|batch_idx| {
            let items = record.batch_items(batch_idx);
            let first = items.first()?;
            Some(BatchSummary {
                batch_idx,
                dataset: first.dataset.clone(),
                split: first.split.clone(),
                setup_id: first.setup_id.clone(),
                example_cnt: items.len(),
                status: first.status,
                annotator_id: first.annotator_id.clone(),
                annotator_group: first.annotator_group,
                start: first.start,
                end: first.end,
                example_details: items.iter().map(|it| ExampleRef::from(*it)).collect(),
            })
        })
        .collect()
}

/// Per-item overview of an automated campaign with finished outputs joined
/// in by identity key. Generation campaigns match without the setup id,
/// since their outputs are the setup. Items without a matching output get
/// `None`; missing output files never fail the view.
pub fn item_overview(record: &CampaignRecord, outputs: &[Value]) -> Vec<ItemSummary> {
    let with_setup = record.kind() != CampaignKind::AutoGen;
    let index: HashMap<(String, String, String, u64), &Value> = outputs
        .iter()
        .filter_map(|doc| Some((output_key(doc, with_setup)?, doc)))
        .collect();

    record
        .items
        .iter()
        .map(|it| {
            let key = (
                it.dataset.clone(),
                it.split.clone(),
                if with_setup {
                    it.setup_id.clone()
                } else {
                    String::new()
                },
                it.example_idx as u64,
            );
            ItemSummary {
                item: it.clone(),
                output: index.get(&key).map(|doc| (*doc).clone()),
            }
        })
        .collect()
}

fn output_key(doc: &Value, with_setup: bool) -> Option<(String, String, String, u64)> {
    Some((
        doc.get("dataset")?.as_str()?.to_string(),
        doc.get("split")?.as_str()?.to_string(),
        if with_setup {
            doc.get("setup_id")?.as_str()?.to_string()
        } else {
            String::new()
        },
        doc.get("example_idx")?.as_u64()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{CampaignMeta, WorkItem};
    use serde_json::json;

    fn item(batch_idx: u32, example_idx: usize, group: Option<u32>) -> WorkItem {
        WorkItem {
            dataset: "openweather".to_string(),
            split: "dev".to_string(),
            setup_id: "mistral-7b".to_string(),
            example_idx,
            batch_idx: Some(batch_idx),
            annotator_group: group,
            status: ItemStatus::Free,
            annotator_id: String::new(),
            start: None,
            end: None,
        }
    }

    fn human_record(items: Vec<WorkItem>) -> CampaignRecord {
        CampaignRecord {
            meta: CampaignMeta::new("crowd-1", CampaignKind::Human, json!({})),
            items,
        }
    }

    fn identity(id: &str) -> ServiceIdentity {
        ServiceIdentity {
            annotator_id: id.to_string(),
            annotator_group: None,
        }
    }

    #[test]
    fn test_eligible_batch_takes_first_fully_free() {
        let mut record = human_record(vec![
            item(0, 0, None),
            item(0, 1, None),
            item(1, 2, None),
            item(1, 3, None),
        ]);
        assert_eq!(eligible_batch(&record, &identity("a")), Some(0));

        assign_batch(&mut record, 0, "a", Utc::now()).unwrap();
        assert_eq!(eligible_batch(&record, &identity("b")), Some(1));

        assign_batch(&mut record, 1, "b", Utc::now()).unwrap();
        assert_eq!(eligible_batch(&record, &identity("c")), None);
    }

    #[test]
    fn test_eligible_batch_honors_group_constraint() {
        let record = human_record(vec![item(0, 0, Some(1)), item(1, 1, Some(2))]);

        let ungrouped = identity("a");
        assert_eq!(eligible_batch(&record, &ungrouped), None);

        let grouped = ServiceIdentity {
            annotator_id: "a".to_string(),
            annotator_group: Some(2),
        };
        assert_eq!(eligible_batch(&record, &grouped), Some(1));
    }

    #[test]
    fn test_verify_batch_owner() {
        let mut record = human_record(vec![item(0, 0, None), item(0, 1, None)]);
        assign_batch(&mut record, 0, "a", Utc::now()).unwrap();

        assert!(verify_batch_owner(&record, 0, "a").is_ok());
        assert!(matches!(
            verify_batch_owner(&record, 0, "b"),
            Err(AssignmentError::Mismatch { .. })
        ));
        // Unknown batch is a mismatch too.
        assert!(matches!(
            verify_batch_owner(&record, 9, "a"),
            Err(AssignmentError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_finish_and_release_batch() {
        let mut record = human_record(vec![item(0, 0, None), item(0, 1, None)]);
        let now = Utc::now();
        assign_batch(&mut record, 0, "a", now).unwrap();
        assert_eq!(finish_batch(&mut record, 0, now).unwrap(), 2);
        assert!(record.items.iter().all(|it| it.status == ItemStatus::Finished));

        let released = release_items(&mut record, |it| it.batch_idx == Some(0));
        assert_eq!(released, 2);
        assert!(record.items.iter().all(|it| it.status == ItemStatus::Free));
        assert!(record.items.iter().all(|it| it.end.is_none()));
    }

    #[test]
    fn test_human_overview_groups_by_batch() {
        let mut record = human_record(vec![
            item(0, 0, None),
            item(0, 1, None),
            item(1, 2, None),
        ]);
        assign_batch(&mut record, 0, "a", Utc::now()).unwrap();

        let overview = human_overview(&record);
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].example_cnt, 2);
        assert_eq!(overview[0].status, ItemStatus::Assigned);
        assert_eq!(overview[0].annotator_id, "a");
        assert_eq!(overview[0].example_details.len(), 2);
        assert_eq!(overview[1].status, ItemStatus::Free);
    }

    #[test]
    fn test_item_overview_joins_outputs_by_key() {
        let mut items: Vec<WorkItem> = (0..2)
            .map(|i| {
                let mut it = item(0, i, None);
                it.batch_idx = None;
                it
            })
            .collect();
        let now = Utc::now();
        items[0].assign("model", now).unwrap();
        items[0].finish(now).unwrap();

        let record = CampaignRecord {
            meta: CampaignMeta::new("eval-1", CampaignKind::AutoEval, json!({})),
            items,
        };

        let outputs = vec![json!({
            "dataset": "openweather",
            "split": "dev",
            "setup_id": "mistral-7b",
            "example_idx": 0,
            "payload": {"annotations": [{"type": 1}]},
        })];

        let overview = item_overview(&record, &outputs);
        assert_eq!(overview.len(), 2);
        assert_eq!(
            overview[0].output.as_ref().unwrap()["payload"]["annotations"][0]["type"],
            1
        );
        assert!(overview[1].output.is_none());
    }

    #[test]
    fn test_item_overview_generation_matches_without_setup() {
        let mut it = item(0, 0, None);
        it.batch_idx = None;
        let record = CampaignRecord {
            meta: CampaignMeta::new("gen-1", CampaignKind::AutoGen, json!({})),
            items: vec![it],
        };

        // The output carries a different setup_id; generation campaigns
        // still match on (dataset, split, example_idx).
        let outputs = vec![json!({
            "dataset": "openweather",
            "split": "dev",
            "setup_id": "other",
            "example_idx": 0,
            "payload": {"out": "cloudy"},
        })];

        let overview = item_overview(&record, &outputs);
        assert!(overview[0].output.is_some());
    }
}
