//! Saved-plan persistence. Only plan documents are stored; projections are
//! always recomputed from them.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Plan;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("plan {0} not found")]
    NotFound(u64),

    #[error("plan store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plan store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("plan store lock poisoned")]
    Lock,
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Lock
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPlan {
    pub id: u64,
    #[serde(flatten)]
    pub plan: Plan,
}

pub trait PlanStore: Send + Sync {
    fn list_plans(&self) -> StoreResult<Vec<SavedPlan>>;
    fn get_plan(&self, id: u64) -> StoreResult<SavedPlan>;
    /// Inserts under a fresh id when `id` is `None`, otherwise replaces the existing plan.
    fn save_plan(&self, plan: Plan, id: Option<u64>) -> StoreResult<SavedPlan>;
    fn delete_plan(&self, id: u64) -> StoreResult<SavedPlan>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PlanTable {
    next_id: u64,
    plans: BTreeMap<u64, Plan>,
}

impl PlanTable {
    fn list(&self) -> Vec<SavedPlan> {
        self.plans
            .iter()
            .map(|(id, plan)| SavedPlan {
                id: *id,
                plan: plan.clone(),
            })
            .collect()
    }

    fn get(&self, id: u64) -> StoreResult<SavedPlan> {
        self.plans
            .get(&id)
            .map(|plan| SavedPlan {
                id,
                plan: plan.clone(),
            })
            .ok_or(StoreError::NotFound(id))
    }

    fn save(&mut self, plan: Plan, id: Option<u64>) -> StoreResult<SavedPlan> {
        let id = match id {
            Some(id) if self.plans.contains_key(&id) => id,
            Some(id) => return Err(StoreError::NotFound(id)),
            None => {
                self.next_id += 1;
                self.next_id
            }
        };
        self.plans.insert(id, plan.clone());
        Ok(SavedPlan { id, plan })
    }

    fn delete(&mut self, id: u64) -> StoreResult<SavedPlan> {
        self.plans
            .remove(&id)
            .map(|plan| SavedPlan { id, plan })
            .ok_or(StoreError::NotFound(id))
    }
}

#[derive(Debug, Default)]
pub struct MemoryPlanStore {
    table: Mutex<PlanTable>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanStore for MemoryPlanStore {
    fn list_plans(&self) -> StoreResult<Vec<SavedPlan>> {
        Ok(self.table.lock()?.list())
    }

    fn get_plan(&self, id: u64) -> StoreResult<SavedPlan> {
        self.table.lock()?.get(id)
    }

    fn save_plan(&self, plan: Plan, id: Option<u64>) -> StoreResult<SavedPlan> {
        self.table.lock()?.save(plan, id)
    }

    fn delete_plan(&self, id: u64) -> StoreResult<SavedPlan> {
        self.table.lock()?.delete(id)
    }
}

/// Plan table kept in memory and rewritten to a JSON file after every change.
#[derive(Debug)]
pub struct JsonFilePlanStore {
    path: PathBuf,
    table: Mutex<PlanTable>,
}

impl JsonFilePlanStore {
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let table = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let table: PlanTable = serde_json::from_str(&raw)?;
            info!(
                "loaded {} saved plan(s) from {}",
                table.plans.len(),
                path.display()
            );
            table
        } else {
            PlanTable::default()
        };
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    fn persist(&self, table: &PlanTable) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(table)?)?;
        debug!("wrote {} plan(s) to {}", table.plans.len(), self.path.display());
        Ok(())
    }

    /// Applies `change` to a staged copy of the table and keeps it only once
    /// the file write succeeds.
    fn commit(
        &self,
        change: impl FnOnce(&mut PlanTable) -> StoreResult<SavedPlan>,
    ) -> StoreResult<SavedPlan> {
        let mut table = self.table.lock()?;
        let mut staged = table.clone();
        let saved = change(&mut staged)?;
        self.persist(&staged)?;
        *table = staged;
        Ok(saved)
    }
}

impl PlanStore for JsonFilePlanStore {
    fn list_plans(&self) -> StoreResult<Vec<SavedPlan>> {
        Ok(self.table.lock()?.list())
    }

    fn get_plan(&self, id: u64) -> StoreResult<SavedPlan> {
        self.table.lock()?.get(id)
    }

    fn save_plan(&self, plan: Plan, id: Option<u64>) -> StoreResult<SavedPlan> {
        self.commit(|table| table.save(plan, id))
    }

    fn delete_plan(&self, id: u64) -> StoreResult<SavedPlan> {
        self.commit(|table| table.delete(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FundBucket, TaxCategory};

    fn plan(name: &str) -> Plan {
        Plan {
            name: name.to_string(),
            start_year: 2030,
            start_age: 60,
            end_age: 90,
            inflation_rate: 6.0,
            funds: vec![FundBucket {
                name: "Debt Fund".to_string(),
                allocation_amount: 4_000_000.0,
                expected_growth_rate: 7.0,
                withdrawal_rate: 5.0,
                tax_category: TaxCategory::Debt,
            }],
            rebalancing_rules: Vec::new(),
        }
    }

    fn temp_store_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "drawdown-store-{tag}-{}.json",
            std::process::id()
        ))
    }

    #[test]
    fn memory_store_assigns_ids_and_lists_in_order() {
        let store = MemoryPlanStore::new();
        let a = store.save_plan(plan("a"), None).expect("save a");
        let b = store.save_plan(plan("b"), None).expect("save b");
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);

        let names: Vec<String> = store
            .list_plans()
            .expect("list")
            .into_iter()
            .map(|p| p.plan.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn memory_store_updates_and_deletes() {
        let store = MemoryPlanStore::new();
        let saved = store.save_plan(plan("draft"), None).expect("save");
        let updated = store
            .save_plan(plan("final"), Some(saved.id))
            .expect("update");
        assert_eq!(updated.id, saved.id);
        assert_eq!(store.get_plan(saved.id).expect("get").plan.name, "final");

        let deleted = store.delete_plan(saved.id).expect("delete");
        assert_eq!(deleted.plan.name, "final");
        assert!(matches!(
            store.get_plan(saved.id),
            Err(StoreError::NotFound(id)) if id == saved.id
        ));
        assert!(matches!(
            store.delete_plan(saved.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn updating_unknown_id_is_not_found() {
        let store = MemoryPlanStore::new();
        assert!(matches!(
            store.save_plan(plan("x"), Some(42)),
            Err(StoreError::NotFound(42))
        ));
    }

    #[test]
    fn saved_plan_serializes_flat() {
        let saved = SavedPlan {
            id: 7,
            plan: plan("flat"),
        };
        let json = serde_json::to_string(&saved).expect("serialize");
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"startAge\":60"));
        let parsed: SavedPlan = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, saved);
    }

    #[test]
    fn json_file_store_keeps_memory_in_sync_when_write_fails() {
        let path = temp_store_path("unwritable");
        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir_all(&path);

        let store = JsonFilePlanStore::open(&path).expect("open");
        let kept = store.save_plan(plan("kept"), None).expect("save kept");

        // A directory in place of the file makes every write fail.
        fs::remove_file(&path).expect("remove store file");
        fs::create_dir_all(&path).expect("block store path");

        assert!(matches!(
            store.save_plan(plan("lost"), None),
            Err(StoreError::Io(_))
        ));
        assert!(matches!(
            store.delete_plan(kept.id),
            Err(StoreError::Io(_))
        ));
        let plans = store.list_plans().expect("list");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].plan.name, "kept");

        fs::remove_dir_all(&path).expect("unblock store path");
        let next = store.save_plan(plan("next"), None).expect("save next");
        assert_eq!(next.id, kept.id + 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn json_file_store_survives_reopen() {
        let path = temp_store_path("reopen");
        let _ = fs::remove_file(&path);

        {
            let store = JsonFilePlanStore::open(&path).expect("open");
            store.save_plan(plan("kept"), None).expect("save kept");
            let dropped = store.save_plan(plan("dropped"), None).expect("save dropped");
            store.delete_plan(dropped.id).expect("delete");
        }

        let reopened = JsonFilePlanStore::open(&path).expect("reopen");
        let plans = reopened.list_plans().expect("list");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].plan, plan("kept"));

        let next = reopened.save_plan(plan("next"), None).expect("save next");
        assert_eq!(next.id, 3);

        let _ = fs::remove_file(&path);
    }
}
