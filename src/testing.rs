//! In-memory stand-in for the remote service, shared by the controller and
//! dashboard tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::error::{TrackerError, TrackerResult};
use crate::models::{
    ApplicationFields, ApplicationRecord, ApplicationStatus, DescriptionSection, RecordId,
    StatsSnapshot,
};
use crate::service::ApplicationService;

#[derive(Default)]
struct FakeState {
    records: Vec<ApplicationRecord>,
    next_id: i64,
    stats: StatsSnapshot,
    calls: HashMap<&'static str, usize>,
    failing: HashMap<&'static str, TrackerError>,
}

/// Clones share one backing store, so a test can keep a handle after moving
/// the service into a controller.
#[derive(Clone, Default)]
pub struct FakeService {
    state: Arc<Mutex<FakeState>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeService {
    pub fn new() -> Self {
        let service = Self::default();
        service.state.lock().unwrap().next_id = 1;
        service
    }

    pub fn with_records(records: Vec<ApplicationRecord>) -> Self {
        let service = Self::new();
        {
            let mut state = service.state.lock().unwrap();
            state.next_id = records.len() as i64 + 1;
            state.records = records;
        }
        service
    }

    /// Every call waits for a permit on the returned semaphore before it
    /// completes, letting a test observe the in-flight state.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn set_stats(&self, stats: StatsSnapshot) {
        self.state.lock().unwrap().stats = stats;
    }

    pub fn fail(&self, op: &'static str, err: TrackerError) {
        self.state.lock().unwrap().failing.insert(op, err);
    }

    pub fn heal(&self, op: &'static str) {
        self.state.lock().unwrap().failing.remove(op);
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.state.lock().unwrap().calls.get(op).copied().unwrap_or(0)
    }

    pub fn records(&self) -> Vec<ApplicationRecord> {
        self.state.lock().unwrap().records.clone()
    }

    async fn enter(&self, op: &'static str) -> TrackerResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(op).or_insert(0) += 1;
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        match self.state.lock().unwrap().failing.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub fn record(id: i64, company: &str, title: &str) -> ApplicationRecord {
    ApplicationRecord {
        id: RecordId::from(id),
        company: Some(company.to_string()),
        job_title: Some(title.to_string()),
        job_description: None,
        status: ApplicationStatus::Applied,
        stage_notes: None,
        apply_description: vec![DescriptionSection {
            text: Some(format!("{} at {}", title, company)),
        }],
    }
}

pub fn fields(company: &str, title: &str) -> ApplicationFields {
    ApplicationFields {
        company: company.to_string(),
        job_title: title.to_string(),
        ..Default::default()
    }
}

fn to_record(id: RecordId, fields: &ApplicationFields) -> ApplicationRecord {
    ApplicationRecord {
        id,
        company: Some(fields.company.clone()),
        job_title: Some(fields.job_title.clone()),
        job_description: None,
        status: fields.status.clone(),
        stage_notes: Some(fields.stage_notes.clone()),
        apply_description: vec![DescriptionSection {
            text: Some(fields.job_description.clone()),
        }],
    }
}

#[async_trait]
impl ApplicationService for FakeService {
    async fn stats(&self) -> TrackerResult<StatsSnapshot> {
        self.enter("stats").await?;
        Ok(self.state.lock().unwrap().stats)
    }

    async fn list_applications(&self) -> TrackerResult<Vec<ApplicationRecord>> {
        self.enter("list").await?;
        // the list endpoint does not carry the multi-part description
        let records = self.state.lock().unwrap().records.clone();
        Ok(records
            .into_iter()
            .map(|mut r| {
                r.apply_description.clear();
                r
            })
            .collect())
    }

    async fn get_application(&self, id: &RecordId) -> TrackerResult<ApplicationRecord> {
        self.enter("get").await?;
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(id.clone()))
    }

    async fn create_application(&self, fields: &ApplicationFields) -> TrackerResult<ApplicationRecord> {
        self.enter("create").await?;
        let mut state = self.state.lock().unwrap();
        let id = RecordId::from(state.next_id);
        state.next_id += 1;
        let created = to_record(id, fields);
        state.records.push(created.clone());
        Ok(created)
    }

    async fn update_application(
        &self,
        id: &RecordId,
        fields: &ApplicationFields,
    ) -> TrackerResult<ApplicationRecord> {
        self.enter("update").await?;
        let mut state = self.state.lock().unwrap();
        let slot = state
            .records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| TrackerError::NotFound(id.clone()))?;
        *slot = to_record(id.clone(), fields);
        Ok(slot.clone())
    }

    async fn delete_application(&self, id: &RecordId) -> TrackerResult<()> {
        self.enter("delete").await?;
        let mut state = self.state.lock().unwrap();
        let before = state.records.len();
        state.records.retain(|r| &r.id != id);
        if state.records.len() == before {
            return Err(TrackerError::NotFound(id.clone()));
        }
        Ok(())
    }
}
