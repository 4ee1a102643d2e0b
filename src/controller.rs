use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{TrackerError, TrackerResult};
use crate::models::{ApplicationFields, ApplicationRecord, RecordId};
use crate::service::ApplicationService;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FormMode {
    #[default]
    Idle,
    Creating,
    Editing(RecordId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormModeKind {
    Idle,
    Creating,
    Editing,
}

impl FormMode {
    pub fn kind(&self) -> FormModeKind {
        match self {
            FormMode::Idle => FormModeKind::Idle,
            FormMode::Creating => FormModeKind::Creating,
            FormMode::Editing(_) => FormModeKind::Editing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EditForm {
    pub mode: FormMode,
    pub fields: ApplicationFields,
}

/// Answer from whatever asked the user to confirm a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Affirmed,
    Declined,
}

/// Point-in-time copy of the controller state for rendering.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControllerSnapshot {
    pub list: Vec<ApplicationRecord>,
    pub busy: bool,
    pub form: EditForm,
}

#[derive(Default)]
struct Inner {
    list: Vec<ApplicationRecord>,
    form: EditForm,
}

/// Held for the whole span of a remote operation; clears the busy flag when
/// dropped, including when the operation's future is dropped mid-request.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the cached application list and the single edit form.
///
/// Clones share state, so a UI can hand a clone to a spawned task and keep
/// rendering from the original. Remote operations are single-flight: while
/// one is in progress every other operation is rejected with
/// [`TrackerError::ConcurrentMutationRejected`]. The state lock is never held
/// across a remote call.
pub struct RecordListController<S: ApplicationService> {
    service: Arc<S>,
    inner: Arc<Mutex<Inner>>,
    busy: Arc<AtomicBool>,
    mounted: Arc<AtomicBool>,
}

impl<S: ApplicationService> Clone for RecordListController<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            inner: self.inner.clone(),
            busy: self.busy.clone(),
            mounted: self.mounted.clone(),
        }
    }
}

impl<S: ApplicationService> RecordListController<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            inner: Arc::new(Mutex::new(Inner::default())),
            busy: Arc::new(AtomicBool::new(false)),
            mounted: Arc::new(AtomicBool::new(true)),
        }
    }

    /// First load, made once by whatever owns the controller.
    pub async fn initialize(&self) -> TrackerResult<()> {
        self.mounted.store(true, Ordering::Release);
        self.load().await
    }

    /// After teardown, completions of requests still in flight are dropped
    /// without touching state.
    pub fn teardown(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        let inner = self.inner.lock().await;
        ControllerSnapshot {
            list: inner.list.clone(),
            busy: self.is_busy(),
            form: inner.form.clone(),
        }
    }

    fn acquire(&self) -> TrackerResult<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TrackerError::ConcurrentMutationRejected)?;
        Ok(BusyGuard(self.busy.clone()))
    }

    /// Form-only operations take no guard of their own. Call this with the
    /// state lock held, so a remote operation that already holds busy cannot
    /// have its form overwritten between the check and the write.
    fn ensure_not_busy(&self, _held: &Inner) -> TrackerResult<()> {
        if self.is_busy() {
            return Err(TrackerError::ConcurrentMutationRejected);
        }
        Ok(())
    }

    fn detached(&self, op: &str) -> bool {
        if self.is_mounted() {
            return false;
        }
        debug!(op, "controller torn down, discarding completion");
        true
    }

    // --- List ---

    pub async fn load(&self) -> TrackerResult<()> {
        let _guard = self.acquire()?;
        self.reload().await
    }

    /// Replace the list wholesale. Caller holds the busy guard.
    async fn reload(&self) -> TrackerResult<()> {
        debug!("loading applications");
        let result = self.service.list_applications().await;
        if self.detached("load") {
            return Ok(());
        }

        match result {
            Ok(list) => {
                info!(count = list.len(), "applications loaded");
                self.inner.lock().await.list = list;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to load applications");
                Err(e)
            }
        }
    }

    // --- Form ---

    pub async fn begin_create(&self) -> TrackerResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_not_busy(&inner)?;
        if inner.form.mode != FormMode::Idle {
            return Err(TrackerError::FormOccupied);
        }
        inner.form = EditForm {
            mode: FormMode::Creating,
            fields: ApplicationFields::default(),
        };
        Ok(())
    }

    /// Open the edit form for `id`, filled from the full record. The cached
    /// list entry is only used to check the id exists; the description is
    /// not guaranteed to be present in list responses.
    pub async fn begin_edit(&self, id: &RecordId) -> TrackerResult<()> {
        let _guard = self.acquire()?;
        {
            let inner = self.inner.lock().await;
            if inner.form.mode != FormMode::Idle {
                return Err(TrackerError::FormOccupied);
            }
            if !inner.list.iter().any(|r| &r.id == id) {
                return Err(TrackerError::NotFound(id.clone()));
            }
        }

        debug!(%id, "fetching application for edit");
        let result = self.service.get_application(id).await;
        if self.detached("begin_edit") {
            return Ok(());
        }

        let record = result.inspect_err(|e| warn!(%id, error = %e, "failed to fetch application"))?;
        self.inner.lock().await.form = EditForm {
            mode: FormMode::Editing(id.clone()),
            fields: record.to_fields(),
        };
        Ok(())
    }

    /// Replace the in-progress field values of the open form.
    pub async fn update_form(&self, fields: ApplicationFields) -> TrackerResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_not_busy(&inner)?;
        if inner.form.mode == FormMode::Idle {
            return Err(TrackerError::FormClosed);
        }
        inner.form.fields = fields;
        Ok(())
    }

    pub async fn cancel(&self) -> TrackerResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_not_busy(&inner)?;
        inner.form = EditForm::default();
        Ok(())
    }

    // --- Mutations ---

    pub async fn submit_create(&self, fields: ApplicationFields) -> TrackerResult<()> {
        let _guard = self.acquire()?;
        self.stage_fields(FormModeKind::Creating, &fields).await?;

        debug!(company = %fields.company, "creating application");
        let result = self.service.create_application(&fields).await;
        if self.detached("submit_create") {
            return Ok(());
        }

        match result {
            Ok(created) => {
                info!(id = %created.id, "application created");
                self.inner.lock().await.form = EditForm::default();
            }
            Err(e) => {
                warn!(error = %e, "failed to create application");
                return Err(e);
            }
        }
        self.reload_after_change().await
    }

    pub async fn submit_update(&self, fields: ApplicationFields) -> TrackerResult<()> {
        let _guard = self.acquire()?;
        let id = self.stage_fields(FormModeKind::Editing, &fields).await?;
        let Some(id) = id else {
            return Err(TrackerError::WrongFormMode {
                expected: FormModeKind::Editing,
            });
        };

        debug!(%id, "updating application");
        let result = self.service.update_application(&id, &fields).await;
        if self.detached("submit_update") {
            return Ok(());
        }

        match result {
            Ok(_) => {
                info!(%id, "application updated");
                self.inner.lock().await.form = EditForm::default();
            }
            Err(e) => {
                warn!(%id, error = %e, "failed to update application");
                return Err(e);
            }
        }
        self.reload_after_change().await
    }

    /// The change is already stored remotely; a failed reload must not read
    /// as a failed mutation, or a retry would apply it twice.
    async fn reload_after_change(&self) -> TrackerResult<()> {
        self.reload()
            .await
            .map_err(|e| TrackerError::ReloadFailed(Box::new(e)))
    }

    /// Check the form mode, keep the submitted values in the form so a
    /// failure never loses them, then validate. Returns the id being edited.
    async fn stage_fields(
        &self,
        expected: FormModeKind,
        fields: &ApplicationFields,
    ) -> TrackerResult<Option<RecordId>> {
        let mut inner = self.inner.lock().await;
        if inner.form.mode.kind() != expected {
            return Err(TrackerError::WrongFormMode { expected });
        }
        inner.form.fields = fields.clone();
        fields.validate().map_err(TrackerError::ValidationFailure)?;

        Ok(match &inner.form.mode {
            FormMode::Editing(id) => Some(id.clone()),
            _ => None,
        })
    }

    pub async fn delete_record(&self, id: &RecordId, confirmation: Confirmation) -> TrackerResult<()> {
        if confirmation == Confirmation::Declined {
            debug!(%id, "delete not confirmed");
            return Ok(());
        }

        let _guard = self.acquire()?;
        if self.inner.lock().await.form.mode != FormMode::Idle {
            return Err(TrackerError::FormOccupied);
        }

        debug!(%id, "deleting application");
        let result = self.service.delete_application(id).await;
        if self.detached("delete_record") {
            return Ok(());
        }

        match result {
            Ok(()) => info!(%id, "application deleted"),
            Err(e) => {
                warn!(%id, error = %e, "failed to delete application");
                return Err(e);
            }
        }
        self.reload_after_change().await
    }
}
