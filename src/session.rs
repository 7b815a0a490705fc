//! Review session: the single-threaded core of the engine.
//!
//! A session consumes `SessionEvent`s strictly in arrival order. It never
//! writes inline: every write leaves as an `Effect::Store` request, and the
//! local mirror changes only when the matching `SessionEvent::Completed`
//! brings back the entity the store confirmed. The driver owns the queue.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::bulk::{self, BulkAction, BulkFailure, BulkOutcome, BulkTracker, Subjects};
use crate::config::EngineConfig;
use crate::dispatcher::{
    Action, ActivationSlot, Command, CommandDispatcher, Dispatch, DispatchContext, DispatchError,
    FocusCursor, InputEvent, Keymap, Targets, ViewScope,
};
use crate::error::{ErrorKind, StaleStateError, ValidationError};
use crate::filter;
use crate::models::*;
use crate::review::{self, CaseDecision, ReviewError};
use crate::saved_filters::{SavedFilterError, SavedFilterStore};
use crate::selection::Selection;
use crate::sort::SortState;
use crate::store::{StoreError, StoreOp, StoreReply, StoreSnapshot};
use crate::training::{lifecycle, BatchError, TrainingReport, TrainingSignal};

pub type RequestId = u64;

/// Shown with every store failure: nothing is known about what persisted.
pub const STORE_RETRY_HINT: &str =
    "The store did not confirm this command. Reload and retry the whole command.";

// ═══════════════════════════════════════════════════════════
// Events, effects, notices
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Input(InputEvent),
    SwitchView(ViewScope),
    SetFilter(FilterSpec),
    SetCaseFilter(CaseFilter),
    SelectSort(SortField),
    SaveFilter { name: String, is_default: bool },
    ApplySavedFilter { id: String },
    DeleteSavedFilter { id: String },
    /// Run `action` over the selection of the view it applies to.
    Bulk(BulkAction),
    DecideCase { case_id: String, decision: CaseDecision },
    CreateBatch { name: String },
    AddToBatch { batch_id: String, case_ids: Vec<String> },
    AddSelectionToBatch { batch_id: String },
    RemoveFromBatch { batch_id: String, case_id: String },
    MarkBatchReady { batch_id: String },
    StartBatch { batch_id: String },
    CancelTraining { batch_id: String, reason: String },
    Training(TrainingReport),
    Completed {
        request_id: RequestId,
        result: Result<StoreReply, StoreError>,
    },
    Reload,
}

impl From<TrainingReport> for SessionEvent {
    fn from(report: TrainingReport) -> Self {
        SessionEvent::Training(report)
    }
}

/// Work the session asks its driver to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Store { request_id: RequestId, op: StoreOp },
    StartMonitor { batch: TrainingBatch },
    CancelMonitor { batch_id: String, reason: String },
    /// The batch reached a terminal state; its monitor can go.
    StopMonitor { batch_id: String },
}

/// Messages for the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotice {
    ItemFailed {
        id: String,
        attempted: String,
        failure: BulkFailure,
    },
    BulkFinished {
        action: String,
        outcome: BulkOutcome,
    },
    StoreFailed {
        attempted: String,
        message: String,
        hint: &'static str,
    },
    Rejected {
        kind: ErrorKind,
        message: String,
    },
    Reloaded {
        items: usize,
        cases: usize,
        batches: usize,
    },
    BatchStarted {
        batch_id: String,
    },
    BatchCompleted {
        batch_id: String,
        metrics: Option<BatchMetrics>,
        cases_trained: usize,
    },
    BatchFailed {
        batch_id: String,
        reason: String,
    },
}

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Stale(#[from] StaleStateError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    SavedFilter(#[from] SavedFilterError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("{entity} {id} not found")]
    UnknownEntity { entity: &'static str, id: String },

    #[error("{id} has a write in flight; the list cannot change until it confirms")]
    FocusLocked { id: String },

    #[error("Store failure during {attempted}: {message}. Retry the whole command.")]
    Store { attempted: String, message: String },
}

impl From<ReviewError> for SessionError {
    fn from(e: ReviewError) -> Self {
        match e {
            ReviewError::Stale(stale) => Self::Stale(stale),
            ReviewError::Validation(invalid) => Self::Validation(invalid),
        }
    }
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Stale(_) => ErrorKind::StaleState,
            Self::Batch(BatchError::Stale(_)) => ErrorKind::StaleState,
            Self::Batch(BatchError::UnknownCase(_)) => ErrorKind::NotFound,
            Self::Batch(_) => ErrorKind::Validation,
            Self::SavedFilter(SavedFilterError::Validation(_)) => ErrorKind::Validation,
            Self::SavedFilter(SavedFilterError::NotFound(_)) => ErrorKind::NotFound,
            Self::SavedFilter(SavedFilterError::Store(_)) => ErrorKind::Store,
            Self::Dispatch(DispatchError::Invalid(_)) => ErrorKind::Validation,
            Self::Dispatch(_) => ErrorKind::Configuration,
            Self::UnknownEntity { .. } => ErrorKind::NotFound,
            Self::FocusLocked { .. } => ErrorKind::Busy,
            Self::Store { .. } => ErrorKind::Store,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    fn from_failure(attempted: &str, failure: BulkFailure) -> Self {
        match failure {
            BulkFailure::Stale { error } => Self::Stale(error),
            BulkFailure::Invalid { error } => Self::Validation(error),
            BulkFailure::Store { message } => Self::Store {
                attempted: attempted.to_string(),
                message,
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Views
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageRow {
    pub id: String,
    pub title: String,
    pub service: String,
    pub score: u8,
    pub status: ItemStatus,
    pub priority: Priority,
    pub assignee: Option<String>,
    pub flagged_messages: usize,
    pub selected: bool,
    pub focused: bool,
    pub in_flight: bool,
}

/// Read-only snapshot of the triage list, one page around the focus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageView {
    pub active: bool,
    pub filter: FilterSpec,
    pub sort: SortState,
    pub total: usize,
    /// Index into the full live list, -1 when it is empty.
    pub focus: i64,
    pub page_start: usize,
    pub rows: Vec<TriageRow>,
    pub selected: Vec<String>,
    /// Selected ids the current filter hides.
    pub hidden_selected: usize,
    pub opened: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseRow {
    pub id: String,
    pub review_item_id: String,
    pub error_category: ErrorCategory,
    pub confidence: f32,
    pub status: CaseStatus,
    pub user_message: String,
    pub selected: bool,
    pub focused: bool,
    pub in_flight: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRow {
    pub id: String,
    pub name: String,
    pub status: BatchStatus,
    pub cases_count: usize,
    pub progress: Option<u8>,
    pub metrics: Option<BatchMetrics>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseQueueView {
    pub active: bool,
    pub filter: CaseFilter,
    pub total: usize,
    pub focus: i64,
    pub page_start: usize,
    pub rows: Vec<CaseRow>,
    pub selected: Vec<String>,
    pub hidden_selected: usize,
    pub batches: Vec<BatchRow>,
    pub opened: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct PendingRequest {
    target: Option<String>,
    attempted: String,
    bulk: Option<u64>,
}

struct Pane {
    dispatcher: CommandDispatcher,
    selection: Selection,
}

impl Pane {
    fn new(keymap: Keymap, slot: Arc<ActivationSlot>) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(keymap, slot),
            selection: Selection::new(),
        }
    }
}

pub struct ReviewSession {
    user_id: String,
    config: EngineConfig,
    scope: ViewScope,

    items: Vec<ReviewItem>,
    cases: Vec<TrainingCase>,
    batches: Vec<TrainingBatch>,
    saved_filters: SavedFilterStore,
    loaded: bool,

    triage: Pane,
    case_queue: Pane,
    filter: FilterSpec,
    sort: SortState,
    case_filter: CaseFilter,
    opened: Option<(ViewScope, String)>,

    next_request: RequestId,
    pending: BTreeMap<RequestId, PendingRequest>,
    next_bulk: u64,
    bulks: BTreeMap<u64, (ViewScope, BulkTracker)>,
    /// Latest training signal per batch, held while a write for it is in flight.
    deferred: BTreeMap<String, TrainingSignal>,

    effects: Vec<Effect>,
    notices: VecDeque<SessionNotice>,
}

impl ReviewSession {
    /// Open a session for `user_id`, take the input slot for the triage view
    /// and request the initial load.
    pub fn new(
        user_id: &str,
        config: EngineConfig,
        slot: Arc<ActivationSlot>,
    ) -> Result<Self, SessionError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ValidationError::MissingReviewer.into());
        }

        let mut triage_keys = Keymap::default_triage()?;
        triage_keys.apply_overrides(&config.keymap_overrides)?;
        let mut case_keys = Keymap::default_cases()?;
        case_keys.apply_overrides(&config.keymap_overrides)?;

        let mut session = Self {
            user_id: user_id.to_string(),
            sort: config.default_sort,
            config,
            scope: ViewScope::Triage,
            items: Vec::new(),
            cases: Vec::new(),
            batches: Vec::new(),
            saved_filters: SavedFilterStore::new(),
            loaded: false,
            triage: Pane::new(triage_keys, slot.clone()),
            case_queue: Pane::new(case_keys, slot),
            filter: FilterSpec::default(),
            case_filter: CaseFilter::default(),
            opened: None,
            next_request: 1,
            pending: BTreeMap::new(),
            next_bulk: 1,
            bulks: BTreeMap::new(),
            deferred: BTreeMap::new(),
            effects: Vec::new(),
            notices: VecDeque::new(),
        };
        session.triage.dispatcher.activate()?;
        tracing::info!(user_id = %session.user_id, "Review session opened");
        session.request(StoreOp::Reload, "reload", None);
        Ok(session)
    }

    /// Process one event. An `Err` means the command was refused and nothing
    /// was requested; the caller decides how to show it.
    pub fn handle(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        let result = match event {
            SessionEvent::Input(input) => self.on_input(&input),
            SessionEvent::SwitchView(scope) => self.switch_view(scope),
            SessionEvent::SetFilter(spec) => {
                filter::validate(&spec)?;
                self.ensure_triage_unlocked()?;
                self.filter = spec;
                Ok(())
            }
            SessionEvent::SetCaseFilter(case_filter) => {
                self.case_filter = case_filter;
                Ok(())
            }
            SessionEvent::SelectSort(field) => {
                self.ensure_triage_unlocked()?;
                self.sort.select(field);
                Ok(())
            }
            SessionEvent::SaveFilter { name, is_default } => self.save_filter(&name, is_default),
            SessionEvent::ApplySavedFilter { id } => self.apply_saved_filter(&id),
            SessionEvent::DeleteSavedFilter { id } => self.delete_saved_filter(&id),
            SessionEvent::Bulk(action) => {
                self.bulk_over_selection(&action);
                Ok(())
            }
            SessionEvent::DecideCase { case_id, decision } => self.decide_case(&case_id, &decision),
            SessionEvent::CreateBatch { name } => self.create_batch(&name),
            SessionEvent::AddToBatch { batch_id, case_ids } => self.add_to_batch(&batch_id, &case_ids),
            SessionEvent::AddSelectionToBatch { batch_id } => {
                let live = self.case_ids();
                let ids: Vec<String> = self
                    .case_queue
                    .selection
                    .intersect_live(&live)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                if ids.is_empty() {
                    Ok(())
                } else {
                    self.add_to_batch(&batch_id, &ids)
                }
            }
            SessionEvent::RemoveFromBatch { batch_id, case_id } => {
                let patch = lifecycle::remove_case(self.batch(&batch_id)?, &case_id)?;
                self.request(StoreOp::UpdateBatch { id: batch_id, patch }, "remove_case", None);
                Ok(())
            }
            SessionEvent::MarkBatchReady { batch_id } => {
                let patch = lifecycle::mark_ready(self.batch(&batch_id)?)?;
                self.request(StoreOp::UpdateBatch { id: batch_id, patch }, "mark_ready", None);
                Ok(())
            }
            SessionEvent::StartBatch { batch_id } => {
                let patch = lifecycle::start(self.batch(&batch_id)?, Utc::now())?;
                self.request(StoreOp::UpdateBatch { id: batch_id, patch }, "start", None);
                Ok(())
            }
            SessionEvent::CancelTraining { batch_id, reason } => {
                // Validates the transition; the write happens when the
                // monitor reports the failure.
                lifecycle::cancel(self.batch(&batch_id)?, &reason, Utc::now())?;
                tracing::info!(batch_id = %batch_id, %reason, "Training cancellation requested");
                self.effects.push(Effect::CancelMonitor { batch_id, reason });
                Ok(())
            }
            SessionEvent::Training(report) => self.on_training(report),
            SessionEvent::Completed { request_id, result } => {
                self.on_completed(request_id, result);
                Ok(())
            }
            SessionEvent::Reload => {
                self.request(StoreOp::Reload, "reload", None);
                Ok(())
            }
        };
        self.sync_focus();
        result
    }

    /// Queue a notice for a refused command.
    pub fn report_rejection(&mut self, err: &SessionError) {
        tracing::warn!(kind = ?err.kind(), error = %err, "Command rejected");
        self.notices.push_back(SessionNotice::Rejected {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn take_notices(&mut self) -> Vec<SessionNotice> {
        self.notices.drain(..).collect()
    }

    // --- accessors --------------------------------------------------------

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn scope(&self) -> ViewScope {
        self.scope
    }

    pub fn items(&self) -> &[ReviewItem] {
        &self.items
    }

    pub fn cases(&self) -> &[TrainingCase] {
        &self.cases
    }

    pub fn batches(&self) -> &[TrainingBatch] {
        &self.batches
    }

    pub fn saved_filters(&self) -> &[SavedFilter] {
        self.saved_filters.list()
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn sort(&self) -> SortState {
        self.sort
    }

    pub fn selection(&self, scope: ViewScope) -> &Selection {
        &self.pane(scope).selection
    }

    pub fn focus(&self, scope: ViewScope) -> FocusCursor {
        let mut focus = self.pane(scope).dispatcher.focus();
        focus.clamp(self.live_ids(scope).len());
        focus
    }

    /// True while a write for `id` is outstanding.
    pub fn is_busy(&self, id: &str) -> bool {
        self.pending
            .values()
            .any(|p| p.target.as_deref() == Some(id))
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Ids of the view's list as it is right now, in display order.
    pub fn live_ids(&self, scope: ViewScope) -> Vec<String> {
        match scope {
            ViewScope::Triage => self.triage_ids(),
            ViewScope::Cases => self.case_ids(),
        }
    }

    // --- views ------------------------------------------------------------

    pub fn triage_view(&self) -> TriageView {
        let live = self.triage_ids();
        let focus = self.focus(ViewScope::Triage);
        let (start, end) = self.page_bounds(focus.get(), live.len());
        let selection = &self.triage.selection;

        let rows = live[start..end]
            .iter()
            .enumerate()
            .filter_map(|(offset, id)| {
                let item = self.items.iter().find(|i| &i.id == id)?;
                Some(TriageRow {
                    id: item.id.clone(),
                    title: item.title.clone(),
                    service: item.service.clone(),
                    score: item.score,
                    status: item.status,
                    priority: item.priority,
                    assignee: item.assignee.clone(),
                    flagged_messages: item.flagged_messages_count(),
                    selected: selection.is_selected(id),
                    focused: focus.get() == Some(start + offset),
                    in_flight: self.is_busy(id),
                })
            })
            .collect();

        TriageView {
            active: self.triage.dispatcher.is_active(),
            filter: self.filter.clone(),
            sort: self.sort,
            total: live.len(),
            focus: focus.as_view_index(),
            page_start: start,
            rows,
            selected: selection.ids().map(str::to_string).collect(),
            hidden_selected: selection.len() - selection.intersect_live(&live).len(),
            opened: self.opened_in(ViewScope::Triage),
        }
    }

    pub fn case_queue_view(&self) -> CaseQueueView {
        let live = self.case_ids();
        let focus = self.focus(ViewScope::Cases);
        let (start, end) = self.page_bounds(focus.get(), live.len());
        let selection = &self.case_queue.selection;

        let rows = live[start..end]
            .iter()
            .enumerate()
            .filter_map(|(offset, id)| {
                let case = self.cases.iter().find(|c| &c.id == id)?;
                Some(CaseRow {
                    id: case.id.clone(),
                    review_item_id: case.review_item_id.clone(),
                    error_category: case.error_category,
                    confidence: case.confidence,
                    status: case.status,
                    user_message: case.user_message.clone(),
                    selected: selection.is_selected(id),
                    focused: focus.get() == Some(start + offset),
                    in_flight: self.is_busy(id),
                })
            })
            .collect();

        let batches = self
            .batches
            .iter()
            .map(|b| BatchRow {
                id: b.id.clone(),
                name: b.name.clone(),
                status: b.status,
                cases_count: b.cases_count(),
                progress: b.progress,
                metrics: b.metrics,
                failure_reason: b.failure_reason.clone(),
            })
            .collect();

        CaseQueueView {
            active: self.case_queue.dispatcher.is_active(),
            filter: self.case_filter.clone(),
            total: live.len(),
            focus: focus.as_view_index(),
            page_start: start,
            rows,
            selected: selection.ids().map(str::to_string).collect(),
            hidden_selected: selection.len() - selection.intersect_live(&live).len(),
            batches,
            opened: self.opened_in(ViewScope::Cases),
        }
    }

    fn page_bounds(&self, focus: Option<usize>, len: usize) -> (usize, usize) {
        let size = self.config.page_size.max(1);
        let start = (focus.unwrap_or(0) / size * size).min(len);
        (start, (start + size).min(len))
    }

    fn opened_in(&self, scope: ViewScope) -> Option<String> {
        self.opened
            .as_ref()
            .filter(|(s, _)| *s == scope)
            .map(|(_, id)| id.clone())
    }

    // --- live lists -------------------------------------------------------

    fn triage_ids(&self) -> Vec<String> {
        let spec = filter::resolve_current_user(&self.filter, &self.user_id);
        let visible = filter::apply(&self.items, &spec);
        self.sort
            .apply(&visible)
            .into_iter()
            .map(|item| item.id.clone())
            .collect()
    }

    fn case_ids(&self) -> Vec<String> {
        self.cases
            .iter()
            .filter(|c| filter::matches_case(c, &self.case_filter))
            .map(|c| c.id.clone())
            .collect()
    }

    fn pane(&self, scope: ViewScope) -> &Pane {
        match scope {
            ViewScope::Triage => &self.triage,
            ViewScope::Cases => &self.case_queue,
        }
    }

    fn pane_mut(&mut self, scope: ViewScope) -> &mut Pane {
        match scope {
            ViewScope::Triage => &mut self.triage,
            ViewScope::Cases => &mut self.case_queue,
        }
    }

    /// Reordering or refiltering the triage list would move the cursor off
    /// an item whose write is still outstanding.
    fn ensure_triage_unlocked(&self) -> Result<(), SessionError> {
        let live = self.triage_ids();
        let focused = self.focus(ViewScope::Triage).get().and_then(|i| live.get(i));
        match focused {
            Some(id) if self.is_busy(id) => Err(SessionError::FocusLocked { id: id.clone() }),
            _ => Ok(()),
        }
    }

    fn sync_focus(&mut self) {
        let triage_len = self.triage_ids().len();
        let cases_len = self.case_ids().len();
        self.triage.dispatcher.sync(triage_len);
        self.case_queue.dispatcher.sync(cases_len);
    }

    fn batch(&self, id: &str) -> Result<&TrainingBatch, SessionError> {
        self.batches
            .iter()
            .find(|b| b.id == id)
            .ok_or_else(|| SessionError::UnknownEntity {
                entity: "training_batch",
                id: id.to_string(),
            })
    }

    // --- requests ---------------------------------------------------------

    fn request(&mut self, op: StoreOp, attempted: &str, bulk: Option<u64>) -> RequestId {
        let request_id = self.next_request;
        self.next_request += 1;
        let target = op.target_id().map(str::to_string);
        tracing::debug!(
            request_id,
            op = op.kind(),
            target = target.as_deref().unwrap_or("-"),
            attempted,
            "Store request issued"
        );
        self.pending.insert(
            request_id,
            PendingRequest {
                target,
                attempted: attempted.to_string(),
                bulk,
            },
        );
        self.effects.push(Effect::Store { request_id, op });
        request_id
    }

    // --- input ------------------------------------------------------------

    fn on_input(&mut self, input: &InputEvent) -> Result<(), SessionError> {
        let scope = self.scope;
        let live = self.live_ids(scope);

        let pending = &self.pending;
        let busy = |id: &str| pending.values().any(|p| p.target.as_deref() == Some(id));
        let pane = match scope {
            ViewScope::Triage => &mut self.triage,
            ViewScope::Cases => &mut self.case_queue,
        };
        let mut ctx = DispatchContext {
            live: &live,
            selection: &mut pane.selection,
            busy: &busy,
        };
        let outcome = pane.dispatcher.dispatch(input, &mut ctx);

        match outcome {
            Dispatch::Handled | Dispatch::Ignored { .. } => Ok(()),
            Dispatch::Command(Command::Open { id }) => {
                tracing::debug!(scope = %scope, item_id = %id, "Opened");
                self.opened = Some((scope, id));
                Ok(())
            }
            Dispatch::Command(Command::Sort { field }) => {
                if scope == ViewScope::Triage {
                    self.sort.select(field);
                }
                Ok(())
            }
            Dispatch::Command(Command::Reload) => {
                self.request(StoreOp::Reload, "reload", None);
                Ok(())
            }
            Dispatch::Command(Command::Transition { action, targets }) => {
                self.run_transition(scope, action, targets)
            }
        }
    }

    fn switch_view(&mut self, scope: ViewScope) -> Result<(), SessionError> {
        if scope == self.scope {
            return Ok(());
        }
        let previous = self.scope;
        self.pane_mut(previous).dispatcher.deactivate();
        if let Err(e) = self.pane_mut(scope).dispatcher.activate() {
            if let Err(back) = self.pane_mut(previous).dispatcher.activate() {
                tracing::warn!(scope = %previous, error = %back, "Could not reactivate view");
            }
            return Err(e.into());
        }
        tracing::debug!(from = %previous, to = %scope, "View switched");
        self.scope = scope;
        self.opened = None;
        Ok(())
    }

    /// Keyboard transitions act as the session user.
    fn action_for(&self, action: Action) -> Option<BulkAction> {
        let me = self.user_id.clone();
        Some(match action {
            Action::Approve => BulkAction::Approve {
                reviewer: me,
                ratings: None,
            },
            Action::Reject => BulkAction::Reject {
                reviewer: me,
                comment: None,
            },
            Action::StartReview => BulkAction::StartReview { reviewer: me },
            Action::MarkReviewed => BulkAction::MarkReviewed { reviewer: me },
            Action::Escalate => BulkAction::Escalate,
            Action::AssignToMe => BulkAction::Assign { assignee: Some(me) },
            Action::PromoteToTraining => BulkAction::PromoteToTraining,
            _ => return None,
        })
    }

    fn run_transition(
        &mut self,
        scope: ViewScope,
        action: Action,
        targets: Targets,
    ) -> Result<(), SessionError> {
        let Some(bulk_action) = self.action_for(action) else {
            return Ok(());
        };
        let action_scope = if bulk_action.targets_cases() {
            ViewScope::Cases
        } else {
            ViewScope::Triage
        };
        if action_scope != scope {
            tracing::debug!(action = bulk_action.name(), scope = %scope, "Action not offered in this view");
            return Ok(());
        }

        match targets {
            Targets::Focused(id) => self.run_single(&bulk_action, &id),
            Targets::Selection(ids) => {
                self.run_bulk(scope, &bulk_action, &ids);
                Ok(())
            }
        }
    }

    fn subjects(&self) -> Subjects<'_> {
        Subjects {
            items: &self.items,
            cases: &self.cases,
        }
    }

    fn run_single(&mut self, action: &BulkAction, id: &str) -> Result<(), SessionError> {
        let plan = bulk::plan_bulk(action, &[id], self.subjects(), Utc::now());
        if let Some((_, failure)) = plan.rejected.into_iter().next() {
            return Err(SessionError::from_failure(plan.action, failure));
        }
        let Some((_, op)) = plan.requests.into_iter().next() else {
            return Err(SessionError::UnknownEntity {
                entity: if action.targets_cases() {
                    "training_case"
                } else {
                    "review_item"
                },
                id: id.to_string(),
            });
        };
        self.request(op, plan.action, None);
        Ok(())
    }

    fn bulk_over_selection(&mut self, action: &BulkAction) {
        let scope = if action.targets_cases() {
            ViewScope::Cases
        } else {
            ViewScope::Triage
        };
        let live = self.live_ids(scope);
        let targets: Vec<String> = self
            .pane(scope)
            .selection
            .intersect_live(&live)
            .into_iter()
            .map(str::to_string)
            .collect();
        if targets.is_empty() {
            tracing::debug!(action = action.name(), "Bulk action with nothing selected");
            return;
        }
        self.run_bulk(scope, action, &targets);
    }

    fn run_bulk(&mut self, scope: ViewScope, action: &BulkAction, targets: &[String]) {
        let plan = bulk::plan_bulk(action, targets, self.subjects(), Utc::now());
        let bulk_id = self.next_bulk;
        self.next_bulk += 1;
        tracing::debug!(
            bulk_id,
            action = plan.action,
            requests = plan.requests.len(),
            rejected = plan.rejected.len(),
            "Bulk action planned"
        );

        let tracker = BulkTracker::new(&plan);
        self.bulks.insert(bulk_id, (scope, tracker));
        for (_, op) in plan.requests {
            self.request(op, plan.action, Some(bulk_id));
        }
        self.finish_bulk_if_done(bulk_id);
    }

    fn finish_bulk_if_done(&mut self, bulk_id: u64) {
        if !self.bulks.get(&bulk_id).is_some_and(|(_, t)| t.is_done()) {
            return;
        }
        let Some((scope, tracker)) = self.bulks.remove(&bulk_id) else {
            return;
        };
        let action = tracker.action();
        let outcome = tracker.finish();
        self.pane_mut(scope).selection.remove_many(&outcome.succeeded);

        tracing::info!(
            bulk_id,
            action,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Bulk action finished"
        );
        for (id, failure) in &outcome.failed {
            self.notices.push_back(SessionNotice::ItemFailed {
                id: id.clone(),
                attempted: action.to_string(),
                failure: failure.clone(),
            });
        }
        self.notices.push_back(SessionNotice::BulkFinished {
            action: action.to_string(),
            outcome,
        });
    }

    // --- direct commands --------------------------------------------------

    fn decide_case(&mut self, case_id: &str, decision: &CaseDecision) -> Result<(), SessionError> {
        let case = self
            .cases
            .iter()
            .find(|c| c.id == case_id)
            .ok_or_else(|| SessionError::UnknownEntity {
                entity: "training_case",
                id: case_id.to_string(),
            })?;
        let patch = review::decide(case, decision, Utc::now())?;
        let attempted = match decision.decision {
            ReviewDecision::Approved => "approve",
            ReviewDecision::Rejected => "reject",
        };
        self.request(
            StoreOp::UpdateCase {
                id: case_id.to_string(),
                patch,
            },
            attempted,
            None,
        );
        Ok(())
    }

    fn save_filter(&mut self, name: &str, is_default: bool) -> Result<(), SessionError> {
        if name.trim().is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        let filter = SavedFilterStore::prepare(name, &self.filter, &self.user_id, is_default)?;
        self.request(StoreOp::CreateSavedFilter { filter }, "save_filter", None);
        Ok(())
    }

    fn apply_saved_filter(&mut self, id: &str) -> Result<(), SessionError> {
        let preset = self
            .saved_filters
            .get(id)
            .ok_or_else(|| SavedFilterError::NotFound(id.to_string()))?;
        let spec = SavedFilterStore::apply(preset);
        filter::validate(&spec)?;
        self.ensure_triage_unlocked()?;
        tracing::debug!(filter_id = %id, "Saved filter applied");
        self.filter = spec;
        Ok(())
    }

    fn delete_saved_filter(&mut self, id: &str) -> Result<(), SessionError> {
        if self.saved_filters.get(id).is_none() {
            return Err(SavedFilterError::NotFound(id.to_string()).into());
        }
        self.request(
            StoreOp::DeleteSavedFilter { id: id.to_string() },
            "delete_filter",
            None,
        );
        Ok(())
    }

    fn create_batch(&mut self, name: &str) -> Result<(), SessionError> {
        if name.trim().is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        let batch = lifecycle::new_batch(name, Utc::now());
        self.request(StoreOp::CreateBatch { batch }, "create_batch", None);
        Ok(())
    }

    fn add_to_batch(&mut self, batch_id: &str, case_ids: &[String]) -> Result<(), SessionError> {
        let patch = lifecycle::add_cases(self.batch(batch_id)?, case_ids, &self.cases, &self.batches)?;
        self.request(
            StoreOp::UpdateBatch {
                id: batch_id.to_string(),
                patch,
            },
            "add_cases",
            None,
        );
        Ok(())
    }

    // --- training reports -------------------------------------------------

    fn on_training(&mut self, report: TrainingReport) -> Result<(), SessionError> {
        let TrainingReport { batch_id, signal } = report;

        // One write per batch at a time; later reports wait for the
        // confirmation so each write sees the state the store holds.
        // The first terminal signal held is final.
        if self.is_busy(&batch_id) {
            let keep_existing = self
                .deferred
                .get(&batch_id)
                .is_some_and(|held| held.is_terminal());
            if keep_existing {
                tracing::debug!(batch_id = %batch_id, ?signal, "Report dropped behind held terminal signal");
            } else {
                tracing::debug!(batch_id = %batch_id, ?signal, "Training report deferred");
                self.deferred.insert(batch_id, signal);
            }
            return Ok(());
        }

        let batch = self.batch(&batch_id)?;
        if batch.status != BatchStatus::Training {
            tracing::debug!(batch_id = %batch_id, status = %batch.status, "Late training report ignored");
            return Ok(());
        }

        let now = Utc::now();
        let (op, attempted) = match signal {
            TrainingSignal::Progress { percent } => {
                match lifecycle::advance(batch, percent, None, now) {
                    Ok(Some(op)) => (op, "advance"),
                    Ok(None) => return Ok(()),
                    Err(BatchError::MissingMetrics(_)) => {
                        tracing::debug!(batch_id = %batch_id, "At 100%, waiting for metrics");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            TrainingSignal::Completed { metrics } => {
                (lifecycle::complete(batch, metrics, now)?, "complete")
            }
            TrainingSignal::Failed { reason } => {
                let patch = lifecycle::fail(batch, &reason, now)?;
                (StoreOp::UpdateBatch { id: batch_id.clone(), patch }, "fail")
            }
        };
        self.request(op, attempted, None);
        Ok(())
    }

    fn replay_deferred(&mut self, target: &str) {
        if self.is_busy(target) {
            return;
        }
        let Some(signal) = self.deferred.remove(target) else {
            return;
        };
        let report = TrainingReport {
            batch_id: target.to_string(),
            signal,
        };
        if let Err(e) = self.on_training(report) {
            self.report_rejection(&e);
        }
    }

    // --- completions ------------------------------------------------------

    fn on_completed(&mut self, request_id: RequestId, result: Result<StoreReply, StoreError>) {
        let Some(pending) = self.pending.remove(&request_id) else {
            tracing::warn!(request_id, "Completion for unknown request");
            return;
        };

        let outcome = match result {
            Ok(reply) => {
                tracing::debug!(request_id, attempted = %pending.attempted, "Store confirmed");
                self.apply_reply(reply);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    request_id,
                    attempted = %pending.attempted,
                    target = pending.target.as_deref().unwrap_or("-"),
                    error = %e,
                    "Store refused request"
                );
                Err(e)
            }
        };

        match (pending.bulk, outcome) {
            (Some(bulk_id), outcome) => {
                if let (Some((_, tracker)), Some(target)) =
                    (self.bulks.get_mut(&bulk_id), pending.target.as_deref())
                {
                    tracker.record(target, outcome.map_err(BulkFailure::from));
                }
                self.finish_bulk_if_done(bulk_id);
            }
            (None, Err(e)) => self.report_store_error(&pending, e),
            (None, Ok(())) => {}
        }

        if let Some(target) = &pending.target {
            self.replay_deferred(target);
        }
    }

    fn report_store_error(&mut self, pending: &PendingRequest, e: StoreError) {
        let notice = match e {
            StoreError::Conflict(error) => SessionNotice::ItemFailed {
                id: error.id.clone(),
                attempted: pending.attempted.clone(),
                failure: BulkFailure::Stale { error },
            },
            other => SessionNotice::StoreFailed {
                attempted: pending.attempted.clone(),
                message: other.to_string(),
                hint: STORE_RETRY_HINT,
            },
        };
        self.notices.push_back(notice);
    }

    fn apply_reply(&mut self, reply: StoreReply) {
        match reply {
            StoreReply::Snapshot(snapshot) => self.install_snapshot(*snapshot),
            StoreReply::Item(item) => upsert(&mut self.items, item, |i| &i.id),
            StoreReply::Case(case) => upsert(&mut self.cases, case, |c| &c.id),
            StoreReply::SavedFilterCreated(saved) => self.saved_filters.insert_confirmed(saved),
            StoreReply::SavedFilterDeleted(id) => self.saved_filters.remove_confirmed(&id),
            StoreReply::BatchCreated(batch) | StoreReply::Batch(batch) => self.confirm_batch(batch),
            StoreReply::BatchCompleted { batch, cases } => {
                for case in cases {
                    upsert(&mut self.cases, case, |c| &c.id);
                }
                self.confirm_batch(batch);
            }
        }
    }

    fn install_snapshot(&mut self, snapshot: StoreSnapshot) {
        let StoreSnapshot {
            items,
            cases,
            batches,
            saved_filters,
        } = snapshot;
        self.notices.push_back(SessionNotice::Reloaded {
            items: items.len(),
            cases: cases.len(),
            batches: batches.len(),
        });
        tracing::info!(
            items = items.len(),
            cases = cases.len(),
            batches = batches.len(),
            "Session data loaded"
        );

        self.items = items;
        self.cases = cases;
        self.batches = batches;
        self.saved_filters = SavedFilterStore::from_filters(saved_filters);

        if !self.loaded {
            self.loaded = true;
            if self.filter.is_identity() {
                if let Some(preset) = self.saved_filters.default_for(&self.user_id) {
                    let spec = SavedFilterStore::apply(preset);
                    if filter::validate(&spec).is_ok() {
                        tracing::debug!(filter_id = %preset.id, "Default filter applied");
                        self.filter = spec;
                    }
                }
            }
        }
    }

    fn confirm_batch(&mut self, batch: TrainingBatch) {
        let previous = self
            .batches
            .iter()
            .find(|b| b.id == batch.id)
            .map(|b| b.status);

        if previous != Some(batch.status) {
            match batch.status {
                BatchStatus::Training => {
                    tracing::info!(batch_id = %batch.id, cases = batch.cases_count(), "Batch training started");
                    self.notices.push_back(SessionNotice::BatchStarted {
                        batch_id: batch.id.clone(),
                    });
                    self.effects.push(Effect::StartMonitor {
                        batch: batch.clone(),
                    });
                }
                BatchStatus::Completed => {
                    tracing::info!(batch_id = %batch.id, metrics = ?batch.metrics, "Batch completed");
                    self.notices.push_back(SessionNotice::BatchCompleted {
                        batch_id: batch.id.clone(),
                        metrics: batch.metrics,
                        cases_trained: batch.cases_count(),
                    });
                    self.effects.push(Effect::StopMonitor {
                        batch_id: batch.id.clone(),
                    });
                }
                BatchStatus::Failed => {
                    let reason = batch.failure_reason.clone().unwrap_or_default();
                    tracing::info!(batch_id = %batch.id, %reason, "Batch failed");
                    self.notices.push_back(SessionNotice::BatchFailed {
                        batch_id: batch.id.clone(),
                        reason,
                    });
                    self.effects.push(Effect::StopMonitor {
                        batch_id: batch.id.clone(),
                    });
                }
                BatchStatus::Draft | BatchStatus::Ready => {}
            }
        }
        upsert(&mut self.batches, batch, |b| &b.id);
    }
}

fn upsert<T>(list: &mut Vec<T>, entity: T, id: impl Fn(&T) -> &str) {
    let key = id(&entity).to_string();
    match list.iter().position(|e| id(e) == key) {
        Some(index) => list[index] = entity,
        None => list.push(entity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::drive_blocking;
    use crate::store::{InMemoryItemStore, ItemStore};
    use crate::testing::{base_time, fixture_items, training_case};

    fn key(text: &str) -> SessionEvent {
        SessionEvent::Input(InputEvent::key(text).unwrap())
    }

    fn open(store: &InMemoryItemStore) -> ReviewSession {
        open_with(store, EngineConfig::default())
    }

    fn open_with(store: &InMemoryItemStore, config: EngineConfig) -> ReviewSession {
        let mut session = ReviewSession::new("rev-1", config, ActivationSlot::new()).unwrap();
        drive_blocking(&mut session, store);
        session.take_notices();
        session
    }

    fn case_store(statuses: &[(&str, CaseStatus)]) -> InMemoryItemStore {
        let cases = statuses
            .iter()
            .map(|(id, status)| training_case(id, *status))
            .collect();
        InMemoryItemStore::with_data(fixture_items(), cases, vec![])
    }

    fn case_status(session: &ReviewSession, id: &str) -> CaseStatus {
        session.cases().iter().find(|c| c.id == id).unwrap().status
    }

    #[test]
    fn first_load_applies_the_users_default_filter() {
        let store = InMemoryItemStore::with_data(fixture_items(), vec![], vec![]);
        let preset = SavedFilter {
            id: "f-1".into(),
            name: "Urgent".into(),
            spec: FilterSpec::default().with_priorities([Priority::Critical]),
            created_by: "rev-1".into(),
            is_default: true,
            created_at: base_time(),
        };
        store.create_saved_filter(&preset).unwrap();

        let mut session = ReviewSession::new("rev-1", EngineConfig::default(), ActivationSlot::new()).unwrap();
        assert!(session.items().is_empty());
        assert_eq!(session.in_flight(), 1);

        drive_blocking(&mut session, &store);
        assert_eq!(session.items().len(), 12);
        assert_eq!(session.filter(), &preset.spec);
        assert_eq!(session.triage_view().total, 4);
        assert!(matches!(
            session.take_notices().as_slice(),
            [SessionNotice::Reloaded { items: 12, .. }]
        ));
    }

    #[test]
    fn approve_waits_for_store_confirmation() {
        let store = case_store(&[("c-1", CaseStatus::Pending), ("c-2", CaseStatus::Pending)]);
        let mut session = open(&store);
        session.handle(SessionEvent::SwitchView(ViewScope::Cases)).unwrap();

        session.handle(key("a")).unwrap();
        assert_eq!(case_status(&session, "c-1"), CaseStatus::Pending);
        assert!(session.is_busy("c-1"));

        // Focus is locked while the focused item's write is outstanding.
        session.handle(key("j")).unwrap();
        assert_eq!(session.focus(ViewScope::Cases).get(), Some(0));

        drive_blocking(&mut session, &store);
        assert_eq!(case_status(&session, "c-1"), CaseStatus::Approved);
        assert!(!session.is_busy("c-1"));
        let case = session.cases().iter().find(|c| c.id == "c-1").unwrap();
        assert_eq!(case.reviewers.last().unwrap().reviewer_id, "rev-1");

        session.handle(key("j")).unwrap();
        assert_eq!(session.focus(ViewScope::Cases).get(), Some(1));
    }

    fn focused_triage_id(session: &ReviewSession) -> String {
        let index = session.focus(ViewScope::Triage).get().unwrap();
        session.live_ids(ViewScope::Triage)[index].clone()
    }

    #[test]
    fn list_cannot_reorder_under_an_outstanding_write() {
        let store = InMemoryItemStore::with_data(fixture_items(), vec![], vec![]);
        let mut session = open(&store);
        assert_eq!(focused_triage_id(&session), "conv-12");

        session.handle(key("m")).unwrap();
        assert!(session.is_busy("conv-12"));

        let err = session
            .handle(SessionEvent::SelectSort(SortField::Service))
            .unwrap_err();
        assert!(matches!(&err, SessionError::FocusLocked { id } if id == "conv-12"));
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert!(err.is_retryable());
        assert_eq!(session.sort().field, SortField::CreatedAt);

        let err = session
            .handle(SessionEvent::SetFilter(FilterSpec::default().with_search("conv-0")))
            .unwrap_err();
        assert!(matches!(err, SessionError::FocusLocked { .. }));
        assert!(session.filter().is_identity());

        session.handle(key("j")).unwrap();
        assert_eq!(focused_triage_id(&session), "conv-12");

        drive_blocking(&mut session, &store);
        session
            .handle(SessionEvent::SelectSort(SortField::Service))
            .unwrap();
        assert_eq!(session.sort().field, SortField::Service);
    }

    #[test]
    fn blank_user_cannot_open_a_session() {
        let err = ReviewSession::new("  ", EngineConfig::default(), ActivationSlot::new())
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Validation(ValidationError::MissingReviewer)));
    }

    #[test]
    fn bulk_approve_keeps_only_the_stale_case_selected() {
        let store = case_store(&[
            ("c-1", CaseStatus::Pending),
            ("c-2", CaseStatus::Approved),
            ("c-3", CaseStatus::Pending),
        ]);
        let mut session = open(&store);
        session.handle(SessionEvent::SwitchView(ViewScope::Cases)).unwrap();
        session.handle(key("ctrl+a")).unwrap();
        assert_eq!(session.selection(ViewScope::Cases).len(), 3);

        session
            .handle(SessionEvent::Bulk(BulkAction::Approve {
                reviewer: "rev-1".into(),
                ratings: None,
            }))
            .unwrap();
        drive_blocking(&mut session, &store);

        let selected: Vec<&str> = session.selection(ViewScope::Cases).ids().collect();
        assert_eq!(selected, vec!["c-2"]);

        let notices = session.take_notices();
        let outcome = notices
            .iter()
            .find_map(|n| match n {
                SessionNotice::BulkFinished { outcome, .. } => Some(outcome),
                _ => None,
            })
            .unwrap();
        assert_eq!(outcome.succeeded, vec!["c-1".to_string(), "c-3".to_string()]);
        assert_eq!(outcome.failed_ids(), vec!["c-2"]);
        assert!(outcome.failed[0].1.is_stale());
        assert!(notices.iter().any(|n| matches!(
            n,
            SessionNotice::ItemFailed { id, attempted, .. } if id == "c-2" && attempted == "approve"
        )));
    }

    #[test]
    fn concurrent_reviewer_write_surfaces_as_stale() {
        let store = case_store(&[("c-1", CaseStatus::Pending)]);
        let mut session = open(&store);
        session.handle(SessionEvent::SwitchView(ViewScope::Cases)).unwrap();

        store.put_case(training_case("c-1", CaseStatus::Rejected)).unwrap();
        session.handle(key("a")).unwrap();
        drive_blocking(&mut session, &store);

        // Not mirrored until a reload brings the other reviewer's write in.
        assert_eq!(case_status(&session, "c-1"), CaseStatus::Pending);
        let notices = session.take_notices();
        assert!(matches!(
            notices.as_slice(),
            [SessionNotice::ItemFailed { id, failure: BulkFailure::Stale { error }, .. }]
                if id == "c-1" && error.attempted == "approve"
        ));

        session.handle(key("f5")).unwrap();
        drive_blocking(&mut session, &store);
        assert_eq!(case_status(&session, "c-1"), CaseStatus::Rejected);
    }

    #[test]
    fn store_outage_asks_for_whole_command_retry() {
        let store = case_store(&[("c-1", CaseStatus::Pending)]);
        let mut session = open(&store);
        session.handle(SessionEvent::SwitchView(ViewScope::Cases)).unwrap();

        store.set_unavailable(true);
        session.handle(key("a")).unwrap();
        drive_blocking(&mut session, &store);

        assert_eq!(case_status(&session, "c-1"), CaseStatus::Pending);
        let notices = session.take_notices();
        assert!(matches!(
            notices.as_slice(),
            [SessionNotice::StoreFailed { attempted, hint, .. }]
                if attempted == "approve" && *hint == STORE_RETRY_HINT
        ));
    }

    #[test]
    fn keyboard_approve_of_decided_case_is_refused_up_front() {
        let store = case_store(&[("c-1", CaseStatus::Approved)]);
        let mut session = open(&store);
        session.handle(SessionEvent::SwitchView(ViewScope::Cases)).unwrap();

        let err = session.handle(key("a")).unwrap_err();
        assert!(matches!(&err, SessionError::Stale(stale) if stale.id == "c-1"));
        assert!(err.is_retryable());
        assert_eq!(session.in_flight(), 0);
    }

    #[test]
    fn assign_to_me_and_current_user_filter() {
        let store = InMemoryItemStore::with_data(fixture_items(), vec![], vec![]);
        let mut session = open(&store);
        session
            .handle(SessionEvent::SelectSort(SortField::CreatedAt))
            .unwrap();
        // CreatedAt is already the default field, so the direction flipped.
        assert_eq!(session.sort().direction, SortDirection::Ascending);

        session.handle(key("m")).unwrap();
        drive_blocking(&mut session, &store);

        session
            .handle(SessionEvent::SetFilter(
                FilterSpec::default().with_assignee(Some(AssigneeSelector::CurrentUser)),
            ))
            .unwrap();
        let view = session.triage_view();
        assert_eq!(view.total, 1);
        assert_eq!(view.rows[0].id, "conv-01");
        assert_eq!(view.rows[0].assignee.as_deref(), Some("rev-1"));
    }

    #[test]
    fn unbound_key_requests_nothing() {
        let store = InMemoryItemStore::with_data(fixture_items(), vec![], vec![]);
        let mut session = open(&store);
        // "a" approves in the case queue only.
        session.handle(key("a")).unwrap();
        assert_eq!(session.in_flight(), 0);
        assert!(session.take_effects().is_empty());
    }

    #[test]
    fn invalid_filter_is_rejected_and_kept_out() {
        let store = InMemoryItemStore::with_data(fixture_items(), vec![], vec![]);
        let mut session = open(&store);
        let err = session
            .handle(SessionEvent::SetFilter(FilterSpec::default().with_score_range(60, 10)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(session.filter().is_identity());

        session.report_rejection(&err);
        assert!(matches!(
            session.take_notices().as_slice(),
            [SessionNotice::Rejected { kind: ErrorKind::Validation, .. }]
        ));
    }

    #[test]
    fn saved_filter_round_trip_through_store() {
        let store = InMemoryItemStore::with_data(fixture_items(), vec![], vec![]);
        let mut session = open(&store);
        let urgent = FilterSpec::default()
            .with_statuses([ItemStatus::Pending])
            .with_score_range(0, 50)
            .with_priorities([Priority::Critical, Priority::High]);
        session.handle(SessionEvent::SetFilter(urgent.clone())).unwrap();
        session
            .handle(SessionEvent::SaveFilter {
                name: "Urgent".into(),
                is_default: false,
            })
            .unwrap();
        assert!(session.saved_filters().is_empty());
        drive_blocking(&mut session, &store);
        assert_eq!(session.saved_filters().len(), 1);

        let id = session.saved_filters()[0].id.clone();
        session.handle(SessionEvent::SetFilter(FilterSpec::default())).unwrap();
        session
            .handle(SessionEvent::ApplySavedFilter { id: id.clone() })
            .unwrap();
        assert_eq!(session.filter(), &urgent);
        let ids: Vec<String> = session.triage_view().rows.into_iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"conv-03".to_string()));
        assert!(ids.contains(&"conv-09".to_string()));

        session.handle(SessionEvent::DeleteSavedFilter { id }).unwrap();
        drive_blocking(&mut session, &store);
        assert!(session.saved_filters().is_empty());
        assert!(store.list_saved_filters().unwrap().is_empty());
    }

    #[test]
    fn empty_view_reports_focus_minus_one() {
        let store = InMemoryItemStore::with_data(fixture_items(), vec![], vec![]);
        let mut session = open(&store);
        session
            .handle(SessionEvent::SetFilter(FilterSpec::default().with_search("no such text")))
            .unwrap();
        let view = session.triage_view();
        assert_eq!(view.total, 0);
        assert_eq!(view.focus, -1);
        assert!(view.rows.is_empty());
    }

    #[test]
    fn view_pages_around_focus() {
        let store = InMemoryItemStore::with_data(fixture_items(), vec![], vec![]);
        let config = EngineConfig {
            page_size: 5,
            ..EngineConfig::default()
        };
        let mut session = open_with(&store, config);
        session.handle(key("G")).unwrap();
        let view = session.triage_view();
        assert_eq!(view.focus, 11);
        assert_eq!(view.page_start, 10);
        assert_eq!(view.rows.len(), 2);
        assert!(view.rows[1].focused);
    }

    #[test]
    fn hidden_selection_survives_filter_change() {
        let store = InMemoryItemStore::with_data(fixture_items(), vec![], vec![]);
        let mut session = open(&store);
        session
            .handle(SessionEvent::Input(InputEvent::pointer(
                crate::dispatcher::PointerTarget::Checkbox { id: "conv-01".into() },
            )))
            .unwrap();
        session
            .handle(SessionEvent::SetFilter(
                FilterSpec::default().with_services(["sales"]),
            ))
            .unwrap();
        session.handle(key("ctrl+a")).unwrap();

        let view = session.triage_view();
        assert_eq!(view.hidden_selected, 1);
        assert!(view.selected.contains(&"conv-01".to_string()));
        assert_eq!(view.selected.len(), 4);
    }

    fn batch_session() -> (InMemoryItemStore, ReviewSession, String) {
        let store = case_store(&[("c-1", CaseStatus::Approved), ("c-2", CaseStatus::Approved)]);
        let mut session = open(&store);
        session
            .handle(SessionEvent::CreateBatch { name: "March".into() })
            .unwrap();
        drive_blocking(&mut session, &store);
        let batch_id = session.batches()[0].id.clone();

        session
            .handle(SessionEvent::AddToBatch {
                batch_id: batch_id.clone(),
                case_ids: vec!["c-1".into(), "c-2".into()],
            })
            .unwrap();
        drive_blocking(&mut session, &store);
        session
            .handle(SessionEvent::MarkBatchReady { batch_id: batch_id.clone() })
            .unwrap();
        drive_blocking(&mut session, &store);
        session
            .handle(SessionEvent::StartBatch { batch_id: batch_id.clone() })
            .unwrap();
        let effects = drive_blocking(&mut session, &store);
        assert!(matches!(effects.as_slice(), [Effect::StartMonitor { batch }] if batch.id == batch_id));
        session.take_notices();
        (store, session, batch_id)
    }

    fn report(batch_id: &str, signal: TrainingSignal) -> SessionEvent {
        SessionEvent::Training(TrainingReport {
            batch_id: batch_id.to_string(),
            signal,
        })
    }

    #[test]
    fn batch_completion_trains_every_case() {
        let (store, mut session, batch_id) = batch_session();
        session
            .handle(report(&batch_id, TrainingSignal::Progress { percent: 40 }))
            .unwrap();
        drive_blocking(&mut session, &store);
        assert_eq!(session.batches()[0].progress, Some(40));

        let metrics = BatchMetrics { accuracy: 0.93, improvement: 0.05 };
        session
            .handle(report(&batch_id, TrainingSignal::Completed { metrics }))
            .unwrap();
        let effects = drive_blocking(&mut session, &store);

        let batch = &session.batches()[0];
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.metrics, Some(metrics));
        assert!(session.cases().iter().all(|c| c.status == CaseStatus::Trained));
        assert!(effects.contains(&Effect::StopMonitor { batch_id: batch_id.clone() }));
        assert!(session.take_notices().iter().any(|n| matches!(
            n,
            SessionNotice::BatchCompleted { cases_trained: 2, .. }
        )));
    }

    #[test]
    fn progress_arriving_mid_write_is_replayed() {
        let (store, mut session, batch_id) = batch_session();
        session
            .handle(report(&batch_id, TrainingSignal::Progress { percent: 30 }))
            .unwrap();
        session
            .handle(report(&batch_id, TrainingSignal::Progress { percent: 60 }))
            .unwrap();
        assert_eq!(session.in_flight(), 1);

        drive_blocking(&mut session, &store);
        assert_eq!(session.batches()[0].progress, Some(60));
        assert_eq!(session.in_flight(), 0);
    }

    #[test]
    fn first_held_terminal_signal_wins() {
        let (store, mut session, batch_id) = batch_session();
        session
            .handle(report(&batch_id, TrainingSignal::Progress { percent: 30 }))
            .unwrap();
        let metrics = BatchMetrics { accuracy: 0.91, improvement: 0.04 };
        session
            .handle(report(&batch_id, TrainingSignal::Completed { metrics }))
            .unwrap();
        let reason = lifecycle::cancellation_reason("too late");
        session
            .handle(report(&batch_id, TrainingSignal::Failed { reason }))
            .unwrap();

        drive_blocking(&mut session, &store);
        let batch = &session.batches()[0];
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.metrics, Some(metrics));
        assert!(batch.failure_reason.is_none());
        assert!(session.cases().iter().all(|c| c.status == CaseStatus::Trained));
    }

    #[test]
    fn cancel_fails_batch_and_keeps_cases_approved() {
        let (store, mut session, batch_id) = batch_session();
        session
            .handle(SessionEvent::CancelTraining {
                batch_id: batch_id.clone(),
                reason: "wrong base model".into(),
            })
            .unwrap();
        assert_eq!(
            session.take_effects(),
            vec![Effect::CancelMonitor {
                batch_id: batch_id.clone(),
                reason: "wrong base model".into(),
            }]
        );

        let reason = lifecycle::cancellation_reason("wrong base model");
        session
            .handle(report(&batch_id, TrainingSignal::Failed { reason }))
            .unwrap();
        drive_blocking(&mut session, &store);

        let batch = &session.batches()[0];
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.progress, None);
        assert_eq!(batch.failure_reason.as_deref(), Some("cancelled: wrong base model"));
        assert!(session.cases().iter().all(|c| c.status == CaseStatus::Approved));
    }

    #[test]
    fn regressing_progress_is_an_error() {
        let (store, mut session, batch_id) = batch_session();
        session
            .handle(report(&batch_id, TrainingSignal::Progress { percent: 50 }))
            .unwrap();
        drive_blocking(&mut session, &store);
        let err = session
            .handle(report(&batch_id, TrainingSignal::Progress { percent: 20 }))
            .unwrap_err();
        assert!(matches!(err, SessionError::Batch(BatchError::ProgressRegressed { .. })));
        assert_eq!(session.batches()[0].progress, Some(50));
    }

    #[test]
    fn empty_batch_cannot_be_marked_ready() {
        let store = case_store(&[]);
        let mut session = open(&store);
        session
            .handle(SessionEvent::CreateBatch { name: "Empty".into() })
            .unwrap();
        drive_blocking(&mut session, &store);
        let batch_id = session.batches()[0].id.clone();
        let err = session
            .handle(SessionEvent::MarkBatchReady { batch_id })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn second_session_on_one_slot_is_refused() {
        let slot = ActivationSlot::new();
        let _first = ReviewSession::new("rev-1", EngineConfig::default(), slot.clone()).unwrap();
        let err = ReviewSession::new("rev-2", EngineConfig::default(), slot)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
