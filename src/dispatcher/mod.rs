//! Command dispatcher: maps key and pointer input to actions over the live
//! list of one view.
//!
//! The dispatcher never caches item references. Every event is resolved
//! against the id list the caller passes in, which is the sorted/filtered
//! list as it is right now.

pub mod activation;
pub mod focus;
pub mod keymap;
pub mod keys;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ValidationError;
use crate::models::SortField;
use crate::selection::Selection;

pub use activation::{ActivationGuard, ActivationSlot, ActiveView};
pub use focus::FocusCursor;
pub use keymap::{Binding, KeyOverride, Keymap};
pub use keys::{KeyStroke, Modifiers};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Which view a dispatcher belongs to. One binding table per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewScope {
    Triage,
    Cases,
}

impl ViewScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::Cases => "cases",
        }
    }
}

impl fmt::Display for ViewScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! actions {
    ($($variant:ident => $s:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Action {
            $(#[serde(rename = $s)] $variant,)+
        }

        impl Action {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl FromStr for Action {
            type Err = DispatchError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    _ => Err(DispatchError::UnknownAction(s.to_string())),
                }
            }
        }
    };
}

actions! {
    Next => "next",
    Previous => "previous",
    First => "first",
    Last => "last",
    Open => "open",
    ToggleSelect => "toggle_select",
    SelectAll => "select_all",
    Cancel => "cancel",
    Reload => "reload",
    Approve => "approve",
    Reject => "reject",
    StartReview => "start_review",
    MarkReviewed => "mark_reviewed",
    Escalate => "escalate",
    AssignToMe => "assign_to_me",
    PromoteToTraining => "promote_to_training",
}

impl Action {
    /// Actions that write to the store.
    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            Self::Approve
                | Self::Reject
                | Self::StartReview
                | Self::MarkReviewed
                | Self::Escalate
                | Self::AssignToMe
                | Self::PromoteToTraining
        )
    }

    pub fn moves_focus(&self) -> bool {
        matches!(self, Self::Next | Self::Previous | Self::First | Self::Last)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("'{stroke}' is already bound to {existing} in the {scope} view (attempted {attempted})")]
    BindingConflict {
        scope: ViewScope,
        stroke: String,
        existing: Action,
        attempted: Action,
    },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("The {active} view is active; cannot activate {requested}")]
    SlotBusy {
        active: ViewScope,
        requested: ViewScope,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Internal lock error")]
    LockPoisoned,
}

/// What the pointer landed on. Rows are addressed by id, not position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum PointerTarget {
    Row { id: String },
    Checkbox { id: String },
    SelectAllBox,
    SortHeader { field: SortField },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "input", rename_all = "snake_case")]
pub enum InputEvent {
    Key { stroke: KeyStroke },
    Pointer { target: PointerTarget },
}

impl InputEvent {
    pub fn key(text: &str) -> Result<Self, ValidationError> {
        Ok(Self::Key {
            stroke: KeyStroke::parse(text)?,
        })
    }

    pub fn pointer(target: PointerTarget) -> Self {
        Self::Pointer { target }
    }
}

/// Who a transition applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum Targets {
    Focused(String),
    /// Selected ids that resolve in the live list, in list order.
    Selection(Vec<String>),
}

/// Work the owning session has to carry out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Open { id: String },
    Transition { action: Action, targets: Targets },
    Sort { field: SortField },
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    Inactive,
    Unbound,
    EmptyList,
    UnknownId,
    /// A write for the focused item is still in flight.
    FocusLocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Dispatch {
    /// Focus or selection changed; nothing else to do.
    Handled,
    Command(Command),
    Ignored { reason: IgnoreReason },
}

impl Dispatch {
    fn ignored(reason: IgnoreReason) -> Self {
        Self::Ignored { reason }
    }
}

/// Live state a dispatch resolves against.
pub struct DispatchContext<'a> {
    /// Ids of the current sorted/filtered list.
    pub live: &'a [String],
    pub selection: &'a mut Selection,
    /// True when a write for this id is in flight.
    pub busy: &'a dyn Fn(&str) -> bool,
}

// ═══════════════════════════════════════════════════════════
// CommandDispatcher
// ═══════════════════════════════════════════════════════════

pub struct CommandDispatcher {
    keymap: Keymap,
    focus: FocusCursor,
    slot: Arc<ActivationSlot>,
    activation: Option<ActivationGuard>,
}

impl CommandDispatcher {
    pub fn new(keymap: Keymap, slot: Arc<ActivationSlot>) -> Self {
        Self {
            keymap,
            focus: FocusCursor::new(),
            slot,
            activation: None,
        }
    }

    pub fn scope(&self) -> ViewScope {
        self.keymap.scope()
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn focus(&self) -> FocusCursor {
        self.focus
    }

    /// Take the input slot. Idempotent for an already active dispatcher.
    pub fn activate(&mut self) -> Result<(), DispatchError> {
        if self.is_active() {
            return Ok(());
        }
        self.activation = Some(self.slot.acquire(self.scope())?);
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.activation = None;
    }

    pub fn is_active(&self) -> bool {
        self.activation.as_ref().is_some_and(ActivationGuard::is_current)
    }

    /// Id under the cursor in `live`, after clamping.
    pub fn focused_id<'a>(&mut self, live: &'a [String]) -> Option<&'a str> {
        self.focus.clamp(live.len());
        self.focus.get().and_then(|i| live.get(i)).map(String::as_str)
    }

    /// Re-fit the cursor after the list changed shape.
    pub fn sync(&mut self, live_len: usize) {
        self.focus.clamp(live_len);
    }

    pub fn dispatch(&mut self, event: &InputEvent, ctx: &mut DispatchContext<'_>) -> Dispatch {
        if !self.is_active() {
            return Dispatch::ignored(IgnoreReason::Inactive);
        }
        self.focus.clamp(ctx.live.len());

        let result = match event {
            InputEvent::Key { stroke } => match self.keymap.lookup(stroke) {
                Some(action) => self.run_action(action, ctx),
                None => Dispatch::ignored(IgnoreReason::Unbound),
            },
            InputEvent::Pointer { target } => self.run_pointer(target, ctx),
        };

        if let Dispatch::Ignored { reason } = &result {
            tracing::debug!(scope = %self.scope(), ?reason, "Input ignored");
        }
        result
    }

    fn focus_locked(&self, ctx: &DispatchContext<'_>) -> bool {
        self.focus
            .get()
            .and_then(|i| ctx.live.get(i))
            .is_some_and(|id| (ctx.busy)(id.as_str()))
    }

    fn run_action(&mut self, action: Action, ctx: &mut DispatchContext<'_>) -> Dispatch {
        let len = ctx.live.len();

        if action.moves_focus() {
            if len == 0 {
                return Dispatch::ignored(IgnoreReason::EmptyList);
            }
            if self.focus_locked(ctx) {
                return Dispatch::ignored(IgnoreReason::FocusLocked);
            }
            match action {
                Action::Next => self.focus.next(len),
                Action::Previous => self.focus.previous(len),
                Action::First => self.focus.first(len),
                _ => self.focus.last(len),
            }
            return Dispatch::Handled;
        }

        match action {
            Action::Cancel => {
                ctx.selection.clear();
                Dispatch::Handled
            }
            Action::SelectAll => {
                ctx.selection.select_all(ctx.live);
                Dispatch::Handled
            }
            Action::Reload => Dispatch::Command(Command::Reload),
            Action::ToggleSelect => match self.focus.get().and_then(|i| ctx.live.get(i)) {
                Some(id) => {
                    ctx.selection.toggle(id);
                    Dispatch::Handled
                }
                None => Dispatch::ignored(IgnoreReason::EmptyList),
            },
            Action::Open => match self.focus.get().and_then(|i| ctx.live.get(i)) {
                Some(id) => Dispatch::Command(Command::Open { id: id.clone() }),
                None => Dispatch::ignored(IgnoreReason::EmptyList),
            },
            transition => self.transition(transition, ctx),
        }
    }

    /// Selection wins when any selected id resolves; otherwise the focused item.
    fn transition(&mut self, action: Action, ctx: &mut DispatchContext<'_>) -> Dispatch {
        let selected: Vec<String> = ctx
            .selection
            .intersect_live(ctx.live)
            .into_iter()
            .map(str::to_string)
            .collect();
        if !selected.is_empty() {
            return Dispatch::Command(Command::Transition {
                action,
                targets: Targets::Selection(selected),
            });
        }

        let Some(id) = self.focus.get().and_then(|i| ctx.live.get(i)) else {
            return Dispatch::ignored(IgnoreReason::EmptyList);
        };
        if (ctx.busy)(id.as_str()) {
            return Dispatch::ignored(IgnoreReason::FocusLocked);
        }
        Dispatch::Command(Command::Transition {
            action,
            targets: Targets::Focused(id.clone()),
        })
    }

    fn run_pointer(&mut self, target: &PointerTarget, ctx: &mut DispatchContext<'_>) -> Dispatch {
        match target {
            PointerTarget::Row { id } => {
                let Some(index) = ctx.live.iter().position(|live| live == id) else {
                    return Dispatch::ignored(IgnoreReason::UnknownId);
                };
                if self.focus_locked(ctx) && self.focus.get() != Some(index) {
                    return Dispatch::ignored(IgnoreReason::FocusLocked);
                }
                self.focus.set(index, ctx.live.len());
                Dispatch::Handled
            }
            PointerTarget::Checkbox { id } => {
                if !ctx.live.iter().any(|live| live == id) {
                    return Dispatch::ignored(IgnoreReason::UnknownId);
                }
                ctx.selection.toggle(id);
                Dispatch::Handled
            }
            PointerTarget::SelectAllBox => {
                ctx.selection.select_all(ctx.live);
                Dispatch::Handled
            }
            PointerTarget::SortHeader { field } => {
                if self.focus_locked(ctx) {
                    return Dispatch::ignored(IgnoreReason::FocusLocked);
                }
                Dispatch::Command(Command::Sort { field: *field })
            }
        }
    }
}
