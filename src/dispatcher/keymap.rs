//! Per-view binding tables.

use serde::{Deserialize, Serialize};

use super::keys::{KeyStroke, Modifiers};
use super::{Action, DispatchError, ViewScope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub stroke: KeyStroke,
    pub action: Action,
    pub description: String,
}

/// A user rebinding from the engine config, e.g. `{"keys": "ctrl+j", "action": "next"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOverride {
    pub keys: String,
    pub action: Action,
    /// Limit the override to one view. Absent: every view that binds `action`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ViewScope>,
}

/// Bindings for one activation scope. A stroke maps to at most one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keymap {
    scope: ViewScope,
    bindings: Vec<Binding>,
}

impl Keymap {
    pub fn new(scope: ViewScope) -> Self {
        Self {
            scope,
            bindings: Vec::new(),
        }
    }

    pub fn scope(&self) -> ViewScope {
        self.scope
    }

    /// Add a binding. A stroke already bound in this scope is a configuration
    /// error, even when it is bound to the same action.
    pub fn register(
        &mut self,
        stroke: KeyStroke,
        action: Action,
        description: &str,
    ) -> Result<(), DispatchError> {
        if let Some(existing) = self.bindings.iter().find(|b| b.stroke == stroke) {
            return Err(DispatchError::BindingConflict {
                scope: self.scope,
                stroke: stroke.to_string(),
                existing: existing.action,
                attempted: action,
            });
        }
        self.bindings.push(Binding {
            stroke,
            action,
            description: description.to_string(),
        });
        Ok(())
    }

    pub fn lookup(&self, stroke: &KeyStroke) -> Option<Action> {
        self.bindings
            .iter()
            .find(|b| &b.stroke == stroke)
            .map(|b| b.action)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn binds(&self, action: Action) -> bool {
        self.bindings.iter().any(|b| b.action == action)
    }

    /// Replace the default strokes of each overridden action.
    ///
    /// All overrides are validated against the resulting table; on any error
    /// the keymap is left as it was.
    pub fn apply_overrides(&mut self, overrides: &[KeyOverride]) -> Result<(), DispatchError> {
        let mut next = self.clone();
        let relevant: Vec<&KeyOverride> = overrides
            .iter()
            .filter(|o| o.scope.map_or(true, |s| s == self.scope) && self.binds(o.action))
            .collect();

        for o in &relevant {
            next.bindings.retain(|b| b.action != o.action);
        }
        for o in relevant {
            let stroke = KeyStroke::parse(&o.keys)?;
            let description = self
                .bindings
                .iter()
                .find(|b| b.action == o.action)
                .map(|b| b.description.clone())
                .unwrap_or_else(|| o.action.to_string());
            next.register(stroke, o.action, &description)?;
        }

        *self = next;
        Ok(())
    }

    pub fn default_triage() -> Result<Self, DispatchError> {
        let mut map = Self::new(ViewScope::Triage);
        map.register_common()?;
        for (key, action, description) in [
            ("s", Action::StartReview, "Start review"),
            ("r", Action::MarkReviewed, "Mark reviewed"),
            ("e", Action::Escalate, "Escalate"),
            ("m", Action::AssignToMe, "Assign to me"),
            ("t", Action::PromoteToTraining, "Promote to training"),
        ] {
            map.register(KeyStroke::plain(key), action, description)?;
        }
        Ok(map)
    }

    pub fn default_cases() -> Result<Self, DispatchError> {
        let mut map = Self::new(ViewScope::Cases);
        map.register_common()?;
        for (key, action, description) in [
            ("a", Action::Approve, "Approve case"),
            ("r", Action::Reject, "Reject case"),
        ] {
            map.register(KeyStroke::plain(key), action, description)?;
        }
        Ok(map)
    }

    pub fn default_for(scope: ViewScope) -> Result<Self, DispatchError> {
        match scope {
            ViewScope::Triage => Self::default_triage(),
            ViewScope::Cases => Self::default_cases(),
        }
    }

    fn register_common(&mut self) -> Result<(), DispatchError> {
        for (key, action, description) in [
            ("j", Action::Next, "Next item"),
            ("down", Action::Next, "Next item"),
            ("k", Action::Previous, "Previous item"),
            ("up", Action::Previous, "Previous item"),
            ("g", Action::First, "First item"),
            ("G", Action::Last, "Last item"),
            ("enter", Action::Open, "Open item"),
            ("o", Action::Open, "Open item"),
            ("space", Action::ToggleSelect, "Toggle selection"),
            ("x", Action::ToggleSelect, "Toggle selection"),
            ("escape", Action::Cancel, "Clear selection"),
            ("f5", Action::Reload, "Reload"),
        ] {
            self.register(KeyStroke::plain(key), action, description)?;
        }
        self.register(KeyStroke::new("a", Modifiers::ctrl()), Action::SelectAll, "Select all")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_collisions() {
        assert!(Keymap::default_triage().is_ok());
        assert!(Keymap::default_cases().is_ok());
    }

    #[test]
    fn duplicate_stroke_is_rejected_not_overwritten() {
        let mut map = Keymap::new(ViewScope::Cases);
        map.register(KeyStroke::plain("a"), Action::Approve, "Approve").unwrap();
        let err = map
            .register(KeyStroke::plain("a"), Action::Reject, "Reject")
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::BindingConflict { existing: Action::Approve, attempted: Action::Reject, .. }
        ));
        assert_eq!(map.lookup(&KeyStroke::plain("a")), Some(Action::Approve));
    }

    #[test]
    fn modifiers_distinguish_strokes() {
        let map = Keymap::default_cases().unwrap();
        assert_eq!(map.lookup(&KeyStroke::plain("a")), Some(Action::Approve));
        assert_eq!(
            map.lookup(&KeyStroke::new("a", Modifiers::ctrl())),
            Some(Action::SelectAll)
        );
    }

    #[test]
    fn same_key_in_different_scopes_is_fine() {
        let triage = Keymap::default_triage().unwrap();
        let cases = Keymap::default_cases().unwrap();
        let r = KeyStroke::plain("r");
        assert_eq!(triage.lookup(&r), Some(Action::MarkReviewed));
        assert_eq!(cases.lookup(&r), Some(Action::Reject));
    }

    #[test]
    fn override_rebinds_action() {
        let mut map = Keymap::default_cases().unwrap();
        map.apply_overrides(&[KeyOverride {
            keys: "y".into(),
            action: Action::Approve,
            scope: None,
        }])
        .unwrap();
        assert_eq!(map.lookup(&KeyStroke::plain("y")), Some(Action::Approve));
        assert_eq!(map.lookup(&KeyStroke::plain("a")), None);
    }

    #[test]
    fn colliding_override_leaves_keymap_unchanged() {
        let mut map = Keymap::default_cases().unwrap();
        let before = map.clone();
        let err = map
            .apply_overrides(&[KeyOverride {
                keys: "r".into(),
                action: Action::Approve,
                scope: Some(ViewScope::Cases),
            }])
            .unwrap_err();
        assert!(matches!(err, DispatchError::BindingConflict { .. }));
        assert_eq!(map, before);
    }

    #[test]
    fn override_for_other_scope_is_skipped() {
        let mut map = Keymap::default_triage().unwrap();
        let before = map.clone();
        map.apply_overrides(&[KeyOverride {
            keys: "y".into(),
            action: Action::Next,
            scope: Some(ViewScope::Cases),
        }])
        .unwrap();
        assert_eq!(map, before);
    }
}
