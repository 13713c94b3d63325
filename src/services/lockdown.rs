//! Clipboard, context-menu and selection suppression for exam views.
//!
//! This is a deterrent, not a security boundary: devtools, screenshots and OS-level
//! capture are untouched. What it guarantees is narrower and testable: while a scope is
//! engaged the listed events are intercepted, and once its guard is dropped no
//! interception remains.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum Surface {
    EditorRoot,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum DomEvent {
    Copy,
    Paste,
    Cut,
    ContextMenu,
    TouchStart,
    Keydown,
    Input,
}

impl DomEvent {
    fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Paste => "paste",
            Self::Cut => "cut",
            Self::ContextMenu => "contextmenu",
            Self::TouchStart => "touchstart",
            Self::Keydown => "keydown",
            Self::Input => "input",
        }
    }
}

const CLIPBOARD_EVENTS: [DomEvent; 4] =
    [DomEvent::Copy, DomEvent::Paste, DomEvent::Cut, DomEvent::ContextMenu];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum LockdownScope {
    /// Editor root only: coding questions.
    Editor,
    /// Editor root and the whole document: answer review and other protected views.
    Protected,
}

impl LockdownScope {
    fn registrations(self) -> Vec<Listener> {
        let mut listeners: Vec<Listener> = CLIPBOARD_EVENTS
            .iter()
            .map(|event| Listener { surface: Surface::EditorRoot, event: *event, passive: false })
            .collect();
        listeners.push(Listener { surface: Surface::EditorRoot, event: DomEvent::TouchStart, passive: false });

        if self == LockdownScope::Protected {
            listeners.extend(CLIPBOARD_EVENTS.iter().map(|event| Listener {
                surface: Surface::Document,
                event: *event,
                passive: false,
            }));
            listeners.push(Listener { surface: Surface::Document, event: DomEvent::TouchStart, passive: false });
        }

        listeners
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Listener {
    pub(crate) surface: Surface,
    pub(crate) event: DomEvent,
    /// `touchstart` must be non-passive or `preventDefault` is ignored.
    pub(crate) passive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Disposition {
    pub(crate) prevent_default: bool,
    pub(crate) stop_propagation: bool,
}

impl Disposition {
    const PASS: Self = Self { prevent_default: false, stop_propagation: false };
    const BLOCK: Self = Self { prevent_default: true, stop_propagation: true };

    pub(crate) fn is_blocked(self) -> bool {
        self.prevent_default
    }
}

/// Active DOM listeners, reference counted so overlapping scopes compose.
#[derive(Debug, Default)]
pub(crate) struct ListenerRegistry {
    active: Mutex<HashMap<Listener, usize>>,
}

impl ListenerRegistry {
    fn entries(&self) -> MutexGuard<'_, HashMap<Listener, usize>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, listeners: &[Listener]) {
        let mut active = self.entries();
        for listener in listeners {
            *active.entry(*listener).or_insert(0) += 1;
        }
    }

    fn deregister(&self, listeners: &[Listener]) {
        let mut active = self.entries();
        for listener in listeners {
            if let Some(count) = active.get_mut(listener) {
                *count -= 1;
                if *count == 0 {
                    active.remove(listener);
                }
            }
        }
    }

    pub(crate) fn is_listening(&self, surface: Surface, event: DomEvent) -> bool {
        self.entries().keys().any(|listener| listener.surface == surface && listener.event == event)
    }

    pub(crate) fn active_listeners(&self) -> Vec<Listener> {
        self.entries().keys().copied().collect()
    }

    pub(crate) fn intercept(&self, surface: Surface, event: DomEvent) -> Disposition {
        let disposition =
            if self.is_listening(surface, event) { Disposition::BLOCK } else { Disposition::PASS };
        if disposition.is_blocked() {
            metrics::counter!("lockdown_events_total", "event" => event.as_str()).increment(1);
            tracing::debug!(?surface, event = event.as_str(), "Suppressed restricted input");
        }
        disposition
    }
}

/// Holds one engaged scope. Dropping it removes that scope's listeners.
pub(crate) struct LockdownGuard {
    registry: Arc<ListenerRegistry>,
    listeners: Vec<Listener>,
    scope: LockdownScope,
}

impl LockdownGuard {
    pub(crate) fn scope(&self) -> LockdownScope {
        self.scope
    }
}

impl Drop for LockdownGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.listeners);
        tracing::debug!(scope = ?self.scope, "Input lockdown released");
    }
}

pub(crate) fn engage(registry: &Arc<ListenerRegistry>, scope: LockdownScope) -> LockdownGuard {
    let listeners = scope.registrations();
    registry.register(&listeners);
    tracing::debug!(
        ?scope,
        listeners = listeners.len(),
        non_passive = listeners.iter().filter(|listener| !listener.passive).count(),
        "Input lockdown engaged"
    );
    LockdownGuard { registry: registry.clone(), listeners, scope }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KeyChord {
    pub(crate) key: String,
    #[serde(default)]
    pub(crate) ctrl: bool,
    #[serde(default)]
    pub(crate) meta: bool,
    #[serde(default)]
    pub(crate) shift: bool,
    #[serde(default)]
    pub(crate) alt: bool,
}

/// Editor-level command filter: copy, paste, cut and select-all become no-ops.
///
/// Shift+Insert is the legacy paste chord and needs no Ctrl/Cmd.
pub(crate) fn intercept_editor_command(chord: &KeyChord) -> Disposition {
    if chord.alt {
        return Disposition::PASS;
    }

    let key = chord.key.to_ascii_lowercase();
    if chord.shift && key == "insert" {
        return Disposition::BLOCK;
    }
    if !(chord.ctrl || chord.meta) {
        return Disposition::PASS;
    }

    match key.as_str() {
        "c" | "v" | "x" | "a" | "insert" => Disposition::BLOCK,
        _ => Disposition::PASS,
    }
}
