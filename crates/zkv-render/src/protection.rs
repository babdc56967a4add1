//! Extraction deterrents: interaction blocking and environment heuristics.
//!
//! None of this is a guarantee. It raises the cost of casual extraction
//! (right-click save, drag-out, select-and-copy, docked inspection tools).

use std::fmt;

/// A user interaction reported by the embedding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    ContextMenu,
    Drag,
    Select,
    Copy,
    Print,
    Save,
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InteractionKind::ContextMenu => "context-menu",
            InteractionKind::Drag => "drag",
            InteractionKind::Select => "select",
            InteractionKind::Copy => "copy",
            InteractionKind::Print => "print",
            InteractionKind::Save => "save",
        };
        f.write_str(name)
    }
}

/// What the UI must do with a reported interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionVerdict {
    /// Suppress the default action.
    Block,
}

/// Window and content-viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub window_width: u32,
    pub window_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Viewport {
    /// Largest gap between the window and the content viewport. A docked
    /// inspector shows up as a large gap on one axis.
    pub fn delta(&self) -> u32 {
        let dw = self.window_width.saturating_sub(self.viewport_width);
        let dh = self.window_height.saturating_sub(self.viewport_height);
        dw.max(dh)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportVerdict {
    Normal,
    /// Inspection tooling suspected; the surface has been torn down.
    TornDown,
}

/// Policy for interactions: every extraction-capable interaction is blocked.
pub fn interaction_verdict(_kind: InteractionKind) -> InteractionVerdict {
    InteractionVerdict::Block
}

/// True if the viewport delta exceeds `threshold`.
pub fn viewport_suspicious(viewport: &Viewport, threshold: u32) -> bool {
    viewport.delta() > threshold
}
