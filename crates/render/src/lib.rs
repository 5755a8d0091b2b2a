//! Backend-agnostic render pipeline for the two stacked floorplan layers.
//!
//! The pipeline never touches a drawing API. It produces [`LayerPlan`]s,
//! ordered command lists a backend replays onto its surfaces, and owns the
//! lifetime of the single live overlay resource through [`OverlaySlot`].
//!
//! Backend contract:
//! - `Resize` clears the layer; commands execute in order.
//! - Image decode is asynchronous: every command *after* a `DrawImage` runs
//!   in that image's decode-completion callback, so a marker always lands on
//!   top of the overlay, never beneath it.
//! - A decode completion first checks the plan's generation against the
//!   pipeline's current one and is a no-op when superseded.
//! - `DrawImage` sets the given opacity for that draw only; the backend
//!   restores full opacity immediately afterwards.

use geometry::{CanonicalPoint, DisplayPoint, Extent, GeometryError, to_display};

/// Overlay images composite at this opacity so the floorplan stays legible.
pub const OVERLAY_OPACITY: f64 = 0.6;

/// Marker radius in display units, independent of image scale.
pub const MARKER_RADIUS: f64 = 5.0;

pub const MARKER_COLOR: &str = "blue";

/// The two visual layers, in fixed z-order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LayerKind {
    /// z=1; the floorplan itself. The only layer that receives input.
    Base,
    /// z=2; query result image plus marker. Input passes through.
    Overlay,
}

impl LayerKind {
    pub fn z_index(&self) -> u8 {
        match self {
            LayerKind::Base => 1,
            LayerKind::Overlay => 2,
        }
    }

    pub fn accepts_input(&self) -> bool {
        matches!(self, LayerKind::Base)
    }
}

/// Identifies which overlay installation a plan or decode callback belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum LayerCommand {
    /// Size the layer to the display extent. Clears any previous content.
    Resize(Extent),
    /// Draw the layer's bound image scaled to fill the layer exactly.
    DrawImage { opacity: f64 },
    /// Draw a filled circle at a display-space position.
    FillCircle {
        center: DisplayPoint,
        radius: f64,
        color: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerPlan {
    pub layer: LayerKind,
    pub generation: Generation,
    pub commands: Vec<LayerCommand>,
}

/// Holds at most one live overlay resource handle.
///
/// `H` is whatever the backend uses to keep a decoded overlay drawable (an
/// object URL in the web shell). Install and clear hand the superseded handle
/// back to the caller, who must release it: the slot never holds two live
/// handles, and nothing is left for the host runtime to reclaim implicitly.
#[derive(Debug)]
pub struct OverlaySlot<H> {
    live: Option<H>,
    generation: Generation,
}

impl<H> Default for OverlaySlot<H> {
    fn default() -> Self {
        Self {
            live: None,
            generation: Generation(0),
        }
    }
}

impl<H> OverlaySlot<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a new live handle, bumping the generation.
    ///
    /// Returns the superseded handle; the caller must release it.
    #[must_use]
    pub fn install(&mut self, handle: H) -> Option<H> {
        self.generation = Generation(self.generation.0 + 1);
        self.live.replace(handle)
    }

    /// Empties the slot, bumping the generation so pending decodes for the
    /// old content become no-ops.
    ///
    /// Returns the live handle; the caller must release it.
    #[must_use]
    pub fn clear(&mut self) -> Option<H> {
        self.generation = Generation(self.generation.0 + 1);
        self.live.take()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        generation == self.generation
    }

    pub fn live(&self) -> Option<&H> {
        self.live.as_ref()
    }
}

/// Builds layer plans and owns the overlay resource slot.
///
/// Each layer has its own generation: the overlay's advances with every slot
/// install/clear, the base's with every base plan, so replacing one layer's
/// content never invalidates the other's pending decode.
#[derive(Debug)]
pub struct Pipeline<H> {
    slot: OverlaySlot<H>,
    base_generation: Generation,
}

impl<H> Default for Pipeline<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Pipeline<H> {
    pub fn new() -> Self {
        Self {
            slot: OverlaySlot::new(),
            base_generation: Generation(0),
        }
    }

    /// See [`OverlaySlot::install`].
    #[must_use]
    pub fn install_overlay(&mut self, handle: H) -> Option<H> {
        self.slot.install(handle)
    }

    /// See [`OverlaySlot::clear`].
    #[must_use]
    pub fn clear_overlay(&mut self) -> Option<H> {
        self.slot.clear()
    }

    /// Releases the live handle at component teardown.
    #[must_use]
    pub fn teardown(&mut self) -> Option<H> {
        self.slot.clear()
    }

    pub fn generation(&self, layer: LayerKind) -> Generation {
        match layer {
            LayerKind::Base => self.base_generation,
            LayerKind::Overlay => self.slot.generation(),
        }
    }

    /// Whether a plan's generation is still the latest for its layer.
    /// Decode completions for superseded plans must be dropped.
    pub fn is_current(&self, layer: LayerKind, generation: Generation) -> bool {
        generation == self.generation(layer)
    }

    pub fn overlay_handle(&self) -> Option<&H> {
        self.slot.live()
    }

    /// Plan for redrawing the base layer: the floorplan scaled to fill the
    /// display extent exactly, no letterboxing. Supersedes any pending base
    /// decode.
    pub fn base_plan(&mut self, display: Extent) -> LayerPlan {
        self.base_generation = Generation(self.base_generation.0 + 1);
        LayerPlan {
            layer: LayerKind::Base,
            generation: self.base_generation,
            commands: vec![
                LayerCommand::Resize(display),
                LayerCommand::DrawImage { opacity: 1.0 },
            ],
        }
    }

    /// Plan for redrawing the overlay layer from the current slot contents.
    ///
    /// Draws the overlay image (if installed) translucently, then the marker
    /// (if present) mapped into display space. Command order plus the decode
    /// contract above guarantee the marker ends up on top.
    pub fn overlay_plan(
        &self,
        marker: Option<CanonicalPoint>,
        canonical: Extent,
        display: Extent,
    ) -> Result<LayerPlan, GeometryError> {
        let mut commands = vec![LayerCommand::Resize(display)];
        if self.slot.live().is_some() {
            commands.push(LayerCommand::DrawImage {
                opacity: OVERLAY_OPACITY,
            });
        }
        if let Some(marker) = marker {
            commands.push(LayerCommand::FillCircle {
                center: to_display(marker, canonical, display)?,
                radius: MARKER_RADIUS,
                color: MARKER_COLOR,
            });
        }
        Ok(LayerPlan {
            layer: LayerKind::Overlay,
            generation: self.slot.generation(),
            commands,
        })
    }
}
