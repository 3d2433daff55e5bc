//! Tessera pass graph: fixed frame order and per-pass re-record flags.
//!
//! The topology never changes at runtime, so the graph is data: `FRAME_ORDER` lists the stages in
//! dependency order and `DirtyFlags` tracks which top-level command buffers are stale.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Shadow,
    Geometry,
    Lighting,
    Sprite,
    PostEffect,
    Present,
}

/// Guard deciding whether a stage's command buffer is executed in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteWhen {
    Always,
    AnyDrawable,
    AnySprite,
}

impl ExecuteWhen {
    pub fn holds(self, drawables: usize, sprites: usize) -> bool {
        match self {
            ExecuteWhen::Always => true,
            ExecuteWhen::AnyDrawable => drawables > 0,
            ExecuteWhen::AnySprite => sprites > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub pass: PassKind,
    pub when: ExecuteWhen,
}

/// Shadow map and G-buffer are written before lighting samples them; lighting fills the offscreen
/// target before sprites blend onto it; present samples the finished target.
pub const FRAME_ORDER: [Stage; 5] = [
    Stage { pass: PassKind::Shadow, when: ExecuteWhen::AnyDrawable },
    Stage { pass: PassKind::Geometry, when: ExecuteWhen::Always },
    Stage { pass: PassKind::Lighting, when: ExecuteWhen::Always },
    Stage { pass: PassKind::Sprite, when: ExecuteWhen::AnySprite },
    Stage { pass: PassKind::Present, when: ExecuteWhen::Always },
];

/// Per-pass "needs re-record" state. Present has no flag: its recordings never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyFlags {
    pub shadow: bool,
    pub geometry: bool,
    pub lighting: bool,
    pub sprite: bool,
    pub post_effect: bool,
}

impl DirtyFlags {
    pub const CLEAN: Self = Self {
        shadow: false,
        geometry: false,
        lighting: false,
        sprite: false,
        post_effect: false,
    };

    /// State of a fresh renderer: the geometry pass records its empty G-buffer clear on first build.
    pub fn initial() -> Self {
        Self { geometry: true, ..Self::CLEAN }
    }

    pub fn mark(&mut self, pass: PassKind) {
        if let Some(flag) = self.flag_mut(pass) {
            *flag = true;
        }
    }

    pub fn clear(&mut self, pass: PassKind) {
        if let Some(flag) = self.flag_mut(pass) {
            *flag = false;
        }
    }

    pub fn is_dirty(&self, pass: PassKind) -> bool {
        match pass {
            PassKind::Shadow => self.shadow,
            PassKind::Geometry => self.geometry,
            PassKind::Lighting => self.lighting,
            PassKind::Sprite => self.sprite,
            PassKind::PostEffect => self.post_effect,
            PassKind::Present => false,
        }
    }

    /// Called after `pass` was re-recorded. Geometry and sprite stay dirty so that every later
    /// build re-records them too.
    pub fn rebuilt(&mut self, pass: PassKind) {
        if matches!(pass, PassKind::Shadow | PassKind::PostEffect | PassKind::Lighting) {
            self.clear(pass);
        }
    }

    fn flag_mut(&mut self, pass: PassKind) -> Option<&mut bool> {
        match pass {
            PassKind::Shadow => Some(&mut self.shadow),
            PassKind::Geometry => Some(&mut self.geometry),
            PassKind::Lighting => Some(&mut self.lighting),
            PassKind::Sprite => Some(&mut self.sprite),
            PassKind::PostEffect => Some(&mut self.post_effect),
            PassKind::Present => None,
        }
    }
}
