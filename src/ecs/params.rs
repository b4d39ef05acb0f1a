use bevy::ecs::system::{Res, ResMut, SystemParam};

use super::{Engine, SessionClock};
use crate::engine::{CommandAction, FocusMetrics, FocusStateSnapshot, PresenterCommand, ScreenId};

/// A Bevy `SystemParam` bundling the focus engine with the session clock.
///
/// Operator commands arrive from the control socket without timestamps;
/// this is the one place they pick one up before reaching the engine, which
/// itself never reads a clock.
#[derive(SystemParam)]
pub struct FocusCtl<'w> {
    engine: ResMut<'w, Engine>,
    clock: Res<'w, SessionClock>,
}

impl FocusCtl<'_> {
    /// Stamps and applies one operator command.
    pub fn apply(&mut self, action: CommandAction, screen: Option<ScreenId>) {
        let command = PresenterCommand {
            action,
            screen,
            timestamp_ms: self.clock.now_ms(),
        };
        self.engine.handle_command(&command);
    }

    pub fn snapshot(&self) -> FocusStateSnapshot {
        self.engine.snapshot()
    }

    pub fn metrics(&self) -> FocusMetrics {
        self.engine.metrics()
    }
}
