//! Mute gate for new playback.

#[derive(Debug, Default, Clone, Copy)]
pub struct MuteGate {
    muted: bool,
}

impl MuteGate {
    /// Returns `true` if the gate was open before.
    pub fn mute(&mut self) -> bool {
        !std::mem::replace(&mut self.muted, true)
    }

    /// Returns `true` if the gate was closed before.
    pub fn unmute(&mut self) -> bool {
        std::mem::replace(&mut self.muted, false)
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}
