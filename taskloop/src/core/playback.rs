//! Run/pause intent and single-step semantics for the execution loop.
//!
//! A [`PlaybackController`] is a cheap, cloneable handle. The loop consults it
//! once at the start of every iteration ([`PlaybackController::checkpoint`]);
//! any other thread may flip the levers in between. In `Stepwise` mode each
//! `Play` authorizes exactly one iteration and is consumed by the loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// How iterations are orchestrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Free-run until a terminal state.
    #[default]
    Automatic,
    /// Every iteration needs an explicit step authorization.
    Stepwise,
}

/// Step control consulted in `Stepwise` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackControl {
    Play,
    #[default]
    Pause,
}

/// What the loop should do at an iteration checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Run the iteration.
    Proceed,
    /// Stepwise run without an authorized step; the run flag is now cleared.
    Pause(PlaybackControl),
    /// The run flag was cleared externally.
    Halt,
    /// A terminal stop was requested.
    Stop,
}

#[derive(Debug)]
struct PlaybackState {
    mode: PlaybackMode,
    control: PlaybackControl,
    running: bool,
    stop_requested: bool,
}

/// Shared playback handle.
#[derive(Debug, Clone)]
pub struct PlaybackController {
    inner: Arc<Mutex<PlaybackState>>,
}

impl PlaybackController {
    pub fn new(mode: PlaybackMode, initial_control: PlaybackControl) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlaybackState {
                mode,
                control: initial_control,
                running: false,
                stop_requested: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlaybackState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> PlaybackMode {
        self.state().mode
    }

    pub fn control(&self) -> PlaybackControl {
        self.state().control
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn is_stop_requested(&self) -> bool {
        self.state().stop_requested
    }

    /// Authorize the next iteration. Idempotent while the step is pending.
    pub fn request_step(&self) {
        self.state().control = PlaybackControl::Play;
    }

    /// External hard-stop/resume lever, independent of step control.
    pub fn set_running(&self, running: bool) {
        self.state().running = running;
    }

    /// Request a terminal stop. Honored at the next checkpoint.
    pub fn stop(&self) {
        let mut state = self.state();
        state.stop_requested = true;
        state.running = false;
    }

    /// Decide whether the next iteration may run, consuming a pending step.
    pub fn checkpoint(&self) -> Gate {
        let mut state = self.state();
        if state.stop_requested {
            return Gate::Stop;
        }
        if !state.running {
            return Gate::Halt;
        }
        if state.mode == PlaybackMode::Stepwise {
            match state.control {
                PlaybackControl::Pause => {
                    state.running = false;
                    return Gate::Pause(state.control);
                }
                PlaybackControl::Play => state.control = PlaybackControl::Pause,
            }
        }
        Gate::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(mode: PlaybackMode, control: PlaybackControl) -> PlaybackController {
        let playback = PlaybackController::new(mode, control);
        playback.set_running(true);
        playback
    }

    #[test]
    fn automatic_always_proceeds() {
        let playback = running(PlaybackMode::Automatic, PlaybackControl::Pause);
        assert_eq!(playback.checkpoint(), Gate::Proceed);
        assert_eq!(playback.checkpoint(), Gate::Proceed);
    }

    #[test]
    fn stepwise_pause_clears_running() {
        let playback = running(PlaybackMode::Stepwise, PlaybackControl::Pause);
        assert_eq!(
            playback.checkpoint(),
            Gate::Pause(PlaybackControl::Pause)
        );
        assert!(!playback.is_running());
    }

    #[test]
    fn play_authorizes_exactly_one_iteration() {
        let playback = running(PlaybackMode::Stepwise, PlaybackControl::Play);
        assert_eq!(playback.checkpoint(), Gate::Proceed);
        assert_eq!(playback.control(), PlaybackControl::Pause);
        assert!(matches!(playback.checkpoint(), Gate::Pause(_)));
    }

    #[test]
    fn repeated_step_requests_are_idempotent() {
        let playback = running(PlaybackMode::Stepwise, PlaybackControl::Pause);
        playback.request_step();
        playback.request_step();
        assert_eq!(playback.checkpoint(), Gate::Proceed);
        assert!(matches!(playback.checkpoint(), Gate::Pause(_)));
    }

    #[test]
    fn halt_does_not_consume_a_pending_step() {
        let playback = PlaybackController::new(PlaybackMode::Stepwise, PlaybackControl::Play);
        assert_eq!(playback.checkpoint(), Gate::Halt);
        assert_eq!(playback.control(), PlaybackControl::Play);
    }

    #[test]
    fn stop_wins_over_everything() {
        let playback = running(PlaybackMode::Automatic, PlaybackControl::Play);
        let remote = playback.clone();
        remote.stop();
        assert_eq!(playback.checkpoint(), Gate::Stop);
        assert!(!playback.is_running());
        assert!(playback.is_stop_requested());
    }
}
