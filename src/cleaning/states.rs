//! Cleaning sequence state machine
//! States: Idle, Chemical, Waiting, Water, Completed

use embassy_time::Duration;
use log::info;
use serde::Serialize;
use statig::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleaningPhase {
    None,
    Chemical,
    Waiting,
    Water,
    Completed,
}

impl CleaningPhase {
    /// How long a timed phase lasts; `None` for phases that wait on the operator.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            CleaningPhase::Chemical => Some(Duration::from_millis(5000)),
            CleaningPhase::Waiting => Some(Duration::from_millis(3000)),
            CleaningPhase::Water => Some(Duration::from_millis(5000)),
            CleaningPhase::None | CleaningPhase::Completed => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CleaningPhase::None => "idle",
            CleaningPhase::Chemical => "chemical cleaning",
            CleaningPhase::Waiting => "waiting",
            CleaningPhase::Water => "water rinse",
            CleaningPhase::Completed => "completed",
        }
    }
}

// Input events to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleaningInput {
    Start,
    Pause,
    Resume,
    Stop,
    PhaseElapsed,
    Acknowledge,
}

// Output events from the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleaningOutput {
    Started,
    PhaseEntered(CleaningPhase),
    Paused(CleaningPhase),
    Resumed(CleaningPhase),
    Stopped(CleaningPhase),
    Acknowledged,
    ArmPhaseTimer(Duration),
    CancelPhaseTimer,
}

#[derive(Debug, Default)]
pub struct CleaningContext {
    paused: bool,
    outputs: heapless::Vec<CleaningOutput, 4>,
}

impl CleaningContext {
    fn emit(&mut self, output: CleaningOutput) {
        let _ = self.outputs.push(output);
    }
}

#[derive(Debug, Default)]
pub struct CleaningSequence;

#[state_machine(
    initial = "State::idle()",
    state(derive(Debug)),
    on_transition = "Self::on_transition"
)]
impl CleaningSequence {
    #[state]
    fn idle(context: &mut CleaningContext, event: &CleaningInput) -> Response<State> {
        use Response::*;

        match event {
            CleaningInput::Start => {
                context.paused = false;
                context.emit(CleaningOutput::Started);
                Self::enter_phase(context, CleaningPhase::Chemical);
                Transition(State::chemical())
            }
            _ => Handled,
        }
    }

    #[state]
    fn chemical(context: &mut CleaningContext, event: &CleaningInput) -> Response<State> {
        Self::running(context, event, CleaningPhase::Chemical, CleaningPhase::Waiting, State::waiting())
    }

    #[state]
    fn waiting(context: &mut CleaningContext, event: &CleaningInput) -> Response<State> {
        Self::running(context, event, CleaningPhase::Waiting, CleaningPhase::Water, State::water())
    }

    #[state]
    fn water(context: &mut CleaningContext, event: &CleaningInput) -> Response<State> {
        Self::running(context, event, CleaningPhase::Water, CleaningPhase::Completed, State::completed())
    }

    /// Terminal until the operator acknowledges.
    #[state]
    fn completed(context: &mut CleaningContext, event: &CleaningInput) -> Response<State> {
        use Response::*;

        match event {
            CleaningInput::Acknowledge => {
                context.paused = false;
                context.emit(CleaningOutput::Acknowledged);
                Transition(State::idle())
            }
            _ => Handled,
        }
    }

    fn on_transition(&mut self, source: &State, target: &State) {
        let source_phase = Self::state_to_phase(source);
        let target_phase = Self::state_to_phase(target);

        if source_phase != target_phase {
            info!("Cleaning transition: {:?} -> {:?}", source_phase, target_phase);
        }
    }

    fn state_to_phase(state: &State) -> CleaningPhase {
        match state {
            State::Idle {} => CleaningPhase::None,
            State::Chemical {} => CleaningPhase::Chemical,
            State::Waiting {} => CleaningPhase::Waiting,
            State::Water {} => CleaningPhase::Water,
            State::Completed {} => CleaningPhase::Completed,
        }
    }
}

// Shared handling for the three timed phases
impl CleaningSequence {
    fn running(
        context: &mut CleaningContext,
        event: &CleaningInput,
        phase: CleaningPhase,
        next_phase: CleaningPhase,
        next_state: State,
    ) -> Response<State> {
        use Response::*;

        match event {
            CleaningInput::PhaseElapsed if !context.paused => {
                Self::enter_phase(context, next_phase);
                Transition(next_state)
            }
            CleaningInput::Pause if !context.paused => {
                context.paused = true;
                context.emit(CleaningOutput::CancelPhaseTimer);
                context.emit(CleaningOutput::Paused(phase));
                Handled
            }
            CleaningInput::Resume if context.paused => {
                // Resuming restarts the whole phase; elapsed time is not carried over.
                context.paused = false;
                context.emit(CleaningOutput::Resumed(phase));
                if let Some(duration) = phase.duration() {
                    context.emit(CleaningOutput::ArmPhaseTimer(duration));
                }
                Handled
            }
            CleaningInput::Stop => {
                context.paused = false;
                context.emit(CleaningOutput::CancelPhaseTimer);
                context.emit(CleaningOutput::Stopped(phase));
                Transition(State::idle())
            }
            _ => Handled,
        }
    }

    fn enter_phase(context: &mut CleaningContext, phase: CleaningPhase) {
        context.emit(CleaningOutput::PhaseEntered(phase));
        if let Some(duration) = phase.duration() {
            context.emit(CleaningOutput::ArmPhaseTimer(duration));
        }
    }
}

// Main interface for the cleaning state machine
pub struct CleaningController {
    machine: statig::prelude::StateMachine<CleaningSequence>,
    context: CleaningContext,
}

impl Default for CleaningController {
    fn default() -> Self {
        Self::new()
    }
}

impl CleaningController {
    pub fn new() -> Self {
        Self {
            machine: CleaningSequence::default().state_machine(),
            context: CleaningContext::default(),
        }
    }

    /// Process an input event and return output events
    pub fn handle_input(&mut self, input: CleaningInput) -> heapless::Vec<CleaningOutput, 4> {
        self.context.outputs.clear();
        let _ = self.machine.handle_with_context(&input, &mut self.context);
        std::mem::take(&mut self.context.outputs)
    }

    pub fn phase(&self) -> CleaningPhase {
        CleaningSequence::state_to_phase(self.machine.state())
    }

    pub fn is_paused(&self) -> bool {
        self.context.paused
    }

    pub fn start(&mut self) -> heapless::Vec<CleaningOutput, 4> {
        self.handle_input(CleaningInput::Start)
    }

    pub fn pause(&mut self) -> heapless::Vec<CleaningOutput, 4> {
        self.handle_input(CleaningInput::Pause)
    }

    pub fn resume(&mut self) -> heapless::Vec<CleaningOutput, 4> {
        self.handle_input(CleaningInput::Resume)
    }

    pub fn stop(&mut self) -> heapless::Vec<CleaningOutput, 4> {
        self.handle_input(CleaningInput::Stop)
    }

    pub fn phase_elapsed(&mut self) -> heapless::Vec<CleaningOutput, 4> {
        self.handle_input(CleaningInput::PhaseElapsed)
    }

    pub fn complete(&mut self) -> heapless::Vec<CleaningOutput, 4> {
        self.handle_input(CleaningInput::Acknowledge)
    }
}
