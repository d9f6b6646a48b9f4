//! Transition table shared by the create-sync and transfer-sync machines.
//!
//! Both are singleton machines with the same shape; they differ only in
//! what triggers `Start` and how the first anchor is derived.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstablishState {
    #[default]
    Disabled,
    Discovering,
    ShuttingDown,
    Resetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishEvent {
    Reset,
    /// Create (scan found the target) or Start (transfer PDU accepted)
    Start,
    Cancel,
    Failed,
    Done,
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishAction {
    /// Allocate a context, derive the first anchor, schedule
    Start,
    /// Start while already discovering: logged and ignored
    RejectStart,
    /// Host cancel: remove the operation
    Cancel,
    /// Establishment failed: remove the operation
    Fail,
    /// Sync achieved: hand the context over
    Done,
    /// Operation gone: release the context and notify
    Terminate,
    /// Reset while discovering: remove the operation
    ResetShutdown,
    /// Operation gone after reset: release silently
    ResetTerminate,
}

/// `(action, next state)` for `event` in `state`.
pub fn transition(
    state: EstablishState,
    event: EstablishEvent,
) -> (Option<EstablishAction>, EstablishState) {
    use EstablishAction as A;
    use EstablishEvent as E;
    use EstablishState as S;

    match (state, event) {
        (S::Disabled, E::Start) => (Some(A::Start), S::Discovering),
        (S::Disabled, _) => (None, S::Disabled),

        (S::Discovering, E::Reset) => (Some(A::ResetShutdown), S::Resetting),
        (S::Discovering, E::Start) => (Some(A::RejectStart), S::Discovering),
        (S::Discovering, E::Cancel) => (Some(A::Cancel), S::ShuttingDown),
        (S::Discovering, E::Failed) => (Some(A::Fail), S::ShuttingDown),
        (S::Discovering, E::Done) => (Some(A::Done), S::Disabled),
        (S::Discovering, E::Terminate) => (None, S::Discovering),

        (S::ShuttingDown, E::Reset) => (None, S::Resetting),
        (S::ShuttingDown, E::Start) => (Some(A::RejectStart), S::ShuttingDown),
        (S::ShuttingDown, E::Terminate) => (Some(A::Terminate), S::Disabled),
        (S::ShuttingDown, E::Cancel | E::Failed | E::Done) => (None, S::ShuttingDown),

        (S::Resetting, E::Terminate) => (Some(A::ResetTerminate), S::Disabled),
        (S::Resetting, E::Start) => (Some(A::RejectStart), S::Resetting),
        (S::Resetting, E::Reset | E::Cancel | E::Failed | E::Done) => (None, S::Resetting),
    }
}
