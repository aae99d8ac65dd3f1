//! The Reducer trait - core abstraction for state machines
//!
//! Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
//! They contain the transition rules and nothing else; effects are
//! descriptions that the runtime executes.

use smallvec::SmallVec;

/// Effects produced by one transition. Almost every transition yields fewer
/// than four, so they stay on the stack.
pub type Effects<E> = SmallVec<[E; 4]>;

/// The Reducer trait
///
/// # Type Parameters
///
/// - `State`: The state this reducer operates on
/// - `Action`: The inputs it accepts
/// - `Effect`: The side-effect descriptions it emits
/// - `Environment`: Read-only configuration it consults
///
/// # Example
///
/// ```ignore
/// impl Reducer for ConnectionReducer {
///     type State = ConnectionState;
///     type Action = ConnectionAction;
///     type Effect = ConnectionEffect;
///     type Environment = ReconnectPolicy;
///
///     fn reduce(&self, state: &mut ConnectionState, action: ConnectionAction, policy: &ReconnectPolicy)
///         -> Effects<ConnectionEffect>
///     {
///         match action { /* transition rules */ }
///     }
/// }
/// ```
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The effect descriptions this reducer emits
    type Effect;

    /// The environment type with injected configuration
    type Environment;

    /// Reduce an action into state changes and effects
    ///
    /// This is a pure function that:
    /// 1. Validates the action against the current state
    /// 2. Updates state in place
    /// 3. Returns effect descriptions to be executed
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects<Self::Effect>;
}
