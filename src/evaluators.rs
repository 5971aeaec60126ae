//! Evaluation functions score a single simulation snapshot.

use crate::State;

/// Maps a state to a scalar score. Higher is better.
pub trait EvaluationFunction<S: State>: Send + Sync {
    fn evaluate(&self, state: &S) -> f32;
}

/// States that can report how far the controlled body has travelled.
/// The bread-and-butter signal for locomotion search.
pub trait Progress {
    fn horizontal_distance(&self) -> f32;
}

/// Scores a state by its horizontal distance.
#[derive(Clone, Copy, Debug, Default)]
pub struct DistanceEvaluator;

impl<S: State + Progress> EvaluationFunction<S> for DistanceEvaluator {
    fn evaluate(&self, state: &S) -> f32 {
        state.horizontal_distance()
    }
}

/// Always returns the same score. Turns value-guided samplers into pure
/// visit-count exploration; also handy as a test stub.
#[derive(Clone, Copy, Debug)]
pub struct ConstantEvaluator(pub f32);

impl<S: State> EvaluationFunction<S> for ConstantEvaluator {
    fn evaluate(&self, _state: &S) -> f32 {
        self.0
    }
}

/// Adapts any closure into an evaluation function.
pub struct FnEvaluator<F>(pub F);

impl<S, F> EvaluationFunction<S> for FnEvaluator<F>
where
    S: State,
    F: Fn(&S) -> f32 + Send + Sync,
{
    fn evaluate(&self, state: &S) -> f32 {
        (self.0)(state)
    }
}
