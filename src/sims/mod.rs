//! Concrete simulations shipped with the engine.
//!
//! Real deployments plug in a physics engine behind the [`Simulation`]
//! trait; the hopper here is a deliberately tiny stand-in with exact integer
//! dynamics, used by the test suite and the documentation examples.
//!
//! [`Simulation`]: crate::Simulation

pub mod hopper;
