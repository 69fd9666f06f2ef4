// Test fixtures shared by the registry integration tests

pub mod calculator;
pub mod recording_listener;

pub use calculator::{
    calculator_interface, object_only_interface, Calculator, CalculatorClient, SimpleCalculator,
    CALCULATOR_INTERFACE,
};
pub use recording_listener::RecordingListener;
