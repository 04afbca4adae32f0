//! Time integration: data store, step/order control and the formulas.

pub mod data_store;
pub mod method;
pub mod params;
pub mod step_error_control;

pub use data_store::{DataStore, ErrorWeightOptions};
pub use method::{Bdf15, IntegrationMethodKind, NoTimeIntegration, OneStep, TimeIntegrationMethod};
pub use params::TiaParams;
pub use step_error_control::{StepControlConstants, StepErrorControl};
