//! Request/response forecasting service over the persisted artifacts.
//!
//! The forecasting model is an external collaborator behind [`forecaster::Forecaster`];
//! this module owns artifact loading, input scaling, attribution and the HTTP surface.

pub mod api;
pub mod attribution;
pub mod context;
pub mod forecaster;
