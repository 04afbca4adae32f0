//! DAE element loaders for Spicier.
//!
//! Elements write their charges into Q and their currents into F of
//! `dQ/dt + F = 0`, plus the matching derivatives. A [`Circuit`] owns the
//! elements and node names and is the [`spicier_core::Loader`] the solver
//! drives:
//! - Passive elements: R, C, L
//! - Sources: V, I with DC, PULSE and SIN waveforms; E and G controlled sources
//! - Diode with junction-voltage limiting

pub mod circuit;
pub mod device;
pub mod diode;
pub mod error;
pub mod passive;
pub mod sources;
pub mod stamp;
pub mod waveforms;

pub use circuit::Circuit;
pub use device::Device;
pub use diode::{Diode, DiodeModel};
pub use error::{Error, Result};
pub use waveforms::Waveform;
