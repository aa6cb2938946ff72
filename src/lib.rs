//! Binaural sound rendering library.
//!
//! # Overview
//!
//! This library renders mono sound sources into a stereo stream the way a human head
//! hears them, using a set of measured head-related impulse responses (HRIR). Feed it
//! an HRIR data set once, then stream any amount of mono audio through a
//! [`Binauralizer`](binauralizer::Binauralizer) while moving the source direction from
//! a control thread - the output will sound as if it comes from that direction.
//!
//! # HRIR data
//!
//! A head-related impulse response is a short recording of how a sound from a known
//! direction arrives at each ear. Public data sets (IRCAM, MIT KEMAR, etc.) provide a
//! few hundred to a few thousand of such measurements spread over a sphere around the
//! listener's head. This library accepts decoded impulse responses via
//! [`HrirSphere::add`](hrir::HrirSphere::add) and interpolates between the three
//! measurements closest to the requested direction.
//!
//! # Usage
//!
//! ```no_run
//! use fyrox_binaural::{Binauralizer, HrirSphere, HRIR_LEN};
//! use std::sync::Arc;
//!
//! let mut sphere = HrirSphere::new();
//! for &(elevation, azimuth) in &[(-30.0, -30.0), (-30.0, 30.0), (30.0, -30.0), (30.0, 30.0)] {
//!     sphere
//!         .add(elevation, azimuth, &vec![0.0; HRIR_LEN], &vec![0.0; HRIR_LEN])
//!         .unwrap();
//! }
//! sphere.finalize().unwrap();
//!
//! let mut binauralizer = Binauralizer::new(Arc::new(sphere)).unwrap();
//! binauralizer.set_direction(15.0, -5.0);
//! binauralizer.provide(&[0.0; 1024]);
//! let mut buf = [(0.0, 0.0); 1024];
//! binauralizer.generate_interleaved(&mut buf);
//! ```
//!
//! # Performance
//!
//! Convolution is done in the frequency domain, one FFT of the input per rendered
//! block regardless of how many filters are applied to it. All processing buffers are
//! allocated up front, the audio path does not allocate, block, or do any I/O.

#![warn(missing_docs)]

pub mod binauralizer;
pub mod dsp;
pub mod error;
pub mod grid;
pub mod hrir;
pub mod math;

/// Amount of samples per ear in a measured impulse response.
pub const HRIR_LEN: usize = 512;

/// Size of the FFT used for spectrum transforms and convolution. It is twice [`HRIR_LEN`],
/// which leaves enough headroom in the analysis window for the tail of the inverse
/// transform to be a linear (not circular) convolution.
pub const FFT_LEN: usize = 2 * HRIR_LEN;

/// Amount of samples rendered per internal processing step of the binauralizer.
pub const BLOCK_LEN: usize = 512;

/// Capacity of the binauralizer's input ring buffer. Once it is full, the oldest
/// samples are overwritten.
pub const INPUT_BUFFER_LEN: usize = 8 * BLOCK_LEN;

pub use binauralizer::{Binauralizer, Direction, DirectionHandle};
pub use error::BinauralError;
pub use hrir::{HrirSample, HrirSphere};
