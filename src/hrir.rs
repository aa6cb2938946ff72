//! Head-related impulse response database.
//!
//! # Overview
//!
//! [`HrirSphere`] stores a set of measured impulse response pairs together with the
//! directions they were measured at. The database is filled via [`HrirSphere::add`]
//! and then finalized once, which triangulates the directions and builds the spatial
//! index. A finalized sphere answers direction queries with the three closest
//! measurements and their interpolation weights, and can be saved to (and loaded
//! from) a flat binary file so the triangulation cost is paid once, offline.

use crate::{
    error::BinauralError,
    grid::SampleGrid,
    HRIR_LEN,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fyrox_core::log::Log;
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

/// Magic bytes at the start of a sphere file.
const MAGIC: [u8; 4] = *b"FHIR";

/// Version of the sphere file format.
const VERSION: u32 = 1;

/// Upper bound on the sample count field of a sphere file. Real data sets are a few
/// thousand measurements; anything above this is a corrupt header, and rejecting it
/// here keeps a bogus count from driving a huge allocation.
const MAX_SAMPLE_COUNT: u32 = 65536;

/// A single measured impulse response pair with the direction it was measured at.
#[derive(Debug, Clone, PartialEq)]
pub struct HrirSample {
    /// Elevation of the measurement, in degrees.
    pub elevation: f32,
    /// Azimuth of the measurement, in degrees.
    pub azimuth: f32,
    /// Impulse response of the left ear, [`HRIR_LEN`] samples.
    pub left: Vec<f32>,
    /// Impulse response of the right ear, [`HRIR_LEN`] samples.
    pub right: Vec<f32>,
}

/// Database of measured impulse responses spread over a sphere around the listener's
/// head.
#[derive(Debug, Default, PartialEq)]
pub struct HrirSphere {
    samples: Vec<HrirSample>,
    grid: Option<SampleGrid>,
}

impl HrirSphere {
    /// Creates an empty, not yet finalized database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a measured impulse response pair. Both impulse responses must be exactly
    /// [`HRIR_LEN`] samples long. Fails once the database is finalized.
    pub fn add(
        &mut self,
        elevation: f32,
        azimuth: f32,
        left: &[f32],
        right: &[f32],
    ) -> Result<(), BinauralError> {
        if self.grid.is_some() {
            return Err(BinauralError::AlreadyFinalized);
        }
        for ear in [left, right] {
            if ear.len() != HRIR_LEN {
                return Err(BinauralError::InvalidImpulseLength {
                    expected: HRIR_LEN,
                    actual: ear.len(),
                });
            }
        }
        self.samples.push(HrirSample {
            elevation,
            azimuth,
            left: left.to_vec(),
            right: right.to_vec(),
        });
        Ok(())
    }

    /// Adds a measured impulse response from interleaved stereo frames, see
    /// [`hrir_from_interleaved`].
    pub fn add_interleaved(
        &mut self,
        elevation: f32,
        azimuth: f32,
        frames: &[f32],
        swap_lr: bool,
    ) -> Result<(), BinauralError> {
        let (left, right) = hrir_from_interleaved(frames, swap_lr);
        self.add(elevation, azimuth, &left, &right)
    }

    /// Builds the spatial index over the sample directions. After this the database
    /// becomes immutable and ready for lookups. Fails on an empty database and when
    /// called twice.
    pub fn finalize(&mut self) -> Result<(), BinauralError> {
        if self.grid.is_some() {
            return Err(BinauralError::AlreadyFinalized);
        }
        if self.samples.is_empty() {
            return Err(BinauralError::EmptyDatabase);
        }

        let directions: Vec<(f32, f32)> = self
            .samples
            .iter()
            .map(|sample| (sample.elevation, sample.azimuth))
            .collect();
        let grid = SampleGrid::build(&directions)?;

        Log::info(format!(
            "Triangulated {} HRIR samples into {} triangles.",
            self.samples.len(),
            grid.triangles().len()
        ));

        self.grid = Some(grid);
        Ok(())
    }

    /// Returns true once [`Self::finalize`] succeeded.
    pub fn is_finalized(&self) -> bool {
        self.grid.is_some()
    }

    /// Returns the stored samples.
    pub fn samples(&self) -> &[HrirSample] {
        &self.samples
    }

    /// Returns the amount of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the database has no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Finds the three measurements closest to the given direction and their
    /// interpolation weights. Returns `None` when the database is not finalized or
    /// the direction is not covered by the measurements.
    pub fn lookup(&self, elevation: f32, azimuth: f32) -> Option<([&HrirSample; 3], [f32; 3])> {
        let grid = self.grid.as_ref()?;
        let hit = grid.lookup_triangle(elevation, azimuth)?;
        Some((
            [
                &self.samples[hit.samples[0] as usize],
                &self.samples[hit.samples[1] as usize],
                &self.samples[hit.samples[2] as usize],
            ],
            hit.weights,
        ))
    }

    /// Writes the finalized database in its flat binary form.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<(), BinauralError> {
        let grid = self.grid.as_ref().ok_or(BinauralError::NotFinalized)?;

        writer.write_all(&MAGIC)?;
        writer.write_u32::<LittleEndian>(VERSION)?;
        writer.write_u32::<LittleEndian>(HRIR_LEN as u32)?;
        writer.write_u32::<LittleEndian>(self.samples.len() as u32)?;

        for sample in self.samples.iter() {
            writer.write_f32::<LittleEndian>(sample.elevation)?;
            writer.write_f32::<LittleEndian>(sample.azimuth)?;
            for &value in sample.left.iter() {
                writer.write_f32::<LittleEndian>(value)?;
            }
            for &value in sample.right.iter() {
                writer.write_f32::<LittleEndian>(value)?;
            }
        }

        grid.write(writer)
    }

    /// Reads a database written by [`Self::save`]. The returned sphere is finalized
    /// with the index it was saved with, so queries are answered exactly as they were
    /// before saving.
    pub fn load<R: Read>(reader: &mut R) -> Result<Self, BinauralError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(BinauralError::InvalidFileFormat(
                "bad magic bytes".to_string(),
            ));
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(BinauralError::InvalidFileFormat(format!(
                "unsupported version {}",
                version
            )));
        }

        let length = reader.read_u32::<LittleEndian>()? as usize;
        if length != HRIR_LEN {
            return Err(BinauralError::InvalidFileFormat(format!(
                "unsupported impulse response length {}",
                length
            )));
        }

        let count = reader.read_u32::<LittleEndian>()?;
        if count == 0 {
            return Err(BinauralError::EmptyDatabase);
        }
        if count > MAX_SAMPLE_COUNT {
            return Err(BinauralError::InvalidFileFormat(format!(
                "sample count {} is out of range",
                count
            )));
        }

        let mut samples = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let elevation = reader.read_f32::<LittleEndian>()?;
            let azimuth = reader.read_f32::<LittleEndian>()?;
            let mut left = vec![0.0; HRIR_LEN];
            for value in left.iter_mut() {
                *value = reader.read_f32::<LittleEndian>()?;
            }
            let mut right = vec![0.0; HRIR_LEN];
            for value in right.iter_mut() {
                *value = reader.read_f32::<LittleEndian>()?;
            }
            samples.push(HrirSample {
                elevation,
                azimuth,
                left,
                right,
            });
        }

        let grid = SampleGrid::read(reader, count)?;

        Ok(Self {
            samples,
            grid: Some(grid),
        })
    }

    /// Saves the finalized database to a file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), BinauralError> {
        self.save(&mut BufWriter::new(File::create(path)?))
    }

    /// Loads a database from a file written by [`Self::save_to_file`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BinauralError> {
        Self::load(&mut BufReader::new(File::open(path)?))
    }
}

/// Mixes three impulse response pairs with the given weights into the output slices.
/// Weights are used as-is, the caller is responsible for them summing to one.
pub fn blend_hrir_samples(
    samples: [&HrirSample; 3],
    weights: [f32; 3],
    left: &mut [f32],
    right: &mut [f32],
) {
    for i in 0..left.len() {
        left[i] = samples[0].left[i] * weights[0]
            + samples[1].left[i] * weights[1]
            + samples[2].left[i] * weights[2];
    }
    for i in 0..right.len() {
        right[i] = samples[0].right[i] * weights[0]
            + samples[1].right[i] * weights[1]
            + samples[2].right[i] * weights[2];
    }
}

/// Splits decoded interleaved stereo frames into an impulse response pair of
/// [`HRIR_LEN`] samples per ear, truncating or zero-padding as needed. Some data sets
/// ship only one half of the sphere and expect the other half to be mirrored, which
/// is what `swap_lr` is for.
pub fn hrir_from_interleaved(frames: &[f32], swap_lr: bool) -> (Vec<f32>, Vec<f32>) {
    let mut left = vec![0.0; HRIR_LEN];
    let mut right = vec![0.0; HRIR_LEN];
    for (i, frame) in frames.chunks_exact(2).take(HRIR_LEN).enumerate() {
        left[i] = frame[0];
        right[i] = frame[1];
    }
    if swap_lr {
        std::mem::swap(&mut left, &mut right);
    }
    (left, right)
}
