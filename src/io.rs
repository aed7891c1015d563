//! FITS persistence of cubes, phase maps and spectra.
//!
//! Only the primary HDU is used. Header cards are carried through [`Header`]; cards the
//! pipeline does not know are dropped on reading, `HISTORY` entries are kept.

use std::path::{Path, PathBuf};

use fitrs::{Fits, FitsData, FitsDataArray, Hdu};
use log::debug;
use ndarray::{Array1, Array2, Array3};

use crate::cube::Cube;
use crate::error::{PipelineError, Result};
use crate::extract::ReferenceSpectrum;
use crate::header::{Header, HeaderValue, keys};
use crate::phasemap::PhaseMap;

const HISTORY: &str = "HISTORY";

/// Image of the primary HDU with its shape in array order (slowest axis first).
fn read_primary(path: &Path) -> Result<(Vec<usize>, Vec<f64>, Header)> {
    let fits = Fits::open(path)?;
    let hdu = fits
        .get(0)
        .ok_or_else(|| PipelineError::InvalidData(format!("{} has no primary HDU", path.display())))?;

    let (shape, data): (Vec<usize>, Vec<f64>) = match hdu.read_data() {
        FitsData::FloatingPoint32(FitsDataArray { shape, data }) => {
            (shape, data.iter().map(|&v| f64::from(v)).collect())
        }
        FitsData::FloatingPoint64(FitsDataArray { shape, data }) => (shape, data.clone()),
        FitsData::IntegersI32(FitsDataArray { shape, data }) => (
            shape,
            data.iter()
                .map(|v| v.map_or(f64::NAN, f64::from))
                .collect(),
        ),
        FitsData::IntegersU32(FitsDataArray { shape, data }) => (
            shape,
            data.iter()
                .map(|v| v.map_or(f64::NAN, f64::from))
                .collect(),
        ),
        _ => {
            return Err(PipelineError::InvalidData(format!(
                "{} does not hold a numeric image",
                path.display()
            )));
        }
    };
    let shape = shape.iter().rev().copied().collect();

    let mut header = Header::new();
    for &key in keys::ALL {
        let value = match hdu.value(key) {
            Some(fitrs::HeaderValue::RealFloatingNumber(v)) => HeaderValue::Float(*v),
            Some(fitrs::HeaderValue::IntegerNumber(v)) => HeaderValue::Int(i64::from(*v)),
            Some(fitrs::HeaderValue::CharacterString(v)) => HeaderValue::Str(v.trim().to_owned()),
            _ => continue,
        };
        header.set(key, value);
    }
    for (key, value) in hdu.iter() {
        if let (HISTORY, Some(fitrs::HeaderValue::CharacterString(entry))) =
            (key.as_str(), value)
        {
            header.add_history(entry.trim());
        }
    }
    debug!("Read {} with shape {shape:?}.", path.display());
    Ok((shape, data, header))
}

fn write_primary(path: &Path, shape: &[usize], data: Vec<f64>, header: &Header) -> Result<()> {
    // FITS lists the fastest axis first
    let fits_shape: Vec<usize> = shape.iter().rev().copied().collect();
    let mut hdu = Hdu::new(&fits_shape, data);
    for (key, value) in header.iter() {
        if key.starts_with("NAXIS") {
            continue;
        }
        match value {
            HeaderValue::Float(v) => hdu.insert(key, *v),
            HeaderValue::Int(v) => match i32::try_from(*v) {
                Ok(v) => hdu.insert(key, v),
                Err(_) => hdu.insert(key, *v as f64),
            },
            HeaderValue::Str(v) => hdu.insert(key, v.as_str()),
        }
    }
    // fitrs writes every card with a value indicator, so history reads back as strings
    for entry in header.history() {
        hdu.insert(HISTORY, entry.as_str());
    }
    Fits::create(path, hdu)?;
    debug!("Wrote {} with shape {shape:?}.", path.display());
    Ok(())
}

fn shape_error(path: &Path, expected: usize, shape: &[usize]) -> PipelineError {
    PipelineError::DimensionMismatch(format!(
        "{} is {}-dimensional, expected {expected} axes",
        path.display(),
        shape.len()
    ))
}

/// Read a data-cube.
pub fn read_cube(path: impl AsRef<Path>) -> Result<Cube> {
    let path = path.as_ref();
    let (shape, data, header) = read_primary(path)?;
    let &[depth, height, width] = shape.as_slice() else {
        return Err(shape_error(path, 3, &shape));
    };
    let data = Array3::from_shape_vec((depth, height, width), data)
        .map_err(|e| PipelineError::InvalidData(e.to_string()))?;
    Cube::new(data, header)
}

/// Write a data-cube.
pub fn write_cube(path: impl AsRef<Path>, cube: &Cube) -> Result<()> {
    let data = cube.data();
    write_primary(
        path.as_ref(),
        data.shape(),
        data.iter().copied().collect(),
        cube.header(),
    )
}

fn read_image(path: &Path) -> Result<(Array2<f64>, Header)> {
    let (shape, data, header) = read_primary(path)?;
    let &[height, width] = shape.as_slice() else {
        return Err(shape_error(path, 2, &shape));
    };
    let data = Array2::from_shape_vec((height, width), data)
        .map_err(|e| PipelineError::InvalidData(e.to_string()))?;
    Ok((data, header))
}

/// Read a phase map; the header must carry the phase map cards.
pub fn read_phase_map(path: impl AsRef<Path>) -> Result<PhaseMap> {
    let (data, header) = read_image(path.as_ref())?;
    PhaseMap::from_parts(data, &header)
}

/// Write a phase map, observed, fitted or residual.
pub fn write_phase_map(path: impl AsRef<Path>, map: &PhaseMap) -> Result<()> {
    write_primary(
        path.as_ref(),
        map.data.shape(),
        map.data.iter().copied().collect(),
        &map.to_header(),
    )
}

/// Write the reference spectrum with its spectral calibration.
pub fn write_spectrum(path: impl AsRef<Path>, spectrum: &ReferenceSpectrum) -> Result<()> {
    write_primary(
        path.as_ref(),
        &[spectrum.values.len()],
        spectrum.values.to_vec(),
        &spectrum.to_header(),
    )
}

/// Read a one-dimensional spectrum and its header.
pub fn read_spectrum(path: impl AsRef<Path>) -> Result<(Array1<f64>, Header)> {
    let path = path.as_ref();
    let (shape, data, header) = read_primary(path)?;
    if shape.len() != 1 {
        return Err(shape_error(path, 1, &shape));
    }
    Ok((Array1::from(data), header))
}

/// Output file name next to `input`: `scan.fits` becomes `scan<suffix>.fits`.
pub fn derived_path(input: impl AsRef<Path>, suffix: &str) -> PathBuf {
    let input = input.as_ref();
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}{suffix}.fits"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::center::RefPixel;
    use crate::phasemap::PhaseMapKind;
    use crate::synthetic::AiryCube;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("samfp-io-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn cube_roundtrip() {
        let mut cube = AiryCube::default()
            .with_shape(7, 5, 24)
            .with_sampling(-0.5)
            .build()
            .unwrap();
        cube.header_mut().add_history("zcut: channels 3 to -1");
        cube.header_mut().add_history("phmapply: scan--fit_phmap.fits");
        let path = scratch("cube.fits");
        write_cube(&path, &cube).unwrap();
        let back = read_cube(&path).unwrap();

        assert_eq!(back.data(), cube.data());
        assert_eq!(back.sampling(), -0.5);
        assert_eq!(back.units(), "bcv");
        assert_eq!(back.header().get_i64(keys::NAXIS1), Some(7));
        assert_eq!(back.header().history(), cube.header().history());
    }

    #[test]
    fn phase_map_roundtrip() {
        let data = Array2::from_shape_fn((4, 6), |(y, x)| (x + 10 * y) as f64 * 0.5);
        let mut map = PhaseMap::new(
            data,
            PhaseMapKind::Observed,
            RefPixel::new(2, 3),
            12.,
            0.5,
            "bcv",
        )
        .unwrap();
        map.source = Some("scan.fits".to_owned());
        let path = scratch("phmap.fits");
        write_phase_map(&path, &map).unwrap();
        let back = read_phase_map(&path).unwrap();

        assert_eq!(back.data, map.data);
        assert_eq!(back.ref_pixel, RefPixel::new(2, 3));
        assert_eq!(back.kind, PhaseMapKind::Observed);
        assert_eq!(back.source.as_deref(), Some("scan.fits"));
        assert_eq!(back.fsr, 12.);
    }

    #[test]
    fn saved_phase_map_is_zero_at_reference() {
        let data = Array2::from_shape_fn((5, 7), |(y, x)| 3.25 + 0.1 * (x * x + y) as f64);
        let mut map = PhaseMap::new(
            data,
            PhaseMapKind::ParabolaFit,
            RefPixel::new(4, 1),
            24.,
            1.,
            "bcv",
        )
        .unwrap();
        assert_ne!(map.reference_value(), 0.);
        map.zero_at_reference();
        let path = scratch("zeroed.fits");
        write_phase_map(&path, &map).unwrap();
        let back = read_phase_map(&path).unwrap();

        assert_eq!(back.ref_pixel, RefPixel::new(4, 1));
        assert_eq!(back.value(4, 1), 0.);
        assert_eq!(back.data, map.data);
    }

    #[test]
    fn wrong_dimensionality() {
        let cube = AiryCube::default().with_shape(3, 3, 8).build().unwrap();
        let path = scratch("not-a-map.fits");
        write_cube(&path, &cube).unwrap();
        assert!(matches!(
            read_phase_map(&path),
            Err(PipelineError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            read_cube(scratch("missing.fits")),
            Err(PipelineError::Io(_))
        ));
    }

    #[test]
    fn derived_names() {
        assert_eq!(
            derived_path("/data/scan.fits", "--obs_phmap"),
            PathBuf::from("/data/scan--obs_phmap.fits")
        );
    }
}
