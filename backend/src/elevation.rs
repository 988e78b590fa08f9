//! Component B: the elevation oracle.
//!
//! A single operation, `elevation(lat, lng) -> meters | missing`, backed by a
//! process-wide, lazily initialized, resident tile cache keyed by 1x1 degree
//! tile. Tile fetching/download is explicitly out of scope (spec §1): this
//! module only consumes tiles already present on disk, in the ArcASCII grid
//! format the teacher's `dem.rs` already parses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElevationError {
    #[error("failed to open DEM tile {path:?}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("DEM tile missing header field `{0}`")]
    MissingHeader(&'static str),
    #[error("DEM tile has invalid numeric header for `{field}`: {source}")]
    InvalidHeader {
        field: &'static str,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("DEM grid has {expected} cells but file provided {actual}")]
    UnexpectedCellCount { expected: usize, actual: usize },
}

pub trait ElevationOracle: Send + Sync {
    fn elevation(&self, lat: f64, lng: f64) -> Option<f64>;
}

/// A single ArcASCII (`.asc`) elevation grid tile, the format grounded on the
/// teacher's `dem.rs::ArcAsciiDem`.
#[derive(Debug)]
pub struct DemTile {
    ncols: usize,
    nrows: usize,
    xllcorner: f64,
    yllcorner: f64,
    cellsize: f64,
    nodata: f64,
    lat_max: f64,
    lon_max: f64,
    values: Vec<f64>,
}

impl DemTile {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ElevationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ElevationError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        let mut lines = text.lines();

        let mut ncols = None;
        let mut nrows = None;
        let mut xllcorner = None;
        let mut yllcorner = None;
        let mut cellsize = None;
        let mut nodata = None;

        for _ in 0..6 {
            let Some(line) = lines.next() else { break };
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else { continue };
            let Some(value) = parts.next() else { continue };
            match key.to_lowercase().as_str() {
                "ncols" => ncols = value.parse::<usize>().ok(),
                "nrows" => nrows = value.parse::<usize>().ok(),
                "xllcorner" | "xllcenter" => {
                    xllcorner = Some(value.parse().map_err(|source| ElevationError::InvalidHeader {
                        field: "xllcorner",
                        source,
                    })?)
                }
                "yllcorner" | "yllcenter" => {
                    yllcorner = Some(value.parse().map_err(|source| ElevationError::InvalidHeader {
                        field: "yllcorner",
                        source,
                    })?)
                }
                "cellsize" => {
                    cellsize = Some(value.parse().map_err(|source| ElevationError::InvalidHeader {
                        field: "cellsize",
                        source,
                    })?)
                }
                "nodata_value" => nodata = value.parse().ok(),
                _ => {}
            }
        }

        let ncols = ncols.ok_or(ElevationError::MissingHeader("ncols"))?;
        let nrows = nrows.ok_or(ElevationError::MissingHeader("nrows"))?;
        let xllcorner: f64 = xllcorner.ok_or(ElevationError::MissingHeader("xllcorner"))?;
        let yllcorner: f64 = yllcorner.ok_or(ElevationError::MissingHeader("yllcorner"))?;
        let cellsize: f64 = cellsize.ok_or(ElevationError::MissingHeader("cellsize"))?;
        let nodata = nodata.unwrap_or(-9999.0);

        let mut values = Vec::with_capacity(ncols * nrows);
        for line in lines {
            for token in line.split_whitespace() {
                values.push(token.parse::<f64>().unwrap_or(nodata));
            }
        }
        let expected = ncols * nrows;
        if values.len() != expected {
            return Err(ElevationError::UnexpectedCellCount {
                expected,
                actual: values.len(),
            });
        }

        let lat_max = yllcorner + cellsize * ((nrows - 1) as f64);
        let lon_max = xllcorner + cellsize * ((ncols - 1) as f64);

        Ok(Self {
            ncols,
            nrows,
            xllcorner,
            yllcorner,
            cellsize,
            nodata,
            lat_max,
            lon_max,
            values,
        })
    }

    fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        let v = self.values[row * self.ncols + col];
        if (v - self.nodata).abs() < f64::EPSILON {
            None
        } else {
            Some(v)
        }
    }

    fn sample(&self, lat: f64, lng: f64) -> Option<f64> {
        if lng < self.xllcorner || lng > self.lon_max || lat < self.yllcorner || lat > self.lat_max {
            return None;
        }
        let col = ((lng - self.xllcorner) / self.cellsize).clamp(0.0, (self.ncols - 1) as f64);
        let row = ((self.lat_max - lat) / self.cellsize).clamp(0.0, (self.nrows - 1) as f64);

        let x0 = col.floor() as usize;
        let y0 = row.floor() as usize;
        let x1 = (x0 + 1).min(self.ncols - 1);
        let y1 = (y0 + 1).min(self.nrows - 1);

        let (q11, q21, q12, q22) = (self.value(y0, x0), self.value(y0, x1), self.value(y1, x0), self.value(y1, x1));
        let tx = col - x0 as f64;
        let ty = row - y0 as f64;
        match (q11, q21, q12, q22) {
            (Some(a), Some(b), Some(c), Some(d)) => {
                let top = a * (1.0 - tx) + b * tx;
                let bottom = c * (1.0 - tx) + d * tx;
                Some(top * (1.0 - ty) + bottom * ty)
            }
            _ => {
                let vals: Vec<f64> = [q11, q21, q12, q22].into_iter().flatten().collect();
                if vals.is_empty() {
                    None
                } else {
                    Some(vals.iter().sum::<f64>() / vals.len() as f64)
                }
            }
        }
    }
}

fn tile_key(lat: f64, lng: f64) -> (i32, i32) {
    (lat.floor() as i32, lng.floor() as i32)
}

/// Lazily loads and caches 1x1 degree DEM tiles from a directory of files
/// named `<lat>_<lng>.asc` (floor of the tile's southwest corner), serializing
/// tile loads behind a mutex so it is safe to call from any worker.
pub struct DemElevationOracle {
    dir: PathBuf,
    cache: Mutex<HashMap<(i32, i32), Option<DemTile>>>,
}

impl DemElevationOracle {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn tile_path(&self, key: (i32, i32)) -> PathBuf {
        self.dir.join(format!("{}_{}.asc", key.0, key.1))
    }
}

impl ElevationOracle for DemElevationOracle {
    fn elevation(&self, lat: f64, lng: f64) -> Option<f64> {
        let key = tile_key(lat, lng);
        let mut cache = self.cache.lock().unwrap();
        let tile = cache.entry(key).or_insert_with(|| {
            let path = self.tile_path(key);
            match DemTile::from_path(&path) {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::debug!(?key, error = %e, "no DEM tile available");
                    None
                }
            }
        });
        tile.as_ref().and_then(|t| t.sample(lat, lng))
    }
}

/// Test/fixture oracle returning a constant elevation everywhere.
pub struct ConstantElevationOracle(pub f64);

impl ElevationOracle for ConstantElevationOracle {
    fn elevation(&self, _lat: f64, _lng: f64) -> Option<f64> {
        Some(self.0)
    }
}
