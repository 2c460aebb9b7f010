//! Calibration input file.
//!
//! The file is a stream of whitespace-separated tokens; `#` starts a comment
//! that runs to the end of the line. Vectors are length-prefixed
//! (`3 2.75 14.13 -49.8`). The layout is:
//!
//! ```text
//! camera_position  image_size  [pov_min  pov_max]
//! N  (real pixel) x N
//! M  (real pixel) x M        # optional held-out set
//! ```
//!
//! Real positions have three components, or two meaning `(x, z)` on the ground.

use nalgebra::{Vector2, Vector3};
use std::fs;

pub mod params;

pub use crate::camera::PovBox;
pub use crate::optimization::Correspondences;

use crate::camera::{CalibrationError, CameraConfig, Resolution};

/// Everything read from a calibration input file.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationInput {
    pub camera: CameraConfig,
    /// Search box for the ray model's point of view, when the file has one
    pub pov_box: Option<PovBox>,
    pub training: Correspondences,
    /// Held-out pairs, possibly empty
    pub test: Correspondences,
}

impl CalibrationInput {
    /// Reads and parses an input file.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::IOError`] if the file cannot be read.
    /// * See [`CalibrationInput::parse`].
    pub fn load(path: &str) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            CalibrationError::IOError(format!("cannot read input file '{path}': {e}"))
        })?;
        Self::parse(&contents)
    }

    /// Parses input file contents.
    ///
    /// The point-of-view box is optional. A reading with the box is tried first
    /// and the plain reading second; whichever consumes every token wins.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::ParseError`] for a malformed token, with its line.
    /// * [`CalibrationError::NullOrMissingInput`] when the file ends early or the
    ///   training set is empty.
    /// * [`CalibrationError::ShapeMismatch`] / [`CalibrationError::InvalidParams`]
    ///   for vectors of the wrong length or an unusable camera.
    pub fn parse(text: &str) -> Result<Self, CalibrationError> {
        let tokens = tokenize(text);
        let with_box = Reader::new(&tokens).read_input(true);
        let boxed_failure = match with_box {
            Ok(input) => return Ok(input),
            Err(failure) => failure,
        };
        match Reader::new(&tokens).read_input(false) {
            Ok(input) => Ok(input),
            // Report the reading that got further into the file.
            Err(plain) if plain.at >= boxed_failure.at => Err(plain.error),
            Err(_) => Err(boxed_failure.error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token<'a> {
    text: &'a str,
    line: usize,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    text.lines()
        .enumerate()
        .flat_map(|(index, line)| {
            let content = line.split('#').next().unwrap_or("");
            content.split_whitespace().map(move |text| Token {
                text,
                line: index + 1,
            })
        })
        .collect()
}

struct Failure {
    at: usize,
    error: CalibrationError,
}

struct Reader<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
}

impl<'t, 'a> Reader<'t, 'a> {
    fn new(tokens: &'t [Token<'a>]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn read_input(mut self, with_box: bool) -> Result<CalibrationInput, Failure> {
        self.read_sections(with_box).map_err(|error| Failure {
            at: self.pos,
            error,
        })
    }

    fn read_sections(&mut self, with_box: bool) -> Result<CalibrationInput, CalibrationError> {
        let position = self.vector("camera position", &[3])?;
        let size = self.vector("image size", &[2])?;
        let resolution = Resolution {
            width: pixel_count(size[0], "image width")?,
            height: pixel_count(size[1], "image height")?,
        };
        let camera = CameraConfig::new(
            Vector3::new(position[0], position[1], position[2]),
            resolution,
        )?;

        let pov_box = if with_box {
            let min = self.vector("point-of-view box minimum", &[3])?;
            let max = self.vector("point-of-view box maximum", &[3])?;
            Some(PovBox::new(
                Vector3::from_column_slice(&min),
                Vector3::from_column_slice(&max),
            )?)
        } else {
            None
        };

        let (real, pixel) = self.pairs("training")?;
        let training = Correspondences::try_new(real, pixel).map_err(|e| match e {
            CalibrationError::NullOrMissingInput(_) => CalibrationError::NullOrMissingInput(
                "training set has no correspondences".to_string(),
            ),
            other => other,
        })?;

        let test = if self.at_end() {
            Correspondences::held_out(Vec::new(), Vec::new())?
        } else {
            let (real, pixel) = self.pairs("test")?;
            Correspondences::held_out(real, pixel)?
        };

        if let Some(token) = self.tokens.get(self.pos) {
            return Err(CalibrationError::ParseError {
                line: token.line,
                message: format!("unexpected trailing token '{}'", token.text),
            });
        }

        Ok(CalibrationInput {
            camera,
            pov_box,
            training,
            test,
        })
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn next(&mut self, what: &str) -> Result<&'t Token<'a>, CalibrationError> {
        let token = self.tokens.get(self.pos).ok_or_else(|| {
            CalibrationError::NullOrMissingInput(format!("file ends before the {what}"))
        })?;
        self.pos += 1;
        Ok(token)
    }

    fn number(&mut self, what: &str) -> Result<f64, CalibrationError> {
        let token = self.next(what)?;
        match token.text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(CalibrationError::ParseError {
                line: token.line,
                message: format!("expected a number for the {what}, found '{}'", token.text),
            }),
        }
    }

    fn count(&mut self, what: &str) -> Result<usize, CalibrationError> {
        let token = self.next(what)?;
        token
            .text
            .parse::<usize>()
            .map_err(|_| CalibrationError::ParseError {
                line: token.line,
                message: format!("expected a count for the {what}, found '{}'", token.text),
            })
    }

    /// Reads a length-prefixed vector whose length is one of `allowed`.
    fn vector(&mut self, what: &str, allowed: &[usize]) -> Result<Vec<f64>, CalibrationError> {
        let line = self.tokens.get(self.pos).map(|t| t.line);
        let len = self.count(&format!("{what} length"))?;
        if !allowed.contains(&len) {
            return Err(CalibrationError::ParseError {
                line: line.unwrap_or(0),
                message: format!("{what} has {len} components, expected {allowed:?}"),
            });
        }
        (0..len).map(|_| self.number(what)).collect()
    }

    fn pairs(
        &mut self,
        section: &str,
    ) -> Result<(Vec<Vector3<f64>>, Vec<Vector2<f64>>), CalibrationError> {
        let n = self.count(&format!("{section} correspondence count"))?;
        let mut real = Vec::with_capacity(n);
        let mut pixel = Vec::with_capacity(n);
        for i in 0..n {
            let r = self.vector(&format!("{section} real position #{i}"), &[2, 3])?;
            real.push(match r.len() {
                2 => Vector3::new(r[0], 0.0, r[1]),
                _ => Vector3::new(r[0], r[1], r[2]),
            });
            let p = self.vector(&format!("{section} pixel position #{i}"), &[2])?;
            pixel.push(Vector2::new(p[0], p[1]));
        }
        Ok((real, pixel))
    }
}

fn pixel_count(value: f64, what: &str) -> Result<u32, CalibrationError> {
    if value.fract() != 0.0 || value < 1.0 || value > u32::MAX as f64 {
        return Err(CalibrationError::InvalidParams(format!(
            "{what} must be a positive whole number of pixels, found {value}"
        )));
    }
    Ok(value as u32)
}
