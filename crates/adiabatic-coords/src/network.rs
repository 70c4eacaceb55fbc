//! Two-layer feed-forward surrogate networks
//!
//! A table holds normalization statistics, the hidden and output layer
//! weights with their biases, the hidden activation, and an optional
//! polynomial in log10(B). Evaluation is
//!
//! ```text
//! x̂ = (x − x̄) / sx
//! h = act(W·x̂ + w0)
//! ŷ = V·h + v0
//! y = ŷ·sy + ȳ
//! ```

use geomag_field::{MagFieldError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Tanh,
    /// Logistic 1 / (1 + e^-z)
    Sigmoid,
}

impl Activation {
    pub fn apply(self, z: f64) -> f64 {
        match self {
            Activation::Tanh => z.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-z).exp()),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Tanh => write!(f, "tanh"),
            Activation::Sigmoid => write!(f, "sigmoid"),
        }
    }
}

// ============================================================================
// Table
// ============================================================================

/// Weight table as stored on disk. `w` is nh rows of nx, `v` is ny rows of nh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateModel {
    #[serde(default)]
    pub name: String,
    pub x_bar: Vec<f64>,
    pub sx: Vec<f64>,
    pub y_bar: Vec<f64>,
    pub sy: Vec<f64>,
    pub w: Vec<Vec<f64>>,
    pub w0: Vec<f64>,
    pub v: Vec<Vec<f64>>,
    pub v0: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
    /// Descending coefficients of a correction polynomial in log10(B)
    #[serde(default)]
    pub poly_log10_b: Vec<f64>,
}

impl SurrogateModel {
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_json_reader(BufReader::new(file))
    }
}

// ============================================================================
// Compiled network
// ============================================================================

/// Validated, matrix form of a [`SurrogateModel`]. Immutable after build.
#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    x_bar: DVector<f64>,
    sx: DVector<f64>,
    y_bar: DVector<f64>,
    sy: DVector<f64>,
    w: DMatrix<f64>,
    w0: DVector<f64>,
    v: DMatrix<f64>,
    v0: DVector<f64>,
    activation: Activation,
    poly_log10_b: Vec<f64>,
}

fn malformed(name: &str, what: impl fmt::Display) -> MagFieldError {
    MagFieldError::NotInitialized(format!("surrogate table '{}': {}", name, what))
}

fn matrix(name: &str, label: &str, rows: &[Vec<f64>], ncols: usize) -> Result<DMatrix<f64>> {
    if rows.is_empty() {
        return Err(malformed(name, format!("{} has no rows", label)));
    }
    if let Some(bad) = rows.iter().position(|r| r.len() != ncols) {
        return Err(malformed(
            name,
            format!("{} row {} has {} columns, expected {}", label, bad, rows[bad].len(), ncols),
        ));
    }
    Ok(DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j]))
}

fn vector(name: &str, label: &str, values: &[f64], len: usize) -> Result<DVector<f64>> {
    if values.len() != len {
        return Err(malformed(
            name,
            format!("{} has length {}, expected {}", label, values.len(), len),
        ));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(malformed(name, format!("{} has non-finite entries", label)));
    }
    Ok(DVector::from_column_slice(values))
}

/// Horner evaluation of descending coefficients; empty gives 0.
pub fn polynomial_eval(coefs_descending: &[f64], x: f64) -> f64 {
    coefs_descending.iter().fold(0.0, |acc, c| acc * x + c)
}

impl Network {
    pub fn from_model(model: SurrogateModel) -> Result<Self> {
        let name = model.name.as_str();
        let nx = model.x_bar.len();
        let nh = model.w0.len();
        let ny = model.y_bar.len();
        if nx == 0 || nh == 0 || ny == 0 {
            return Err(malformed(name, format!("empty layer ({} x {} x {})", nx, nh, ny)));
        }

        let sx = vector(name, "sx", &model.sx, nx)?;
        let sy = vector(name, "sy", &model.sy, ny)?;
        if sx.iter().any(|s| *s == 0.0) {
            return Err(malformed(name, "zero input scale"));
        }
        let w = matrix(name, "w", &model.w, nx)?;
        if w.nrows() != nh {
            return Err(malformed(name, format!("w has {} rows, expected {}", w.nrows(), nh)));
        }
        let v = matrix(name, "v", &model.v, nh)?;
        if v.nrows() != ny {
            return Err(malformed(name, format!("v has {} rows, expected {}", v.nrows(), ny)));
        }

        Ok(Self {
            x_bar: vector(name, "x_bar", &model.x_bar, nx)?,
            y_bar: vector(name, "y_bar", &model.y_bar, ny)?,
            w0: vector(name, "w0", &model.w0, nh)?,
            v0: vector(name, "v0", &model.v0, ny)?,
            sx,
            sy,
            w,
            v,
            activation: model.activation,
            poly_log10_b: model.poly_log10_b,
            name: model.name,
        })
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_model(SurrogateModel::from_json_file(path)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_inputs(&self) -> usize {
        self.x_bar.len()
    }

    pub fn n_hidden(&self) -> usize {
        self.w0.len()
    }

    pub fn n_outputs(&self) -> usize {
        self.y_bar.len()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn has_polynomial(&self) -> bool {
        !self.poly_log10_b.is_empty()
    }

    /// Scale raw features with the training statistics.
    pub fn normalize(&self, features: &[f64]) -> Result<DVector<f64>> {
        if features.len() != self.n_inputs() {
            return Err(MagFieldError::InsufficientStorage {
                needed: self.n_inputs(),
                available: features.len(),
            });
        }
        if let Some(bad) = features.iter().find(|f| !f.is_finite()) {
            return Err(MagFieldError::OutOfRange(format!(
                "non-finite surrogate input {} for '{}'",
                bad, self.name
            )));
        }
        let x = DVector::from_column_slice(features);
        Ok((x - &self.x_bar).component_div(&self.sx))
    }

    /// Normalized outputs of both layers.
    pub fn forward(&self, x_hat: &DVector<f64>) -> DVector<f64> {
        let activation = self.activation;
        let h = (&self.w * x_hat + &self.w0).map(|z| activation.apply(z));
        &self.v * h + &self.v0
    }

    pub fn denormalize(&self, y_hat: &DVector<f64>) -> DVector<f64> {
        y_hat.component_mul(&self.sy) + &self.y_bar
    }

    pub fn evaluate(&self, features: &[f64]) -> Result<DVector<f64>> {
        let x_hat = self.normalize(features)?;
        Ok(self.denormalize(&self.forward(&x_hat)))
    }

    /// Correction term in log10(B); 0 when the table has none.
    pub fn polynomial(&self, log10_b: f64) -> f64 {
        polynomial_eval(&self.poly_log10_b, log10_b)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Network whose output ignores its inputs: y = y_bar.
    pub(crate) fn constant_model(name: &str, nx: usize, value: f64) -> SurrogateModel {
        SurrogateModel {
            name: name.to_string(),
            x_bar: vec![0.0; nx],
            sx: vec![1.0; nx],
            y_bar: vec![value],
            sy: vec![1.0],
            w: vec![vec![0.0; nx]; 2],
            w0: vec![0.0; 2],
            v: vec![vec![1.0, 1.0]],
            v0: vec![0.0],
            activation: Activation::Tanh,
            poly_log10_b: Vec::new(),
        }
    }

    fn scalar_model(activation: Activation) -> SurrogateModel {
        SurrogateModel {
            name: "scalar".to_string(),
            x_bar: vec![1.0],
            sx: vec![2.0],
            y_bar: vec![1.0],
            sy: vec![2.0],
            w: vec![vec![1.0]],
            w0: vec![0.0],
            v: vec![vec![1.0]],
            v0: vec![0.0],
            activation,
            poly_log10_b: Vec::new(),
        }
    }

    #[test]
    fn test_forward_tanh() {
        let net = Network::from_model(scalar_model(Activation::Tanh)).unwrap();
        // x̂ = (2 − 1) / 2
        let y = net.evaluate(&[2.0]).unwrap();
        assert!((y[0] - (1.0 + 2.0 * 0.5f64.tanh())).abs() < 1e-14);
    }

    #[test]
    fn test_forward_sigmoid() {
        let net = Network::from_model(scalar_model(Activation::Sigmoid)).unwrap();
        let y = net.evaluate(&[1.0]).unwrap();
        // sigmoid(0) = 0.5
        assert!((y[0] - 2.0).abs() < 1e-14);
    }

    #[test]
    fn test_hidden_layer_sums() {
        let model = SurrogateModel {
            name: "sum".to_string(),
            x_bar: vec![0.0, 0.0],
            sx: vec![1.0, 1.0],
            y_bar: vec![0.0],
            sy: vec![1.0],
            w: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
            w0: vec![0.0, 0.5, 0.0],
            v: vec![vec![1.0, 2.0, 3.0]],
            v0: vec![0.25],
            activation: Activation::Tanh,
            poly_log10_b: Vec::new(),
        };
        let net = Network::from_model(model).unwrap();
        assert_eq!((net.n_inputs(), net.n_hidden(), net.n_outputs()), (2, 3, 1));
        let (a, b): (f64, f64) = (0.3, -0.7);
        let expected = a.tanh() + 2.0 * (b + 0.5f64).tanh() + 3.0 * (a + b).tanh() + 0.25;
        let y = net.evaluate(&[a, b]).unwrap();
        assert!((y[0] - expected).abs() < 1e-14);
    }

    #[test]
    fn test_polynomial_eval() {
        assert_eq!(polynomial_eval(&[], 3.0), 0.0);
        assert_eq!(polynomial_eval(&[1.0, 2.0, 3.0], 2.0), 11.0);
        assert_eq!(polynomial_eval(&[-4.0], 7.0), -4.0);
    }

    #[test]
    fn test_malformed_tables_rejected() {
        let mut model = scalar_model(Activation::Tanh);
        model.w = vec![vec![1.0, 2.0]];
        assert!(matches!(
            Network::from_model(model).unwrap_err(),
            MagFieldError::NotInitialized(_)
        ));

        let mut model = scalar_model(Activation::Tanh);
        model.sx = vec![0.0];
        assert!(Network::from_model(model).is_err());

        let mut model = scalar_model(Activation::Tanh);
        model.v = vec![vec![1.0], vec![1.0]];
        assert!(Network::from_model(model).is_err());
    }

    #[test]
    fn test_input_validation() {
        let net = Network::from_model(scalar_model(Activation::Tanh)).unwrap();
        assert!(matches!(
            net.evaluate(&[1.0, 2.0]).unwrap_err(),
            MagFieldError::InsufficientStorage { needed: 1, available: 2 }
        ));
        assert!(matches!(
            net.evaluate(&[f64::NAN]).unwrap_err(),
            MagFieldError::OutOfRange(_)
        ));
    }

    #[test]
    fn test_table_json_defaults() {
        let json = r#"{
            "x_bar": [0.0], "sx": [1.0], "y_bar": [0.0], "sy": [1.0],
            "w": [[1.0]], "w0": [0.0], "v": [[1.0]], "v0": [0.0]
        }"#;
        let model = SurrogateModel::from_json_reader(json.as_bytes()).unwrap();
        assert_eq!(model.activation, Activation::Tanh);
        assert!(model.poly_log10_b.is_empty());
        let net = Network::from_model(model).unwrap();
        assert!(!net.has_polynomial());
        assert_eq!(net.polynomial(2.0), 0.0);
    }
}
