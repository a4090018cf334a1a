//! Position correction tables
//!
//! A correction table is a piecewise-linear calibration that maps raw
//! controller positions to corrected user positions. It is stored as a
//! two-column text file: a header line followed by up to 99 rows of
//! `coordinate<TAB>deviation`, ascending by coordinate:
//!
//! ```text
//! X       dX
//! 0       0
//! 5.0     0.01
//! 10.0    0.015
//! ```
//!
//! Both `X` and `X + dX` must be strictly increasing, which keeps the
//! inverse mapping well defined. Numbers always use `.` as the decimal
//! point regardless of the process locale.

use std::path::Path;

use tracing::{debug, error};

use crate::constants::MAX_CORRECTION_ROWS;
use crate::error::{Error, Result};

/// Loaded correction table
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionTable {
    x: Vec<f32>,
    dx: Vec<f32>,
}

impl CorrectionTable {
    /// Build a table from `(coordinate, deviation)` rows
    pub fn from_rows(rows: impl IntoIterator<Item = (f32, f32)>) -> Result<Self> {
        let mut table = Self {
            x: Vec::with_capacity(MAX_CORRECTION_ROWS),
            dx: Vec::with_capacity(MAX_CORRECTION_ROWS),
        };
        for (x, dx) in rows {
            table.push_row(x, dx)?;
        }
        table.check_len()?;
        Ok(table)
    }

    /// Parse the text form of a table
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();

        if tokens.next().is_none() || tokens.next().is_none() {
            return Err(reject("data error in calibration table file: missing header"));
        }

        let mut table = Self {
            x: Vec::with_capacity(MAX_CORRECTION_ROWS),
            dx: Vec::with_capacity(MAX_CORRECTION_ROWS),
        };

        while let Some(first) = tokens.next() {
            let second = tokens
                .next()
                .ok_or_else(|| reject("data error in calibration table file: odd number of values"))?;
            let x = parse_value(first)?;
            let dx = parse_value(second)?;
            table.push_row(x, dx)?;
        }

        table.check_len()?;
        Ok(table)
    }

    /// Read and parse a table file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            error!("error opening calibration table file {}: {}", path.display(), e);
            Error::Io(e)
        })?;
        let table = Self::parse(&text)?;
        debug!("Loaded correction table {} ({} rows)", path.display(), table.len());
        Ok(table)
    }

    fn push_row(&mut self, x: f32, dx: f32) -> Result<()> {
        if let (Some(&prev_x), Some(&prev_dx)) = (self.x.last(), self.dx.last()) {
            if x - prev_x <= 0.0 || (x + dx) - (prev_x + prev_dx) <= 0.0 {
                return Err(reject("the data in the table is not monotonous"));
            }
        }
        if self.x.len() + 1 >= MAX_CORRECTION_ROWS {
            return Err(reject("file contains more than 99 rows of data"));
        }
        self.x.push(x);
        self.dx.push(dx);
        Ok(())
    }

    fn check_len(&self) -> Result<()> {
        if self.x.len() < 2 {
            return Err(reject("too little data, at least 2 rows are required"));
        }
        Ok(())
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Iterate over `(coordinate, deviation)` rows
    pub fn rows(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.x.iter().copied().zip(self.dx.iter().copied())
    }

    /// Map a raw controller position to a corrected user position
    pub fn apply_forward(&self, position: f32) -> f32 {
        let n = self.x.len();
        let p = position as f64;

        if position <= self.x[0] {
            return (p + self.dx[0] as f64) as f32;
        }
        if position >= self.x[n - 1] {
            return (p + self.dx[n - 1] as f64) as f32;
        }

        let i = bracket(n, |k| self.x[k] as f64, p);
        let (x0, x1) = (self.x[i] as f64, self.x[i + 1] as f64);
        let (d0, d1) = (self.dx[i] as f64, self.dx[i + 1] as f64);

        (p + d0 + (d1 - d0) * (p - x0) / (x1 - x0)) as f32
    }

    /// Map a corrected user position back to a raw controller position
    pub fn apply_inverse(&self, position: f32) -> f32 {
        let n = self.x.len();
        let p = position as f64;
        let corrected = |k: usize| self.x[k] as f64 + self.dx[k] as f64;

        if p <= corrected(0) {
            return (p - self.dx[0] as f64) as f32;
        }
        if p >= corrected(n - 1) {
            return (p - self.dx[n - 1] as f64) as f32;
        }

        let i = bracket(n, corrected, p);
        let (x0, x1) = (self.x[i] as f64, self.x[i + 1] as f64);
        let (d0, d1) = (self.dx[i] as f64, self.dx[i + 1] as f64);
        let slope = (d1 - d0) / (x1 - x0);

        // p = x + d0 + slope * (x - x0), solved for x; 1 + slope > 0 by monotonicity
        ((p - d0 + slope * x0) / (1.0 + slope)) as f32
    }
}

/// Index `i` with `key(i) <= value < key(i + 1)`, for `key(0) < value < key(n - 1)`
fn bracket(n: usize, key: impl Fn(usize) -> f64, value: f64) -> usize {
    let (mut lo, mut hi) = (0, n - 1);
    while hi - lo > 1 {
        let mid = lo + ((hi - lo) >> 1);
        if value >= key(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

fn parse_value(token: &str) -> Result<f32> {
    match token.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(reject(&format!("data error in calibration table file: '{}'", token))),
    }
}

fn reject(msg: &str) -> Error {
    error!("{}", msg);
    Error::CorrectionTable(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const TABLE: &str = "X\tdX\n0\t0\n5\t0.01\n10\t0.03\n20\t-0.02\n";

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_parse_valid_table() {
        let table = CorrectionTable::parse(TABLE).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.rows().nth(1), Some((5.0, 0.01)));
    }

    #[test]
    fn test_reject_non_monotonic_coordinate() {
        let result = CorrectionTable::parse("X dX\n0 0\n5 0.01\n4 0.02\n");
        assert!(matches!(result, Err(Error::CorrectionTable(_))));
    }

    #[test]
    fn test_reject_non_monotonic_corrected() {
        // 1 + (-2) < 0 + 0
        let result = CorrectionTable::parse("X dX\n0 0\n1 -2\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_reject_malformed() {
        assert!(CorrectionTable::parse("").is_err());
        assert!(CorrectionTable::parse("X dX\n0 0\n1 abc\n").is_err());
        assert!(CorrectionTable::parse("X dX\n0 0\n1\n").is_err());
        assert!(CorrectionTable::parse("X dX\n0 0\n1 nan\n").is_err());
    }

    #[test]
    fn test_reject_too_few_rows() {
        assert!(CorrectionTable::parse("X dX\n0 0\n").is_err());
        assert!(CorrectionTable::parse("X dX\n").is_err());
    }

    #[test]
    fn test_row_limit() {
        let mut text = String::from("X dX\n");
        for i in 0..99 {
            text.push_str(&format!("{} 0\n", i));
        }
        assert_eq!(CorrectionTable::parse(&text).unwrap().len(), 99);

        text.push_str("99 0\n");
        assert!(CorrectionTable::parse(&text).is_err());
    }

    #[test]
    fn test_forward_edges_use_constant_offset() {
        let table = CorrectionTable::parse(TABLE).unwrap();
        assert!(approx(table.apply_forward(-3.0), -3.0));
        assert!(approx(table.apply_forward(25.0), 24.98));
        assert!(approx(table.apply_forward(20.0), 19.98));
    }

    #[test]
    fn test_forward_interpolates() {
        let table = CorrectionTable::parse(TABLE).unwrap();
        assert!(approx(table.apply_forward(2.5), 2.505));
        assert!(approx(table.apply_forward(7.5), 7.52));
        assert!(approx(table.apply_forward(5.0), 5.01));
    }

    #[test]
    fn test_inverse_edges() {
        let table = CorrectionTable::parse(TABLE).unwrap();
        assert!(approx(table.apply_inverse(-3.0), -3.0));
        assert!(approx(table.apply_inverse(24.98), 25.0));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();

        let table = CorrectionTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 4);
        assert!(CorrectionTable::load("/nonexistent/ximc/table.txt").is_err());
    }

    #[test]
    fn test_from_rows() {
        let table = CorrectionTable::from_rows([(0.0, 0.0), (1.0, 0.5)]).unwrap();
        assert_eq!(table.len(), 2);
        assert!(CorrectionTable::from_rows([(0.0, 0.0)]).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn table_strategy() -> impl Strategy<Value = CorrectionTable> {
            proptest::collection::vec((0.1f32..10.0, -0.05f32..0.05), 2..40).prop_map(|steps| {
                let mut x = 0.0f32;
                let mut rows = Vec::new();
                for (step, dx) in steps {
                    rows.push((x, dx));
                    x += step;
                }
                rows
            })
            .prop_filter_map("monotonic corrected coordinates", |rows| CorrectionTable::from_rows(rows).ok())
        }

        proptest! {
            #[test]
            fn inverse_undoes_forward(table in table_strategy(), t in 0.001f64..0.999) {
                let (first, _) = table.rows().next().unwrap();
                let (last, _) = table.rows().last().unwrap();
                let x = (first as f64 + (last - first) as f64 * t) as f32;

                let back = table.apply_inverse(table.apply_forward(x));
                prop_assert!((back - x).abs() < 1e-3, "x={} back={}", x, back);
            }
        }
    }
}
