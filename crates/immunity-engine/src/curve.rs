//! Dose-to-immunity response curves.

use immunity_core::{validate_control_points, ControlPoint, CurveConfig, Regimen, SimError};

/// Piecewise-linear efficacy curves for both regimens, tabulated per day.
///
/// Both curves are assembled from one shared prefix and a tail per regimen,
/// so they agree up to the end of the prefix. Past the last control point a
/// curve stays at its last value.
#[derive(Clone, Debug, PartialEq)]
pub struct EfficacyCurve {
    one_dose: Vec<f64>,
    two_dose: Vec<f64>,
}

impl EfficacyCurve {
    pub fn new(
        shared: &[ControlPoint],
        one_dose_tail: &[ControlPoint],
        two_dose_tail: &[ControlPoint],
    ) -> Result<Self, SimError> {
        Ok(Self {
            one_dose: tabulate(shared, one_dose_tail)?,
            two_dose: tabulate(shared, two_dose_tail)?,
        })
    }

    pub fn from_config(cfg: &CurveConfig) -> Result<Self, SimError> {
        Self::new(&cfg.shared, &cfg.one_dose, &cfg.two_dose)
    }

    fn table(&self, regimen: Regimen) -> &[f64] {
        match regimen {
            Regimen::OneDose => &self.one_dose,
            Regimen::TwoDose => &self.two_dose,
        }
    }

    /// Last control day of the regimen's curve.
    pub fn max_control_day(&self, regimen: Regimen) -> usize {
        self.table(regimen).len().saturating_sub(1)
    }

    /// Immunity `day` whole days after the first shot.
    pub fn at_day(&self, regimen: Regimen, day: usize) -> f64 {
        let t = self.table(regimen);
        match t.get(day) {
            Some(v) => *v,
            None => t.last().copied().unwrap_or(0.0),
        }
    }

    /// Immunity after `days` (possibly fractional) days. Negative or
    /// non-finite offsets mean the shot has not happened yet.
    pub fn efficacy(&self, regimen: Regimen, days: f64) -> f64 {
        if days.is_nan() || days < 0.0 {
            return 0.0;
        }
        let t = self.table(regimen);
        let last = t.len().saturating_sub(1);
        if days >= last as f64 {
            return t.last().copied().unwrap_or(0.0);
        }
        let lo = days.floor() as usize;
        let frac = days - lo as f64;
        t[lo] + (t[lo + 1] - t[lo]) * frac
    }
}

/// Validate `shared + tail` and sample it at every whole day up to its last
/// control day.
fn tabulate(shared: &[ControlPoint], tail: &[ControlPoint]) -> Result<Vec<f64>, SimError> {
    let points: Vec<ControlPoint> = shared.iter().chain(tail).copied().collect();
    validate_control_points(&points)?;
    let last_day = points.last().map_or(0, |p| p.day as usize);
    let mut out = Vec::with_capacity(last_day + 1);
    let mut seg = 0;
    for day in 0..=last_day {
        while seg + 1 < points.len() && points[seg + 1].day as usize <= day {
            seg += 1;
        }
        let a = points[seg];
        let value = match points.get(seg + 1) {
            Some(b) => {
                let span = f64::from(b.day - a.day);
                let t = (day as f64 - f64::from(a.day)) / span;
                a.immunity + (b.immunity - a.immunity) * t
            }
            None => a.immunity,
        };
        out.push(value);
    }
    Ok(out)
}
