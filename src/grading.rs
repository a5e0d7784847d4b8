use serde::{Deserialize, Serialize};
use std::fmt;

pub const CA1_MAX: f64 = 10.0;
pub const CA2_MAX: f64 = 10.0;
pub const MID_TERM_MAX: f64 = 20.0;
pub const END_TERM_MAX: f64 = 60.0;

/// Per-mark letter grade, banded on the component total (out of 100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GradeLabel {
    #[serde(rename = "F")]
    F,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl GradeLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeLabel::APlus => "A+",
            GradeLabel::A => "A",
            GradeLabel::B => "B",
            GradeLabel::C => "C",
            GradeLabel::D => "D",
            GradeLabel::F => "F",
        }
    }
}

impl fmt::Display for GradeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive lower bounds. Range checks belong to the caller.
pub fn grade(total: f64) -> GradeLabel {
    if total >= 90.0 {
        GradeLabel::APlus
    } else if total >= 80.0 {
        GradeLabel::A
    } else if total >= 70.0 {
        GradeLabel::B
    } else if total >= 60.0 {
        GradeLabel::C
    } else if total >= 50.0 {
        GradeLabel::D
    } else {
        GradeLabel::F
    }
}

/// GPA-like band used only for semester summaries. Not interchangeable with
/// [`GradeLabel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpaBand {
    pub points: f64,
    pub letter: &'static str,
}

impl fmt::Display for GpaBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} ({})", self.points, self.letter)
    }
}

pub fn gpa_band(percentage: f64) -> GpaBand {
    let (points, letter) = if percentage >= 90.0 {
        (4.0, "A+")
    } else if percentage >= 80.0 {
        (3.5, "A")
    } else if percentage >= 70.0 {
        (3.0, "B")
    } else if percentage >= 60.0 {
        (2.5, "C")
    } else if percentage >= 50.0 {
        (2.0, "D")
    } else {
        (1.0, "F")
    };
    GpaBand { points, letter }
}

/// The four assessment components of one mark row. `None` means "not entered",
/// which is stored and reported separately from a score of 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    pub ca1: Option<f64>,
    pub ca2: Option<f64>,
    pub mid_term: Option<f64>,
    pub end_term: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRangeError {
    pub component: &'static str,
    pub value: f64,
    pub max: f64,
}

impl Components {
    pub fn is_empty(&self) -> bool {
        self.ca1.is_none() && self.ca2.is_none() && self.mid_term.is_none() && self.end_term.is_none()
    }

    /// Sum with absent components as 0, or `None` when nothing was entered.
    /// Snapped to hundredths so decimal scores land on grade boundaries.
    pub fn total(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let sum = self.ca1.unwrap_or(0.0)
            + self.ca2.unwrap_or(0.0)
            + self.mid_term.unwrap_or(0.0)
            + self.end_term.unwrap_or(0.0);
        Some((sum * 100.0).round() / 100.0)
    }

    pub fn grade(&self) -> Option<GradeLabel> {
        self.total().map(grade)
    }

    pub fn validate(&self) -> Result<(), ComponentRangeError> {
        let checks = [
            ("ca1", self.ca1, CA1_MAX),
            ("ca2", self.ca2, CA2_MAX),
            ("midTerm", self.mid_term, MID_TERM_MAX),
            ("endTerm", self.end_term, END_TERM_MAX),
        ];
        for (component, value, max) in checks {
            let Some(v) = value else {
                continue;
            };
            if !v.is_finite() || v < 0.0 || v > max {
                return Err(ComponentRangeError {
                    component,
                    value: v,
                    max,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterSummary {
    pub total_subjects: usize,
    pub average_percentage: String,
    pub gpa_equivalent: String,
}

/// Summarizes the totals of one semester's mark rows. Missing totals count as
/// 0. Returns `None` for an empty row set.
pub fn summarize<I>(totals: I) -> Option<SemesterSummary>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut count: usize = 0;
    let mut sum: f64 = 0.0;
    for t in totals {
        count += 1;
        sum += t.unwrap_or(0.0);
    }
    if count == 0 {
        return None;
    }

    let average = sum / ((count as f64) * 100.0) * 100.0;
    Some(SemesterSummary {
        total_subjects: count,
        average_percentage: format!("{average:.2}"),
        gpa_equivalent: gpa_band(average).to_string(),
    })
}
