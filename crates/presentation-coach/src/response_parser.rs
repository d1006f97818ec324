//! Best-effort extraction of coaching grades from free-form model output.
//!
//! The model is asked for `Label: Grade` lines but nothing guarantees it
//! complies, so parsing never fails: anything that cannot be read falls back
//! to [`Grade::DEFAULT`] or [`DEFAULT_EXPLANATION`].

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub const DEFAULT_EXPLANATION: &str = "Analysis complete.";

const EXPLANATION_LABEL: &str = "Explanation:";

lazy_static! {
    static ref GRADE_REGEX: Regex = Regex::new(r"^\s*([A-F])(\+)?").unwrap();
}

/// Ordinal letter grade, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    #[serde(rename = "C+")]
    CPlus,
    C,
    #[serde(rename = "D+")]
    DPlus,
    D,
    F,
}

impl Grade {
    pub const DEFAULT: Grade = Grade::B;

    /// Position on the [0, 1] scale used for the overall score.
    pub fn score(self) -> f32 {
        match self {
            Grade::APlus => 0.95,
            Grade::A => 0.85,
            Grade::BPlus => 0.75,
            Grade::B => 0.65,
            Grade::CPlus => 0.55,
            Grade::C => 0.45,
            Grade::DPlus => 0.35,
            Grade::D => 0.25,
            Grade::F => 0.10,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::DPlus => "D+",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    /// Reads a grade at the start of `text`, ignoring leading whitespace.
    /// `E` is not on the scale; a `+` after `F` is ignored.
    pub fn read_leading(text: &str) -> Option<Grade> {
        let caps = GRADE_REGEX.captures(text)?;
        let plus = caps.get(2).is_some();
        match (&caps[1], plus) {
            ("A", true) => Some(Grade::APlus),
            ("A", false) => Some(Grade::A),
            ("B", true) => Some(Grade::BPlus),
            ("B", false) => Some(Grade::B),
            ("C", true) => Some(Grade::CPlus),
            ("C", false) => Some(Grade::C),
            ("D", true) => Some(Grade::DPlus),
            ("D", false) => Some(Grade::D),
            ("F", _) => Some(Grade::F),
            _ => None,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    EyeContact,
    Framing,
    Posture,
    Lighting,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::EyeContact, Category::Framing, Category::Posture, Category::Lighting];

    /// Label as it appears in model output, colon included.
    pub fn label(&self) -> &'static str {
        match self {
            Category::EyeContact => "Eye Contact:",
            Category::Framing => "Framing:",
            Category::Posture => "Posture:",
            Category::Lighting => "Lighting:",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryGrades {
    pub eye_contact: Grade,
    pub framing: Grade,
    pub posture: Grade,
    pub lighting: Grade,
}

impl CategoryGrades {
    pub fn get(&self, category: Category) -> Grade {
        match category {
            Category::EyeContact => self.eye_contact,
            Category::Framing => self.framing,
            Category::Posture => self.posture,
            Category::Lighting => self.lighting,
        }
    }

    fn set(&mut self, category: Category, grade: Grade) {
        match category {
            Category::EyeContact => self.eye_contact = grade,
            Category::Framing => self.framing = grade,
            Category::Posture => self.posture = grade,
            Category::Lighting => self.lighting = grade,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, Grade)> + '_ {
        Category::ALL.into_iter().map(move |c| (c, self.get(c)))
    }

    /// Arithmetic mean of the category scores.
    pub fn overall_score(&self) -> f32 {
        let total: f32 = self.iter().map(|(_, g)| g.score()).sum();
        total / Category::ALL.len() as f32
    }
}

impl Default for CategoryGrades {
    fn default() -> Self {
        Self {
            eye_contact: Grade::DEFAULT,
            framing: Grade::DEFAULT,
            posture: Grade::DEFAULT,
            lighting: Grade::DEFAULT,
        }
    }
}

/// Outcome of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sequence: u64,
    pub grades: CategoryGrades,
    pub score: f32,
    pub explanation: String,
    /// Categories the parser could not read and filled with the default grade.
    pub defaulted: Vec<Category>,
    /// Generation hit the token budget before the stop sequence.
    pub truncated: bool,
}

impl AnalysisResult {
    /// Every field at its default.
    pub fn fallback(sequence: u64) -> Self {
        let grades = CategoryGrades::default();
        Self {
            sequence,
            score: grades.overall_score(),
            grades,
            explanation: DEFAULT_EXPLANATION.to_string(),
            defaulted: Category::ALL.to_vec(),
            truncated: false,
        }
    }

    pub fn for_request(mut self, sequence: u64, truncated: bool) -> Self {
        self.sequence = sequence;
        self.truncated = truncated;
        self
    }

    pub fn is_degraded(&self) -> bool {
        !self.defaulted.is_empty()
    }
}

pub struct ResponseParser;

impl ResponseParser {
    /// Parses `text` into a result with sequence number 0; the session stamps
    /// the real one with [`AnalysisResult::for_request`].
    pub fn parse(text: &str) -> AnalysisResult {
        let mut grades = CategoryGrades::default();
        let mut found: Vec<Category> = Vec::with_capacity(Category::ALL.len());
        let mut explanation: Option<String> = None;

        // a later occurrence of a label replaces an earlier one
        for line in text.lines() {
            for category in Category::ALL {
                if let Some(pos) = line.find(category.label()) {
                    let rest = &line[pos + category.label().len()..];
                    found.retain(|c| *c != category);
                    match Grade::read_leading(rest) {
                        Some(grade) => {
                            grades.set(category, grade);
                            found.push(category);
                        }
                        None => grades.set(category, Grade::DEFAULT),
                    }
                }
            }

            if let Some(pos) = line.find(EXPLANATION_LABEL) {
                let rest = line[pos + EXPLANATION_LABEL.len()..].trim();
                explanation = (!rest.is_empty()).then(|| rest.to_string());
            }
        }

        let defaulted: Vec<Category> = Category::ALL.into_iter().filter(|c| !found.contains(c)).collect();
        if !defaulted.is_empty() {
            debug!("Response degraded, defaulted categories: {:?}", defaulted);
        }

        AnalysisResult {
            sequence: 0,
            score: grades.overall_score(),
            grades,
            explanation: explanation.unwrap_or_else(|| DEFAULT_EXPLANATION.to_string()),
            defaulted,
            truncated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Grade Tests =====

    #[test]
    fn test_grade_reading() {
        assert_eq!(Grade::read_leading(" A"), Some(Grade::A));
        assert_eq!(Grade::read_leading("A+ because"), Some(Grade::APlus));
        assert_eq!(Grade::read_leading("\tC+"), Some(Grade::CPlus));
        assert_eq!(Grade::read_leading("F+"), Some(Grade::F));
        assert_eq!(Grade::read_leading("E"), None);
        assert_eq!(Grade::read_leading("[Grade]"), None);
        assert_eq!(Grade::read_leading("a"), None);
        assert_eq!(Grade::read_leading(""), None);
    }

    #[test]
    fn test_grade_scale_is_monotonic() {
        let grades = [
            Grade::APlus, Grade::A, Grade::BPlus, Grade::B, Grade::CPlus,
            Grade::C, Grade::DPlus, Grade::D, Grade::F,
        ];
        for pair in grades.windows(2) {
            assert!(pair[0].score() > pair[1].score(), "{} vs {}", pair[0], pair[1]);
        }
        assert!(grades.iter().all(|g| (0.0..=1.0).contains(&g.score())));
    }

    #[test]
    fn test_grade_serializes_as_symbol() {
        assert_eq!(serde_json::to_string(&Grade::BPlus).unwrap(), "\"B+\"");
        assert_eq!(serde_json::to_string(&Grade::F).unwrap(), "\"F\"");
    }

    // ===== Parser Tests =====

    #[test]
    fn test_well_formed_response() {
        let result = ResponseParser::parse("Eye Contact: A\nFraming: C+\nPosture: B\nLighting: F\nExplanation: test");

        assert_eq!(result.grades.eye_contact, Grade::A);
        assert_eq!(result.grades.framing, Grade::CPlus);
        assert_eq!(result.grades.posture, Grade::B);
        assert_eq!(result.grades.lighting, Grade::F);
        assert_eq!(result.explanation, "test");
        assert!(result.defaulted.is_empty());
        assert!((result.score - (0.85 + 0.55 + 0.65 + 0.10) / 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let result = ResponseParser::parse("garbage text with no labels");

        assert_eq!(result.grades, CategoryGrades::default());
        assert_eq!(result.explanation, DEFAULT_EXPLANATION);
        assert_eq!(result.defaulted, Category::ALL.to_vec());
        assert!((result.score - Grade::DEFAULT.score()).abs() < 1e-6);
        assert_eq!(result, AnalysisResult::fallback(0));
    }

    #[test]
    fn test_unreadable_grade_defaults_only_that_category() {
        let result = ResponseParser::parse("Eye Contact: [Grade]\nFraming: A+\nPosture: E\nLighting: D+");

        assert_eq!(result.grades.eye_contact, Grade::DEFAULT);
        assert_eq!(result.grades.framing, Grade::APlus);
        assert_eq!(result.grades.posture, Grade::DEFAULT);
        assert_eq!(result.grades.lighting, Grade::DPlus);
        assert_eq!(result.defaulted, vec![Category::EyeContact, Category::Posture]);
        assert!(result.is_degraded());
    }

    #[test]
    fn test_labels_are_case_sensitive() {
        let result = ResponseParser::parse("eye contact: A\nFRAMING: A");
        assert_eq!(result.grades, CategoryGrades::default());
    }

    #[test]
    fn test_labels_match_inside_decorated_lines() {
        let result = ResponseParser::parse("1. Eye Contact: D - looking away\n**Lighting:** ignored\n- Posture:B+");
        assert_eq!(result.grades.eye_contact, Grade::D);
        assert_eq!(result.grades.posture, Grade::BPlus);
        assert_eq!(result.grades.lighting, Grade::DEFAULT);
    }

    #[test]
    fn test_last_occurrence_wins() {
        let result = ResponseParser::parse(
            "Framing: A\nFraming: F\nPosture: C\nPosture: [Grade]\nExplanation: first\nExplanation: second",
        );
        assert_eq!(result.grades.framing, Grade::F);
        assert_eq!(result.grades.posture, Grade::DEFAULT);
        assert_eq!(result.explanation, "second");
        assert!(result.defaulted.contains(&Category::Posture));
        assert!(!result.defaulted.contains(&Category::Framing));
    }

    #[test]
    fn test_later_empty_explanation_resets_to_default() {
        let result = ResponseParser::parse("Explanation: good light\nExplanation:");
        assert_eq!(result.explanation, DEFAULT_EXPLANATION);
    }

    #[test]
    fn test_several_labels_on_one_line() {
        let result = ResponseParser::parse("Eye Contact: B+, Framing: C, Posture: A, Lighting: D");
        assert_eq!(result.grades.eye_contact, Grade::BPlus);
        assert_eq!(result.grades.framing, Grade::C);
        assert_eq!(result.grades.posture, Grade::A);
        assert_eq!(result.grades.lighting, Grade::D);
    }

    #[test]
    fn test_empty_explanation_uses_default() {
        let result = ResponseParser::parse("Explanation:   ");
        assert_eq!(result.explanation, DEFAULT_EXPLANATION);
    }

    #[test]
    fn test_for_request_stamps_sequence() {
        let result = ResponseParser::parse("Posture: A").for_request(42, true);
        assert_eq!(result.sequence, 42);
        assert!(result.truncated);
    }
}
